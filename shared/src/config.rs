use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hours before start during which a booking can no longer be freely
/// updated or cancelled.
pub const DEFAULT_MODIFICATION_WINDOW_HOURS: i64 = 12;
pub const MAX_MODIFICATION_WINDOW_HOURS: i64 = 24 * 30;

pub const DEFAULT_REFRESH_ATTEMPTS: u32 = 3;
pub const MAX_REFRESH_ATTEMPTS: u32 = 10;
pub const BASE_RETRY_DELAY_MS: u64 = 500;
pub const MAX_RETRY_DELAY_MS: u64 = 10_000;
pub const JITTER_MAX_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub modification_window_hours: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            modification_window_hours: DEFAULT_MODIFICATION_WINDOW_HOURS,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_MODIFICATION_WINDOW_HOURS).contains(&self.modification_window_hours) {
            return Err(ConfigError::Invalid(format!(
                "modification_window_hours must be within 0..={MAX_MODIFICATION_WINDOW_HOURS}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Fetch attempts per refresh, first try included.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REFRESH_ATTEMPTS,
            base_backoff_ms: BASE_RETRY_DELAY_MS,
            max_backoff_ms: MAX_RETRY_DELAY_MS,
            jitter_max_ms: JITTER_MAX_MS,
        }
    }
}

impl RefreshConfig {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_REFRESH_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "max_attempts must be within 1..={MAX_REFRESH_ATTEMPTS}"
            )));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "base_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), capped, plus jitter.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        use rand::Rng;

        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);

        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_max_ms)
        };

        delay.saturating_add(jitter)
    }
}

/// Engine settings handed over by the platform shell, usually as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: PolicyConfig,
    pub refresh: RefreshConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        self.refresh.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.modification_window_hours, 12);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"refresh": {"max_attempts": 1}}"#).unwrap();
        assert_eq!(config.refresh.max_attempts, 1);
        assert_eq!(config.refresh.base_backoff_ms, BASE_RETRY_DELAY_MS);
        assert_eq!(config.policy, PolicyConfig::default());
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"refresh": {"max_attempts": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"policy": {"modification_window_hours": -1}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));

        let inverted = RefreshConfig {
            base_backoff_ms: 5_000,
            max_backoff_ms: 1_000,
            ..RefreshConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RefreshConfig {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            jitter_max_ms: 0,
        };
        assert_eq!(config.backoff_ms(1), 100);
        assert_eq!(config.backoff_ms(2), 200);
        assert_eq!(config.backoff_ms(3), 400);
        assert_eq!(config.backoff_ms(9), 1_000);
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let config = RefreshConfig {
            jitter_max_ms: 50,
            ..RefreshConfig::default()
        };
        for _ in 0..100 {
            let delay = config.backoff_ms(1);
            assert!((BASE_RETRY_DELAY_MS..=BASE_RETRY_DELAY_MS + 50).contains(&delay));
        }
    }
}
