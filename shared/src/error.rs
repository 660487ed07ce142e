use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::{BookingId, BookingStatus, ModelError};
use crate::policy::Action;
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Unauthorized,
    ServerRejected,
    NotFound,
    NotEligible,
    Invalid,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Unauthorized => "AUTH_ERROR",
            Self::ServerRejected => "SERVER_REJECTED",
            Self::NotFound => "NOT_FOUND",
            Self::NotEligible => "NOT_ELIGIBLE",
            Self::Invalid => "VALIDATION_ERROR",
        }
    }

    /// Only transport failures are worth repeating; everything else needs a
    /// different request or a new session.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a booking action was refused locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ineligibility {
    /// The booking's status admits no user action at all.
    Status(BookingStatus),
    /// The booking starts sooner than the modification window allows.
    InsideModificationWindow { window_hours: i64 },
    /// The status allows actions, but not this one.
    ActionNotOffered,
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "status {status} does not allow changes"),
            Self::InsideModificationWindow { window_hours } => {
                write!(f, "booking starts within {window_hours} hours")
            }
            Self::ActionNotOffered => f.write_str("action not offered for this status"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("session rejected by server")]
    Unauthorized,

    #[error("server rejected request: {message}")]
    ServerRejected { message: String },

    #[error("booking {0} not found")]
    NotFound(BookingId),

    #[error("booking {id} is not eligible for {action}: {reason}")]
    NotEligible {
        id: BookingId,
        action: Action,
        reason: Ineligibility,
    },

    #[error("invalid input: {0}")]
    Invalid(String),
}

impl BookingError {
    /// Classifies a non-success API response.
    #[must_use]
    pub fn from_rejection(status: Option<u16>, message: Option<&str>) -> Self {
        if matches!(status, Some(401 | 403)) {
            return Self::Unauthorized;
        }

        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map_or_else(
                || match status {
                    Some(code) => format!("HTTP error: {code}"),
                    None => "request rejected".to_string(),
                },
                ToString::to_string,
            );

        Self::ServerRejected { message }
    }

    pub(crate) fn malformed(what: impl fmt::Display) -> Self {
        Self::ServerRejected {
            message: format!("malformed response: {what}"),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::ServerRejected { .. } => ErrorKind::ServerRejected,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotEligible { .. } => ErrorKind::NotEligible,
            Self::Invalid(_) => ErrorKind::Invalid,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            Self::Unauthorized => "Your session has expired. Please sign in again.".into(),
            Self::ServerRejected { message } => message.clone(),
            Self::NotFound(_) => "This booking is no longer available. Pull to refresh.".into(),
            Self::NotEligible { reason, .. } => match reason {
                Ineligibility::InsideModificationWindow { window_hours } => format!(
                    "Bookings can only be changed or cancelled at least {window_hours} hours before they start."
                ),
                Ineligibility::Status(status) => {
                    format!("A {} booking can no longer be changed.", status.as_str().to_lowercase())
                }
                Ineligibility::ActionNotOffered => {
                    "This action is not available for this booking.".into()
                }
            },
            Self::Invalid(message) => message.clone(),
        }
    }
}

impl From<TransportError> for BookingError {
    fn from(e: TransportError) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<ModelError> for BookingError {
    fn from(e: ModelError) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<ConfigError> for BookingError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e.to_string())
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
