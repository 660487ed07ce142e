//! Which actions a booking currently admits.
//!
//! The rule depends on two things only: the booking's status and how far its
//! start lies ahead of "now". Owners may freely change a booking until the
//! modification window opens; after that only a cancel remains, and the UI must
//! explain the restriction instead of sending it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::config::{PolicyConfig, DEFAULT_MODIFICATION_WINDOW_HOURS};
use crate::error::Ineligibility;
use crate::model::{Booking, BookingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Update,
    Cancel,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI should do when the user taps an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionIntent {
    Proceed(Action),
    ShowTimeRestriction(Action),
    Unavailable,
}

/// The set of actions a booking admits at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub update: bool,
    pub cancel: bool,
    /// Set when the booking is inside the modification window; the listed
    /// actions must be gated behind the time-restriction notice.
    pub restricted: bool,
}

impl Eligibility {
    pub const NONE: Self = Self {
        update: false,
        cancel: false,
        restricted: false,
    };

    pub const fn allows(self, action: Action) -> bool {
        match action {
            Action::Update => self.update,
            Action::Cancel => self.cancel,
        }
    }

    pub const fn is_empty(self) -> bool {
        !self.update && !self.cancel
    }

    pub const fn is_restricted(self) -> bool {
        self.restricted
    }

    pub fn actions(self) -> Vec<Action> {
        [Action::Update, Action::Cancel]
            .into_iter()
            .filter(|action| self.allows(*action))
            .collect()
    }

    pub const fn resolve(self, action: Action) -> ActionIntent {
        if !self.allows(action) {
            ActionIntent::Unavailable
        } else if self.restricted {
            ActionIntent::ShowTimeRestriction(action)
        } else {
            ActionIntent::Proceed(action)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    window: Duration,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::from_hours(DEFAULT_MODIFICATION_WINDOW_HOURS)
    }
}

impl EligibilityPolicy {
    /// Builds the policy from `config`, falling back to the default window
    /// when the configured one is out of range.
    pub fn new(config: &PolicyConfig) -> Self {
        if let Err(error) = config.validate() {
            warn!(
                error = %error,
                fallback_hours = DEFAULT_MODIFICATION_WINDOW_HOURS,
                "Invalid modification window, using default"
            );
            return Self::default();
        }
        Self::from_hours(config.modification_window_hours)
    }

    fn from_hours(hours: i64) -> Self {
        let window = Duration::try_hours(hours)
            .or_else(|| Duration::try_hours(DEFAULT_MODIFICATION_WINDOW_HOURS))
            .unwrap_or_default();
        Self { window }
    }

    pub fn window_hours(&self) -> i64 {
        self.window.num_hours()
    }

    pub fn eligible_actions(&self, booking: &Booking, now: DateTime<Utc>) -> Eligibility {
        let status = booking.status();
        if !status.is_modifiable() {
            return Eligibility::NONE;
        }

        // Inclusive: exactly one window ahead still counts as outside it.
        if booking.start_time() - now >= self.window {
            Eligibility {
                update: status == BookingStatus::Pending,
                cancel: true,
                restricted: false,
            }
        } else {
            Eligibility {
                update: false,
                cancel: true,
                restricted: true,
            }
        }
    }

    /// Whether `action` may be sent to the server right now.
    pub fn check(
        &self,
        booking: &Booking,
        action: Action,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligibility> {
        let status = booking.status();
        if !status.is_modifiable() {
            return Err(Ineligibility::Status(status));
        }

        let eligibility = self.eligible_actions(booking, now);
        if eligibility.is_restricted() {
            return Err(Ineligibility::InsideModificationWindow {
                window_hours: self.window_hours(),
            });
        }
        if !eligibility.allows(action) {
            return Err(Ineligibility::ActionNotOffered);
        }
        Ok(())
    }
}

/// [`EligibilityPolicy::eligible_actions`] with the default window.
pub fn eligible_actions(booking: &Booking, now: DateTime<Utc>) -> Eligibility {
    EligibilityPolicy::default().eligible_actions(booking, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingId;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 10, 8, 0, 0).unwrap()
    }

    fn booking(status: BookingStatus, starts_in: Duration) -> Booking {
        let start = now() + starts_in;
        Booking::new(
            BookingId::new("b-1").unwrap(),
            status,
            start,
            start + Duration::hours(1),
        )
        .unwrap()
    }

    #[test]
    fn test_out_of_range_window_falls_back_to_default() {
        for hours in [i64::MAX, i64::MIN, -5] {
            let policy = EligibilityPolicy::new(&PolicyConfig {
                modification_window_hours: hours,
            });
            assert_eq!(policy.window_hours(), DEFAULT_MODIFICATION_WINDOW_HOURS);
        }
        let policy = EligibilityPolicy::new(&PolicyConfig {
            modification_window_hours: 24,
        });
        assert_eq!(policy.window_hours(), 24);
    }

    #[test]
    fn test_charging_and_terminal_admit_nothing() {
        for status in [
            BookingStatus::Charging,
            BookingStatus::Finalized,
            BookingStatus::Cancelled,
            BookingStatus::Expired,
        ] {
            let eligibility = eligible_actions(&booking(status, Duration::days(3)), now());
            assert!(eligibility.is_empty(), "{status} should admit nothing");
            assert!(eligibility.actions().is_empty());
        }
    }

    #[test]
    fn test_pending_outside_window() {
        let eligibility =
            eligible_actions(&booking(BookingStatus::Pending, Duration::hours(13)), now());
        assert_eq!(eligibility.actions(), [Action::Update, Action::Cancel]);
        assert!(!eligibility.is_restricted());
    }

    #[test]
    fn test_pending_inside_window() {
        let eligibility =
            eligible_actions(&booking(BookingStatus::Pending, Duration::hours(11)), now());
        assert_eq!(eligibility.actions(), [Action::Cancel]);
        assert!(eligibility.is_restricted());
        assert_eq!(
            eligibility.resolve(Action::Cancel),
            ActionIntent::ShowTimeRestriction(Action::Cancel)
        );
        assert_eq!(eligibility.resolve(Action::Update), ActionIntent::Unavailable);
    }

    #[test]
    fn test_approved_window_is_inclusive() {
        let at_boundary =
            eligible_actions(&booking(BookingStatus::Approved, Duration::hours(12)), now());
        assert_eq!(at_boundary.actions(), [Action::Cancel]);
        assert!(!at_boundary.is_restricted());
        assert_eq!(
            at_boundary.resolve(Action::Cancel),
            ActionIntent::Proceed(Action::Cancel)
        );

        let just_inside = eligible_actions(
            &booking(
                BookingStatus::Approved,
                Duration::hours(12) - Duration::seconds(1),
            ),
            now(),
        );
        assert!(just_inside.is_restricted());
    }

    #[test]
    fn test_already_started_is_restricted() {
        let eligibility =
            eligible_actions(&booking(BookingStatus::Approved, -Duration::hours(2)), now());
        assert_eq!(eligibility.actions(), [Action::Cancel]);
        assert!(eligibility.is_restricted());
    }

    #[test]
    fn test_check_reasons() {
        let policy = EligibilityPolicy::default();

        assert_eq!(
            policy.check(
                &booking(BookingStatus::Charging, Duration::days(1)),
                Action::Cancel,
                now()
            ),
            Err(Ineligibility::Status(BookingStatus::Charging))
        );
        assert_eq!(
            policy.check(
                &booking(BookingStatus::Pending, Duration::hours(3)),
                Action::Update,
                now()
            ),
            Err(Ineligibility::InsideModificationWindow { window_hours: 12 })
        );
        assert_eq!(
            policy.check(
                &booking(BookingStatus::Approved, Duration::days(1)),
                Action::Update,
                now()
            ),
            Err(Ineligibility::ActionNotOffered)
        );
        assert_eq!(
            policy.check(
                &booking(BookingStatus::Pending, Duration::days(1)),
                Action::Update,
                now()
            ),
            Ok(())
        );
    }

    #[test]
    fn test_configured_window() {
        let policy = EligibilityPolicy::new(&PolicyConfig {
            modification_window_hours: 2,
        });
        assert_eq!(policy.window_hours(), 2);

        let eligibility =
            policy.eligible_actions(&booking(BookingStatus::Pending, Duration::hours(3)), now());
        assert!(eligibility.allows(Action::Update));
    }

    fn any_status() -> impl Strategy<Value = BookingStatus> {
        prop::sample::select(BookingStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn test_update_never_offered_inside_window(
            status in any_status(),
            minutes in -2_000i64..(12 * 60),
        ) {
            let eligibility = eligible_actions(&booking(status, Duration::minutes(minutes)), now());
            prop_assert!(!eligibility.allows(Action::Update));
        }

        #[test]
        fn test_non_modifiable_statuses_admit_nothing(
            status in any_status(),
            minutes in -10_000i64..10_000,
        ) {
            let eligibility = eligible_actions(&booking(status, Duration::minutes(minutes)), now());
            if !status.is_modifiable() {
                prop_assert_eq!(eligibility, Eligibility::NONE);
            } else {
                prop_assert!(eligibility.allows(Action::Cancel));
            }
        }
    }
}
