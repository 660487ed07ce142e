use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

const MAX_ID_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    #[error("unknown booking status: {0:?}")]
    UnknownStatus(String),

    #[error("unparsable timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("booking window must start before it ends ({start} >= {end})")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("status cannot move from {from} to {to}")]
    StatusRegression {
        from: BookingStatus,
        to: BookingStatus,
    },
}

fn validate_id(kind: &'static str, id: &str) -> Result<(), ModelError> {
    let reason = if id.is_empty() {
        "cannot be empty".to_string()
    } else if id.len() > MAX_ID_LENGTH {
        format!("exceeds {MAX_ID_LENGTH} characters")
    } else if id.chars().any(|c| c.is_control() || c == '/') {
        "contains control characters or '/'".to_string()
    } else {
        return Ok(());
    };
    Err(ModelError::InvalidId { kind, reason })
}

// Identifiers end up interpolated into request paths, so they are validated
// once at construction and immutable afterwards.
macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
                let id = id.into().trim().to_string();
                validate_id(stringify!($name), &id)?;
                Ok(Self(id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ModelError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(BookingId);
typed_id!(StationId);
typed_id!(SlotId);
typed_id!(TimeSlotId);
typed_id!(OwnerId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Charging,
    Finalized,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Approved,
        Self::Charging,
        Self::Finalized,
        Self::Cancelled,
        Self::Expired,
    ];

    pub const TERMINAL: [Self; 3] = [Self::Finalized, Self::Cancelled, Self::Expired];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Charging => "Charging",
            Self::Finalized => "Finalized",
            Self::Cancelled => "Cancelled",
            Self::Expired => "Expired",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled | Self::Expired)
    }

    /// Statuses in which the owner may still change or drop the booking.
    #[must_use]
    pub const fn is_modifiable(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Lifecycle order: Pending → Approved → Charging → Finalized, with
    /// Cancelled/Expired branching off Pending or Approved. Restating the
    /// current status is always allowed.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, _) => true,
            (Self::Approved, Self::Pending) => false,
            (Self::Approved, _) => true,
            (Self::Charging, Self::Charging | Self::Finalized) => true,
            (Self::Finalized, Self::Finalized)
            | (Self::Cancelled, Self::Cancelled)
            | (Self::Expired, Self::Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ModelError;

    /// Server tokens are case-insensitive ASCII.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| ModelError::UnknownStatus(token.to_string()))
    }
}

/// A reservation of a charging slot for a time window.
///
/// Values are immutable once built; status changes produce a new record via
/// [`Booking::with_status`].
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    id: BookingId,
    station_id: Option<StationId>,
    station_name: String,
    slot_id: Option<SlotId>,
    slot_number: Option<String>,
    time_slot_id: Option<TimeSlotId>,
    owner_id: Option<OwnerId>,
    status: BookingStatus,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    qr_payload: Option<String>,
}

impl Booking {
    pub fn new(
        id: BookingId,
        status: BookingStatus,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        if start_time >= end_time {
            return Err(ModelError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }

        Ok(Self {
            id,
            station_id: None,
            station_name: String::new(),
            slot_id: None,
            slot_number: None,
            time_slot_id: None,
            owner_id: None,
            status,
            start_time,
            end_time,
            qr_payload: None,
        })
    }

    #[must_use]
    pub fn with_station(mut self, station_id: StationId, station_name: impl Into<String>) -> Self {
        self.station_id = Some(station_id);
        self.station_name = station_name.into();
        self
    }

    #[must_use]
    pub fn with_slot(mut self, slot_id: Option<SlotId>, slot_number: Option<String>) -> Self {
        self.slot_id = slot_id;
        self.slot_number = slot_number.filter(|n| !n.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_time_slot(mut self, time_slot_id: TimeSlotId) -> Self {
        self.time_slot_id = Some(time_slot_id);
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    #[must_use]
    pub fn with_qr_payload(mut self, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        self.qr_payload = (!payload.is_empty()).then_some(payload);
        self
    }

    /// Copy of this booking with only the status changed. Refuses to move the
    /// lifecycle backward.
    pub fn with_status(&self, status: BookingStatus) -> Result<Self, ModelError> {
        if !self.status.can_advance_to(status) {
            return Err(ModelError::StatusRegression {
                from: self.status,
                to: status,
            });
        }
        Ok(Self {
            status,
            ..self.clone()
        })
    }

    pub fn id(&self) -> &BookingId {
        &self.id
    }

    pub fn station_id(&self) -> Option<&StationId> {
        self.station_id.as_ref()
    }

    pub fn station_name(&self) -> &str {
        &self.station_name
    }

    pub fn slot_id(&self) -> Option<&SlotId> {
        self.slot_id.as_ref()
    }

    pub fn slot_number(&self) -> Option<&str> {
        self.slot_number.as_deref()
    }

    pub fn time_slot_id(&self) -> Option<&TimeSlotId> {
        self.time_slot_id.as_ref()
    }

    pub fn owner_id(&self) -> Option<&OwnerId> {
        self.owner_id.as_ref()
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Opaque check-in token; decoding and rendering belong to the shell.
    pub fn qr_payload(&self) -> Option<&str> {
        self.qr_payload.as_deref()
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Elapsed share of the booking window while charging, 0..=100.
    ///
    /// `None` outside the window or for any status other than `Charging`;
    /// no placeholder percentage is invented.
    pub fn charging_progress(&self, now: DateTime<Utc>) -> Option<u8> {
        if self.status != BookingStatus::Charging || now < self.start_time || now >= self.end_time {
            return None;
        }

        let total = self.duration().num_milliseconds();
        let elapsed = (now - self.start_time).num_milliseconds();
        let percent = elapsed.saturating_mul(100) / total.max(1);
        u8::try_from(percent.clamp(0, 100)).ok()
    }
}

// The QR payload is a check-in credential; keep it out of logs.
impl fmt::Debug for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Booking")
            .field("id", &self.id)
            .field("station_id", &self.station_id)
            .field("station_name", &self.station_name)
            .field("slot_id", &self.slot_id)
            .field("slot_number", &self.slot_number)
            .field("time_slot_id", &self.time_slot_id)
            .field("owner_id", &self.owner_id)
            .field("status", &self.status)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("qr_payload_present", &self.qr_payload.is_some())
            .finish()
    }
}
