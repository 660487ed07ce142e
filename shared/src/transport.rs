use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BookingId, OwnerId, SlotId, StationId, TimeSlotId};
use crate::repository::StationScope;

/// Envelope returned by the platform's authenticated API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// HTTP status when the client knows it.
    #[serde(default)]
    pub status: Option<u16>,
}

impl ApiResponse {
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            message: None,
            status: Some(200),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            status: Some(204),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            status: Some(status),
        }
    }
}

/// Failure to get any response at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Boundary to the shell's HTTP client. Implementations attach the session
/// credentials; the core never sees headers or tokens.
#[async_trait]
pub trait BookingTransport: Send + Sync {
    async fn get(&self, path: &str) -> Result<ApiResponse, TransportError>;

    async fn update(
        &self,
        booking_id: &BookingId,
        slot_id: &SlotId,
        time_slot_id: &TimeSlotId,
    ) -> Result<ApiResponse, TransportError>;

    async fn cancel(&self, booking_id: &BookingId) -> Result<ApiResponse, TransportError>;
}

/// Request paths of the booking API.
pub struct ApiPath;

impl ApiPath {
    pub fn owner_bookings(owner_id: &OwnerId) -> String {
        format!("/bookings/owner/{owner_id}")
    }

    pub fn station_bookings(station_id: &StationId, scope: StationScope) -> String {
        format!("/bookings/station/{station_id}/{}", scope.as_str())
    }

    pub fn booking(booking_id: &BookingId) -> String {
        format!("/bookings/{booking_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let station = StationId::new("st-9").unwrap();
        assert_eq!(
            ApiPath::owner_bookings(&OwnerId::new("200012345678").unwrap()),
            "/bookings/owner/200012345678"
        );
        assert_eq!(
            ApiPath::station_bookings(&station, StationScope::Today),
            "/bookings/station/st-9/today"
        );
        assert_eq!(
            ApiPath::station_bookings(&station, StationScope::Upcoming),
            "/bookings/station/st-9/upcoming"
        );
        assert_eq!(ApiPath::booking(&BookingId::new("b-1").unwrap()), "/bookings/b-1");
    }

    #[test]
    fn test_response_envelope_deserializes_without_optional_fields() {
        let response: ApiResponse = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!response.success);
        assert_eq!(response.data, None);
        assert_eq!(response.status, None);
    }
}
