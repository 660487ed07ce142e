use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::BookingError;
use crate::model::{Booking, BookingId, OwnerId, SlotId, StationId, TimeSlotId};
use crate::transport::{ApiPath, ApiResponse, BookingTransport};
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationScope {
    Today,
    Upcoming,
}

impl StationScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Upcoming => "upcoming",
        }
    }
}

/// Records dropped while parsing an otherwise successful list fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSkipped(pub usize);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub bookings: Vec<Booking>,
    pub skipped: usize,
}

impl FetchOutcome {
    pub fn new(bookings: Vec<Booking>) -> Self {
        Self {
            bookings,
            skipped: 0,
        }
    }

    pub fn parse_skipped(&self) -> Option<ParseSkipped> {
        (self.skipped > 0).then_some(ParseSkipped(self.skipped))
    }
}

/// Read/write access to remote bookings. Implementations never retry; the
/// caller decides what to do with a failure.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn fetch_by_owner(&self, owner_id: &OwnerId) -> Result<FetchOutcome, BookingError>;

    async fn fetch_by_station(
        &self,
        station_id: &StationId,
        scope: StationScope,
    ) -> Result<FetchOutcome, BookingError>;

    async fn fetch_one(&self, booking_id: &BookingId) -> Result<Booking, BookingError>;

    async fn update(
        &self,
        booking_id: &BookingId,
        slot_id: &SlotId,
        time_slot_id: &TimeSlotId,
    ) -> Result<Booking, BookingError>;

    async fn cancel(&self, booking_id: &BookingId) -> Result<(), BookingError>;
}

/// Repository backed by the shell's authenticated API client.
pub struct RemoteBookingRepository<T: BookingTransport> {
    transport: Arc<T>,
}

impl<T: BookingTransport> RemoteBookingRepository<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    fn accept(response: ApiResponse) -> Result<Option<String>, BookingError> {
        if response.success {
            Ok(response.data)
        } else {
            Err(BookingError::from_rejection(
                response.status,
                response.message.as_deref(),
            ))
        }
    }

    async fn fetch_list(&self, path: &str) -> Result<FetchOutcome, BookingError> {
        let response = self.transport.get(path).await?;
        let Some(data) = Self::accept(response)? else {
            return Ok(FetchOutcome::default());
        };

        let (bookings, skipped) = wire::parse_booking_list(&data)?;
        if skipped > 0 {
            warn!(path, skipped, "Dropped malformed booking records");
        }
        debug!(path, count = bookings.len(), "Fetched bookings");

        Ok(FetchOutcome { bookings, skipped })
    }
}

#[async_trait]
impl<T: BookingTransport> BookingRepository for RemoteBookingRepository<T> {
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn fetch_by_owner(&self, owner_id: &OwnerId) -> Result<FetchOutcome, BookingError> {
        self.fetch_list(&ApiPath::owner_bookings(owner_id)).await
    }

    #[instrument(skip(self), fields(station_id = %station_id, scope = scope.as_str()))]
    async fn fetch_by_station(
        &self,
        station_id: &StationId,
        scope: StationScope,
    ) -> Result<FetchOutcome, BookingError> {
        self.fetch_list(&ApiPath::station_bookings(station_id, scope))
            .await
    }

    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn fetch_one(&self, booking_id: &BookingId) -> Result<Booking, BookingError> {
        let response = self.transport.get(&ApiPath::booking(booking_id)).await?;
        let data = Self::accept(response)?
            .ok_or_else(|| BookingError::malformed("empty booking payload"))?;
        wire::parse_booking(&data)
    }

    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn update(
        &self,
        booking_id: &BookingId,
        slot_id: &SlotId,
        time_slot_id: &TimeSlotId,
    ) -> Result<Booking, BookingError> {
        let response = self
            .transport
            .update(booking_id, slot_id, time_slot_id)
            .await?;
        let data = Self::accept(response)?;

        // Some deployments answer an update with the booking, others with a
        // bare acknowledgement; re-read in the latter case.
        match data.as_deref().map(wire::parse_booking) {
            Some(Ok(updated)) => Ok(updated),
            _ => {
                debug!("Update response carried no booking, re-reading");
                self.fetch_one(booking_id).await
            }
        }
    }

    #[instrument(skip(self), fields(booking_id = %booking_id))]
    async fn cancel(&self, booking_id: &BookingId) -> Result<(), BookingError> {
        let response = self.transport.cancel(booking_id).await?;
        Self::accept(response).map(|_| ())
    }
}
