use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::collection::{SharedCollection, UpsertOutcome};
use crate::config::EngineConfig;
use crate::coordinator::{ActionCoordinator, ActionRequest};
use crate::error::BookingError;
use crate::model::{Booking, BookingId, OwnerId, StationId};
use crate::policy::{Action, ActionIntent, Eligibility, EligibilityPolicy};
use crate::refresh::{
    BookingSource, RefreshController, RefreshOutcome, RefreshReason, Retention,
};
use crate::repository::{BookingRepository, StationScope};

/// What a screen lists and which of the fetched bookings it keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenProfile {
    pub source: BookingSource,
    pub retention: Retention,
}

impl ScreenProfile {
    pub fn owner_bookings(owner_id: OwnerId) -> Self {
        Self {
            source: BookingSource::Owner(owner_id),
            retention: Retention::ALL,
        }
    }

    pub fn owner_history(owner_id: OwnerId) -> Self {
        Self {
            source: BookingSource::Owner(owner_id),
            retention: Retention::HISTORY,
        }
    }

    pub fn station_today(station_id: StationId) -> Self {
        Self {
            source: BookingSource::Station {
                station_id,
                scope: StationScope::Today,
            },
            retention: Retention::TODAY,
        }
    }

    pub fn station_upcoming(station_id: StationId) -> Self {
        Self {
            source: BookingSource::Station {
                station_id,
                scope: StationScope::Upcoming,
            },
            retention: Retention::UPCOMING,
        }
    }
}

/// One list row: the booking and the actions it offers right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRow {
    pub booking: Booking,
    pub eligibility: Eligibility,
}

/// A booking list screen. Owns its collection; refreshes and actions write
/// to it one at a time. Dropping the screen closes it, and results that
/// arrive afterwards are discarded.
pub struct BookingScreen {
    repository: Arc<dyn BookingRepository>,
    collection: SharedCollection,
    refresh: RefreshController,
    coordinator: ActionCoordinator,
    policy: EligibilityPolicy,
    clock: Arc<dyn Clock>,
}

impl BookingScreen {
    pub fn open(
        profile: ScreenProfile,
        repository: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self, BookingError> {
        config.validate()?;

        let policy = EligibilityPolicy::new(&config.policy);
        let collection = SharedCollection::new();
        let refresh = RefreshController::new(
            Arc::clone(&repository),
            profile.source.clone(),
            profile.retention,
            config.refresh.clone(),
            collection.clone(),
        );
        let coordinator = ActionCoordinator::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
            policy,
            collection.clone(),
        );

        info!(source = ?profile.source, "Booking screen opened");
        Ok(Self {
            repository,
            collection,
            refresh,
            coordinator,
            policy,
            clock,
        })
    }

    pub async fn load(&self) -> RefreshOutcome {
        self.refresh.trigger_refresh(RefreshReason::InitialLoad).await
    }

    pub async fn resume(&self) -> RefreshOutcome {
        self.refresh.trigger_refresh(RefreshReason::Resume).await
    }

    pub async fn pull_to_refresh(&self) -> RefreshOutcome {
        self.refresh
            .trigger_refresh(RefreshReason::PullToRefresh)
            .await
    }

    /// Re-reads one booking from the server and merges it into the list,
    /// leaving the rest of the collection alone.
    ///
    /// Returns the booking as the collection holds it afterwards, or the
    /// fetched record when the screen has closed.
    #[instrument(skip(self), fields(booking_id = %booking_id))]
    pub async fn refresh_booking(&self, booking_id: &BookingId) -> Result<Booking, BookingError> {
        let fetched = self.repository.fetch_one(booking_id).await?;

        let mut collection = self.collection.lock().await;
        if self.collection.is_closed() {
            debug!("Screen closed, discarding booking refresh");
            return Ok(fetched);
        }
        match collection.upsert_one(fetched.clone()) {
            UpsertOutcome::Stale { current } => {
                warn!(
                    %current,
                    incoming = %fetched.status(),
                    "Fetched booking older than local state"
                );
                Ok(collection.get(booking_id).cloned().unwrap_or(fetched))
            }
            UpsertOutcome::Appended | UpsertOutcome::Replaced { .. } => {
                debug!(status = %fetched.status(), "Booking re-read");
                Ok(fetched)
            }
        }
    }

    pub fn refresh_controller(&self) -> &RefreshController {
        &self.refresh
    }

    /// Rows matching the UI filter token (`"all"` for everything), in server
    /// order, each with its eligibility evaluated now.
    pub async fn visible_bookings(&self, filter: &str) -> Result<Vec<BookingRow>, BookingError> {
        let now = self.clock.now();
        let collection = self.collection.lock().await;
        let rows = collection
            .filtered_by_token(filter)?
            .map(|booking| BookingRow {
                booking: booking.clone(),
                eligibility: self.policy.eligible_actions(booking, now),
            })
            .collect();
        Ok(rows)
    }

    /// What tapping `action` on a row should do.
    pub async fn resolve_action(
        &self,
        booking_id: &BookingId,
        action: Action,
    ) -> Result<ActionIntent, BookingError> {
        let collection = self.collection.lock().await;
        let booking = collection
            .get(booking_id)
            .ok_or_else(|| BookingError::NotFound(booking_id.clone()))?;
        Ok(self
            .policy
            .eligible_actions(booking, self.clock.now())
            .resolve(action))
    }

    pub async fn dispatch(&self, request: ActionRequest) -> Result<Booking, BookingError> {
        self.coordinator.dispatch(request).await
    }

    pub fn close(&self) {
        if !self.collection.is_closed() {
            self.collection.close();
            info!("Booking screen closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.collection.is_closed()
    }
}

impl Drop for BookingScreen {
    fn drop(&mut self) {
        self.close();
    }
}
