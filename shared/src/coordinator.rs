use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::collection::{SharedCollection, UpsertOutcome};
use crate::error::BookingError;
use crate::model::{Booking, BookingId, BookingStatus, SlotId, TimeSlotId};
use crate::policy::{Action, EligibilityPolicy};
use crate::repository::BookingRepository;

/// A user action as the UI reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    Update {
        booking_id: BookingId,
        slot_id: SlotId,
        time_slot_id: TimeSlotId,
    },
    Cancel {
        booking_id: BookingId,
    },
}

impl ActionRequest {
    pub fn action(&self) -> Action {
        match self {
            Self::Update { .. } => Action::Update,
            Self::Cancel { .. } => Action::Cancel,
        }
    }

    pub fn booking_id(&self) -> &BookingId {
        match self {
            Self::Update { booking_id, .. } | Self::Cancel { booking_id } => booking_id,
        }
    }
}

/// Runs user-initiated changes against the server and folds the result back
/// into the screen's collection.
///
/// Eligibility is re-evaluated at request time against the clock, not taken
/// from whatever the UI rendered earlier.
#[derive(Clone)]
pub struct ActionCoordinator {
    repository: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    policy: EligibilityPolicy,
    collection: SharedCollection,
}

impl ActionCoordinator {
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
        policy: EligibilityPolicy,
        collection: SharedCollection,
    ) -> Self {
        Self {
            repository,
            clock,
            policy,
            collection,
        }
    }

    pub async fn dispatch(&self, request: ActionRequest) -> Result<Booking, BookingError> {
        match request {
            ActionRequest::Update {
                booking_id,
                slot_id,
                time_slot_id,
            } => {
                self.request_update(&booking_id, &slot_id, &time_slot_id)
                    .await
            }
            ActionRequest::Cancel { booking_id } => self.request_cancel(&booking_id).await,
        }
    }

    /// Moves a booking to another slot and folds the server's record into
    /// the collection.
    ///
    /// Returns the booking as the collection holds it afterwards. When the
    /// server's record is older than the local entry, the local entry wins.
    #[instrument(skip(self), fields(booking_id = %booking_id))]
    pub async fn request_update(
        &self,
        booking_id: &BookingId,
        slot_id: &SlotId,
        time_slot_id: &TimeSlotId,
    ) -> Result<Booking, BookingError> {
        self.eligible_booking(booking_id, Action::Update).await?;

        let updated = self
            .repository
            .update(booking_id, slot_id, time_slot_id)
            .await?;

        let mut collection = self.collection.lock().await;
        if self.collection.is_closed() {
            debug!("Screen closed, dropping update result");
            return Ok(updated);
        }
        match collection.upsert_one(updated.clone()) {
            UpsertOutcome::Stale { current } => {
                warn!(%current, "Update result older than local state");
                Ok(collection.get(booking_id).cloned().unwrap_or(updated))
            }
            UpsertOutcome::Appended | UpsertOutcome::Replaced { .. } => {
                info!("Booking updated");
                Ok(updated)
            }
        }
    }

    /// Cancels a booking and marks it Cancelled locally without waiting for
    /// the next refresh.
    #[instrument(skip(self), fields(booking_id = %booking_id))]
    pub async fn request_cancel(&self, booking_id: &BookingId) -> Result<Booking, BookingError> {
        let before = self.eligible_booking(booking_id, Action::Cancel).await?;

        self.repository.cancel(booking_id).await?;

        let mut collection = self.collection.lock().await;
        if self.collection.is_closed() {
            debug!("Screen closed, dropping cancel result");
            return before.with_status(BookingStatus::Cancelled).map_err(Into::into);
        }

        // A refresh may have replaced the entry while the request was out.
        let current = collection.get(booking_id).cloned().unwrap_or(before);
        match current.with_status(BookingStatus::Cancelled) {
            Ok(cancelled) => {
                collection.upsert_one(cancelled.clone());
                info!("Booking cancelled");
                Ok(cancelled)
            }
            Err(e) => {
                warn!(error = %e, "Cancel accepted but local booking moved on");
                Ok(current)
            }
        }
    }

    /// Looks the booking up and re-checks the action against the clock.
    async fn eligible_booking(
        &self,
        booking_id: &BookingId,
        action: Action,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .collection
            .lock()
            .await
            .get(booking_id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(booking_id.clone()))?;

        self.policy
            .check(&booking, action, self.clock.now())
            .map_err(|reason| {
                debug!(%action, %reason, "Action refused locally");
                BookingError::NotEligible {
                    id: booking_id.clone(),
                    action,
                    reason,
                }
            })?;

        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Ineligibility;
    use crate::testing::InMemoryRepository;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 10, 8, 0, 0).unwrap()
    }

    fn id(raw: &str) -> BookingId {
        BookingId::new(raw).unwrap()
    }

    fn booking(raw_id: &str, status: BookingStatus, starts_in: Duration) -> Booking {
        let start = now() + starts_in;
        Booking::new(id(raw_id), status, start, start + Duration::hours(1))
            .unwrap()
            .with_slot(Some(SlotId::new("s-1").unwrap()), Some("1".into()))
            .with_time_slot(TimeSlotId::new("ts-1").unwrap())
    }

    struct Fixture {
        repository: Arc<InMemoryRepository>,
        clock: Arc<ManualClock>,
        collection: SharedCollection,
        coordinator: ActionCoordinator,
    }

    async fn fixture(bookings: Vec<Booking>) -> Fixture {
        let repository = Arc::new(InMemoryRepository::new(bookings.clone()));
        let clock = Arc::new(ManualClock::new(now()));
        let collection = SharedCollection::new();
        collection.lock().await.replace_all(bookings);

        let coordinator = ActionCoordinator::new(
            Arc::clone(&repository) as Arc<dyn BookingRepository>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            EligibilityPolicy::default(),
            collection.clone(),
        );
        Fixture {
            repository,
            clock,
            collection,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_update_replaces_booking_in_place() {
        let f = fixture(vec![
            booking("a", BookingStatus::Pending, Duration::hours(20)),
            booking("b", BookingStatus::Pending, Duration::hours(30)),
        ])
        .await;

        let updated = f
            .coordinator
            .request_update(&id("a"), &SlotId::new("s-4").unwrap(), &TimeSlotId::new("ts-8").unwrap())
            .await
            .unwrap();

        assert_eq!(updated.time_slot_id().unwrap().as_str(), "ts-8");
        let collection = f.collection.lock().await;
        assert_eq!(collection.position(&id("a")), Some(0));
        assert_eq!(collection.get(&id("a")), Some(&updated));
    }

    #[tokio::test]
    async fn test_stale_update_result_returns_local_entry() {
        let f = fixture(vec![booking("a", BookingStatus::Pending, Duration::days(2))]).await;
        f.repository.hold_actions();

        let pending = {
            let coordinator = f.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .request_update(&id("a"), &SlotId::new("s-4").unwrap(), &TimeSlotId::new("ts-8").unwrap())
                    .await
            })
        };
        while f.repository.update_calls() < 1 {
            tokio::task::yield_now().await;
        }
        let approved = booking("a", BookingStatus::Approved, Duration::days(2));
        f.collection.lock().await.upsert_one(approved.clone());
        f.repository.release_action();

        let returned = pending.await.unwrap().unwrap();

        assert_eq!(returned, approved);
        assert_eq!(f.collection.lock().await.get(&id("a")), Some(&approved));
    }

    #[tokio::test]
    async fn test_update_after_window_opens_is_refused() {
        let f = fixture(vec![booking("a", BookingStatus::Pending, Duration::hours(13))]).await;
        let before = f.collection.snapshot().await;

        f.clock.advance(Duration::hours(2));
        let result = f
            .coordinator
            .request_update(&id("a"), &SlotId::new("s-4").unwrap(), &TimeSlotId::new("ts-8").unwrap())
            .await;

        assert_eq!(
            result,
            Err(BookingError::NotEligible {
                id: id("a"),
                action: Action::Update,
                reason: Ineligibility::InsideModificationWindow { window_hours: 12 },
            })
        );
        assert_eq!(f.repository.update_calls(), 0);
        assert_eq!(f.collection.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_cancel_marks_cancelled_without_refresh() {
        let f = fixture(vec![
            booking("a", BookingStatus::Approved, Duration::days(2)),
            booking("b", BookingStatus::Pending, Duration::days(3)),
        ])
        .await;

        let cancelled = f.coordinator.request_cancel(&id("a")).await.unwrap();

        assert_eq!(cancelled.status(), BookingStatus::Cancelled);
        assert_eq!(f.repository.fetch_calls(), 0);
        let collection = f.collection.lock().await;
        assert_eq!(collection.position(&id("a")), Some(0));
        assert_eq!(
            collection.get(&id("a")).unwrap().status(),
            BookingStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_restricted_cancel_is_not_sent() {
        let f = fixture(vec![booking("a", BookingStatus::Approved, Duration::hours(3))]).await;

        let result = f.coordinator.request_cancel(&id("a")).await;

        assert!(matches!(
            result,
            Err(BookingError::NotEligible {
                reason: Ineligibility::InsideModificationWindow { .. },
                ..
            })
        ));
        assert_eq!(f.repository.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_booking_is_not_found() {
        let f = fixture(Vec::new()).await;
        assert_eq!(
            f.coordinator.request_cancel(&id("ghost")).await,
            Err(BookingError::NotFound(id("ghost")))
        );
    }

    #[tokio::test]
    async fn test_server_failure_leaves_collection() {
        let f = fixture(vec![booking("a", BookingStatus::Pending, Duration::days(2))]).await;
        f.repository.fail_actions(BookingError::ServerRejected {
            message: "Time slot no longer available".into(),
        });
        let before = f.collection.snapshot().await;

        let update = f
            .coordinator
            .request_update(&id("a"), &SlotId::new("s-4").unwrap(), &TimeSlotId::new("ts-8").unwrap())
            .await;
        let cancel = f.coordinator.request_cancel(&id("a")).await;

        assert!(matches!(update, Err(BookingError::ServerRejected { .. })));
        assert!(matches!(cancel, Err(BookingError::ServerRejected { .. })));
        assert_eq!(f.collection.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_dispatch_routes_requests() {
        let f = fixture(vec![booking("a", BookingStatus::Pending, Duration::days(2))]).await;
        let request: ActionRequest =
            serde_json::from_str(r#"{"action": "cancel", "booking_id": "a"}"#).unwrap();
        assert_eq!(request.action(), Action::Cancel);
        assert_eq!(request.booking_id(), &id("a"));

        let cancelled = f.coordinator.dispatch(request).await.unwrap();
        assert_eq!(cancelled.status(), BookingStatus::Cancelled);
        assert_eq!(f.repository.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_closed_screen_keeps_collection() {
        let f = fixture(vec![booking("a", BookingStatus::Pending, Duration::days(2))]).await;
        f.collection.close();

        let cancelled = f.coordinator.request_cancel(&id("a")).await.unwrap();

        assert_eq!(cancelled.status(), BookingStatus::Cancelled);
        assert_eq!(
            f.collection.lock().await.get(&id("a")).unwrap().status(),
            BookingStatus::Pending
        );
    }
}
