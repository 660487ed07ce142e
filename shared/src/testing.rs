//! In-memory collaborators for exercising screens without a server.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::error::BookingError;
use crate::model::{Booking, BookingId, BookingStatus, OwnerId, SlotId, StationId, TimeSlotId};
use crate::repository::{BookingRepository, FetchOutcome, StationScope};

/// Repository serving a fixed server-side list.
///
/// List fetches return the current list unless a scripted failure is queued.
/// Fetches can be held open with [`InMemoryRepository::hold_fetches`] to
/// observe overlapping refreshes. A held fetch answers with the list as it
/// was when the fetch was issued. Updates and cancels can be held the same
/// way with [`InMemoryRepository::hold_actions`].
#[derive(Default)]
pub struct InMemoryRepository {
    server: Mutex<Vec<Booking>>,
    skipped: AtomicUsize,
    fetch_failures: Mutex<VecDeque<BookingError>>,
    action_failure: Mutex<Option<BookingError>>,
    held: AtomicBool,
    gate: Notify,
    actions_held: AtomicBool,
    action_gate: Notify,
    fetch_calls: AtomicUsize,
    update_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryRepository {
    pub fn new(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let repository = Self::default();
        repository.set_server_bookings(bookings);
        repository
    }

    pub fn set_server_bookings(&self, bookings: impl IntoIterator<Item = Booking>) {
        *locked(&self.server) = bookings.into_iter().collect();
    }

    pub fn server_booking(&self, id: &BookingId) -> Option<Booking> {
        locked(&self.server).iter().find(|b| b.id() == id).cloned()
    }

    /// Reports `count` dropped records alongside every list fetch.
    pub fn set_skipped(&self, count: usize) {
        self.skipped.store(count, Ordering::SeqCst);
    }

    /// Queues a failure for the next list fetch.
    pub fn fail_next_fetch(&self, error: BookingError) {
        locked(&self.fetch_failures).push_back(error);
    }

    /// Makes every following update/cancel fail with `error`.
    pub fn fail_actions(&self, error: BookingError) {
        *locked(&self.action_failure) = Some(error);
    }

    pub fn hold_fetches(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Lets one held fetch complete.
    pub fn release_fetch(&self) {
        self.gate.notify_one();
    }

    pub fn hold_actions(&self) {
        self.actions_held.store(true, Ordering::SeqCst);
    }

    /// Lets one held update or cancel reach the server list.
    pub fn release_action(&self) {
        self.action_gate.notify_one();
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<FetchOutcome, BookingError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = match locked(&self.fetch_failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(FetchOutcome {
                bookings: locked(&self.server).clone(),
                skipped: self.skipped.load(Ordering::SeqCst),
            }),
        };
        if self.held.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        outcome
    }

    async fn wait_for_action_release(&self) {
        if self.actions_held.load(Ordering::SeqCst) {
            self.action_gate.notified().await;
        }
    }

    fn action_failure(&self) -> Result<(), BookingError> {
        locked(&self.action_failure).clone().map_or(Ok(()), Err)
    }

    fn replace_server_booking(
        &self,
        id: &BookingId,
        change: impl FnOnce(&Booking) -> Result<Booking, BookingError>,
    ) -> Result<Booking, BookingError> {
        let mut server = locked(&self.server);
        let slot = server
            .iter_mut()
            .find(|b| b.id() == id)
            .ok_or_else(|| BookingError::ServerRejected {
                message: "Booking not found".into(),
            })?;
        *slot = change(slot)?;
        Ok(slot.clone())
    }
}

#[async_trait]
impl BookingRepository for InMemoryRepository {
    async fn fetch_by_owner(&self, _owner_id: &OwnerId) -> Result<FetchOutcome, BookingError> {
        self.list().await
    }

    async fn fetch_by_station(
        &self,
        _station_id: &StationId,
        _scope: StationScope,
    ) -> Result<FetchOutcome, BookingError> {
        self.list().await
    }

    async fn fetch_one(&self, booking_id: &BookingId) -> Result<Booking, BookingError> {
        self.server_booking(booking_id)
            .ok_or_else(|| BookingError::ServerRejected {
                message: "Booking not found".into(),
            })
    }

    async fn update(
        &self,
        booking_id: &BookingId,
        slot_id: &SlotId,
        time_slot_id: &TimeSlotId,
    ) -> Result<Booking, BookingError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_action_release().await;
        self.action_failure()?;
        self.replace_server_booking(booking_id, |current| {
            Ok(current
                .clone()
                .with_slot(Some(slot_id.clone()), current.slot_number().map(str::to_string))
                .with_time_slot(time_slot_id.clone()))
        })
    }

    async fn cancel(&self, booking_id: &BookingId) -> Result<(), BookingError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_action_release().await;
        self.action_failure()?;
        self.replace_server_booking(booking_id, |current| {
            current
                .with_status(BookingStatus::Cancelled)
                .map_err(BookingError::from)
        })
        .map(|_| ())
    }
}
