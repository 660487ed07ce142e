use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::BookingError;
use crate::model::{Booking, BookingId, BookingStatus};

/// Result of merging a single server booking into the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Appended,
    Replaced { position: usize },
    /// The incoming record would move the status backward and was ignored.
    Stale { current: BookingStatus },
}

/// Parses a UI filter token. `"all"` and blank mean no filter.
pub fn parse_status_filter(token: &str) -> Result<Option<BookingStatus>, BookingError> {
    let token = token.trim();
    if token.is_empty() || token.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    token.parse().map(Some).map_err(BookingError::from)
}

/// Result of merging a fetched list into the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub duplicates: usize,
    /// Local writes newer than the fetch that were kept over it.
    pub kept_local: usize,
}

/// Bookings held by one screen, unique by id, in server order.
///
/// Every accepted [`BookingCollection::upsert_one`] bumps a write
/// generation. A list fetched before a local write must not undo it, so
/// refreshes record [`BookingCollection::generation`] before fetching and
/// merge with [`BookingCollection::merge_fetched`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingCollection {
    entries: IndexMap<BookingId, Booking>,
    generation: u64,
    local_writes: IndexMap<BookingId, u64>,
}

impl BookingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the whole contents with a fresh server list.
    ///
    /// Returns how many duplicate ids the input contained. A duplicate keeps
    /// the position of its first occurrence and the value of its last.
    pub fn replace_all(&mut self, bookings: impl IntoIterator<Item = Booking>) -> usize {
        self.merge_fetched(bookings, self.generation).duplicates
    }

    /// Replaces the contents with a list fetched when the collection was at
    /// generation `since`.
    ///
    /// Bookings written locally after `since` win over their fetched record,
    /// and stay listed even when the fetch does not contain them.
    pub fn merge_fetched(
        &mut self,
        bookings: impl IntoIterator<Item = Booking>,
        since: u64,
    ) -> MergeOutcome {
        let mut entries = IndexMap::new();
        let mut outcome = MergeOutcome::default();

        for booking in bookings {
            let id = booking.id().clone();
            let booking = match self.written_since(&id, since) {
                Some(local) => {
                    debug!(booking_id = %id, "Keeping local write over fetched record");
                    local.clone()
                }
                None => booking,
            };
            if entries.insert(id, booking).is_some() {
                warn!("Duplicate booking id in server list");
                outcome.duplicates += 1;
            }
        }

        for (id, _) in self.local_writes.iter().filter(|(_, at)| **at > since) {
            if let Some(local) = self.entries.get(id) {
                outcome.kept_local += 1;
                entries.entry(id.clone()).or_insert_with(|| local.clone());
            }
        }

        self.local_writes.retain(|_, at| *at > since);
        debug!(count = entries.len(), kept_local = outcome.kept_local, "Collection replaced");
        self.entries = entries;
        outcome
    }

    fn written_since(&self, id: &BookingId, since: u64) -> Option<&Booking> {
        match self.local_writes.get(id) {
            Some(at) if *at > since => self.entries.get(id),
            _ => None,
        }
    }

    /// Replaces the booking with the same id in place, or appends it.
    pub fn upsert_one(&mut self, booking: Booking) -> UpsertOutcome {
        match self.entries.get_full_mut(booking.id()) {
            Some((position, _, existing)) => {
                let current = existing.status();
                if !current.can_advance_to(booking.status()) {
                    warn!(
                        booking_id = %booking.id(),
                        %current,
                        incoming = %booking.status(),
                        "Ignoring stale booking update"
                    );
                    return UpsertOutcome::Stale { current };
                }
                *existing = booking;
                self.record_write(position);
                UpsertOutcome::Replaced { position }
            }
            None => {
                let (position, _) = self.entries.insert_full(booking.id().clone(), booking);
                self.record_write(position);
                UpsertOutcome::Appended
            }
        }
    }

    fn record_write(&mut self, position: usize) {
        self.generation += 1;
        if let Some((id, _)) = self.entries.get_index(position) {
            self.local_writes.insert(id.clone(), self.generation);
        }
    }

    /// Bookings matching `status` (all of them for `None`), in order.
    pub fn filtered_by(&self, status: Option<BookingStatus>) -> impl Iterator<Item = &Booking> {
        self.entries
            .values()
            .filter(move |booking| status.is_none() || status == Some(booking.status()))
    }

    pub fn filtered_by_token(
        &self,
        token: &str,
    ) -> Result<impl Iterator<Item = &Booking>, BookingError> {
        let status = parse_status_filter(token)?;
        Ok(self.filtered_by(status))
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.entries.get(id)
    }

    pub fn position(&self, id: &BookingId) -> Option<usize> {
        self.entries.get_index_of(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.entries.values()
    }

    pub fn snapshot(&self) -> Vec<Booking> {
        self.entries.values().cloned().collect()
    }
}

/// A screen's collection behind its single-writer lock, plus the flag that
/// marks the screen as gone.
#[derive(Debug, Clone, Default)]
pub struct SharedCollection {
    inner: Arc<Mutex<BookingCollection>>,
    closed: Arc<AtomicBool>,
}

impl SharedCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, BookingCollection> {
        self.inner.lock().await
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Vec<Booking> {
        self.lock().await.snapshot()
    }
}
