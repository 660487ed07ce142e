use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::collection::SharedCollection;
use crate::config::RefreshConfig;
use crate::error::{BookingError, ErrorKind};
use crate::model::{Booking, BookingStatus, OwnerId, StationId};
use crate::repository::{BookingRepository, FetchOutcome, StationScope};

const SIGNAL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshReason {
    InitialLoad,
    Resume,
    PullToRefresh,
}

impl RefreshReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitialLoad => "initial_load",
            Self::Resume => "resume",
            Self::PullToRefresh => "pull_to_refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Refreshing,
    Failed,
}

/// Which server list a screen shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingSource {
    Owner(OwnerId),
    Station {
        station_id: StationId,
        scope: StationScope,
    },
}

impl BookingSource {
    async fn fetch(
        &self,
        repository: &dyn BookingRepository,
    ) -> Result<FetchOutcome, BookingError> {
        match self {
            Self::Owner(owner_id) => repository.fetch_by_owner(owner_id).await,
            Self::Station { station_id, scope } => {
                repository.fetch_by_station(station_id, *scope).await
            }
        }
    }
}

/// Which fetched bookings a screen keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    statuses: Option<&'static [BookingStatus]>,
}

impl Retention {
    pub const ALL: Self = Self { statuses: None };

    /// Bookings an operator still has to serve today.
    pub const TODAY: Self = Self {
        statuses: Some(&[BookingStatus::Approved, BookingStatus::Charging]),
    };

    pub const HISTORY: Self = Self {
        statuses: Some(&BookingStatus::TERMINAL),
    };

    pub const UPCOMING: Self = Self::ALL;

    pub fn retains(&self, booking: &Booking) -> bool {
        match self.statuses {
            Some(statuses) => statuses.contains(&booking.status()),
            None => true,
        }
    }
}

/// What one completed refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub reason: RefreshReason,
    /// Bookings now held by the collection.
    pub retained: usize,
    pub dropped_by_filter: usize,
    /// Malformed records the repository skipped.
    pub skipped: usize,
    pub attempts: u32,
    /// Local changes made while the fetch was in flight, kept over the
    /// fetched records.
    pub kept_local: usize,
    /// False when the screen closed before the result arrived.
    pub applied: bool,
}

pub type RefreshOutcome = Result<RefreshReport, BookingError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshSignal {
    Started { reason: RefreshReason },
    Refreshed(RefreshReport),
    Failed { reason: RefreshReason, kind: ErrorKind },
    Discarded { reason: RefreshReason },
}

#[derive(Debug, Default)]
pub struct RefreshMetrics {
    pub fetches_issued: AtomicU64,
    pub coalesced: AtomicU64,
    pub failures: AtomicU64,
    pub discarded: AtomicU64,
}

impl RefreshMetrics {
    pub fn snapshot(&self) -> RefreshMetricsSnapshot {
        RefreshMetricsSnapshot {
            fetches_issued: self.fetches_issued.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshMetricsSnapshot {
    pub fetches_issued: u64,
    pub coalesced: u64,
    pub failures: u64,
    pub discarded: u64,
}

type InFlight = watch::Receiver<Option<RefreshOutcome>>;

#[derive(Default)]
struct RefreshState {
    phase: RefreshPhase,
    in_flight: Option<InFlight>,
}

struct Inner {
    repository: Arc<dyn BookingRepository>,
    source: BookingSource,
    retention: Retention,
    config: RefreshConfig,
    collection: SharedCollection,
    state: Mutex<RefreshState>,
    signals: broadcast::Sender<RefreshSignal>,
    metrics: RefreshMetrics,
}

/// Keeps one screen's collection in sync with the server.
///
/// At most one fetch runs per controller. Triggers arriving while it runs
/// wait for that fetch and receive its outcome. A failed refresh leaves the
/// collection exactly as it was.
#[derive(Clone)]
pub struct RefreshController {
    inner: Arc<Inner>,
}

impl RefreshController {
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        source: BookingSource,
        retention: Retention,
        config: RefreshConfig,
        collection: SharedCollection,
    ) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                repository,
                source,
                retention,
                config,
                collection,
                state: Mutex::new(RefreshState::default()),
                signals,
                metrics: RefreshMetrics::default(),
            }),
        }
    }

    pub async fn phase(&self) -> RefreshPhase {
        self.inner.state.lock().await.phase
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshSignal> {
        self.inner.signals.subscribe()
    }

    pub fn metrics(&self) -> RefreshMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub async fn trigger_refresh(&self, reason: RefreshReason) -> RefreshOutcome {
        let mut in_flight = {
            let mut state = self.inner.state.lock().await;
            if let Some(in_flight) = &state.in_flight {
                self.inner.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(reason = reason.as_str(), "Joining in-flight refresh");
                in_flight.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                state.in_flight = Some(rx.clone());
                state.phase = RefreshPhase::Refreshing;
                self.inner.metrics.fetches_issued.fetch_add(1, Ordering::Relaxed);
                self.inner.emit(RefreshSignal::Started { reason });

                let span = info_span!(
                    "refresh",
                    refresh_id = %Uuid::new_v4(),
                    reason = reason.as_str()
                );
                let inner = Arc::clone(&self.inner);
                tokio::spawn(
                    async move {
                        let outcome = inner.run(reason).await;
                        let mut state = inner.state.lock().await;
                        state.in_flight = None;
                        state.phase = RefreshPhase::Idle;
                        drop(state);
                        tx.send_replace(Some(outcome));
                    }
                    .instrument(span),
                );
                rx
            }
        };

        let outcome = match in_flight.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_else(|| Err(abandoned())),
            Err(_) => Err(abandoned()),
        };
        outcome
    }
}

fn abandoned() -> BookingError {
    BookingError::Network("refresh task ended without a result".into())
}

impl Inner {
    fn emit(&self, signal: RefreshSignal) {
        // No subscribers is fine.
        let _ = self.signals.send(signal);
    }

    async fn run(&self, reason: RefreshReason) -> RefreshOutcome {
        let since = self.collection.lock().await.generation();
        let (fetched, attempts) = match self.fetch_with_retry().await {
            Ok(fetched) => fetched,
            Err(error) => {
                self.state.lock().await.phase = RefreshPhase::Failed;
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %error, code = error.code(), "Refresh failed");
                self.emit(RefreshSignal::Failed {
                    reason,
                    kind: error.kind(),
                });
                return Err(error);
            }
        };

        let skipped = fetched.skipped;
        let (kept, dropped): (Vec<Booking>, Vec<Booking>) = fetched
            .bookings
            .into_iter()
            .partition(|booking| self.retention.retains(booking));

        let mut report = RefreshReport {
            reason,
            retained: kept.len(),
            dropped_by_filter: dropped.len(),
            skipped,
            attempts,
            kept_local: 0,
            applied: false,
        };

        let mut collection = self.collection.lock().await;
        if self.collection.is_closed() {
            drop(collection);
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("Screen closed, discarding refresh result");
            self.emit(RefreshSignal::Discarded { reason });
            return Ok(report);
        }
        report.kept_local = collection.merge_fetched(kept, since).kept_local;
        report.retained = collection.len();
        report.applied = true;
        drop(collection);

        info!(
            retained = report.retained,
            dropped_by_filter = report.dropped_by_filter,
            skipped = report.skipped,
            kept_local = report.kept_local,
            attempts,
            "Bookings refreshed"
        );
        self.emit(RefreshSignal::Refreshed(report.clone()));
        Ok(report)
    }

    async fn fetch_with_retry(&self) -> Result<(FetchOutcome, u32), BookingError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch(self.repository.as_ref()).await {
                Ok(fetched) => return Ok((fetched, attempt)),
                Err(error)
                    if error.is_retryable()
                        && attempt < self.config.max_attempts
                        && !self.collection.is_closed() =>
                {
                    let delay_ms = self.config.backoff_ms(attempt);
                    warn!(attempt, delay_ms, error = %error, "Fetch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
