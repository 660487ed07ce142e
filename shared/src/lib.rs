//! Shared core of the EV charging client.
//!
//! Owns the booking lifecycle rules and keeps each booking screen's list in
//! sync with the server. Platform shells provide the HTTP transport (see
//! [`transport::BookingTransport`]) and a clock, open a [`BookingScreen`] per
//! visible list, and render the rows it returns.
//!
//! ```text
//! BookingScreen
//!   ├─ RefreshController ── BookingRepository ── BookingTransport (shell)
//!   ├─ ActionCoordinator ── EligibilityPolicy, Clock
//!   └─ SharedCollection (single writer)
//! ```
//!
//! The core installs no tracing subscriber; shells route `tracing` output to
//! their platform logger.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod collection;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod policy;
pub mod refresh;
pub mod repository;
pub mod screen;
pub mod transport;
pub mod wire;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{BookingCollection, MergeOutcome, SharedCollection, UpsertOutcome};
pub use config::{EngineConfig, PolicyConfig, RefreshConfig};
pub use coordinator::{ActionCoordinator, ActionRequest};
pub use error::{BookingError, BookingResult, ErrorKind, Ineligibility};
pub use model::{Booking, BookingId, BookingStatus, OwnerId, SlotId, StationId, TimeSlotId};
pub use policy::{eligible_actions, Action, ActionIntent, Eligibility, EligibilityPolicy};
pub use refresh::{
    BookingSource, RefreshController, RefreshOutcome, RefreshPhase, RefreshReason,
    RefreshReport, RefreshSignal, Retention,
};
pub use repository::{
    BookingRepository, FetchOutcome, ParseSkipped, RemoteBookingRepository, StationScope,
};
pub use screen::{BookingRow, BookingScreen, ScreenProfile};
pub use transport::{ApiResponse, BookingTransport, TransportError};
