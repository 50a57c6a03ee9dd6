//! Core engine for client-side engagement tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Active time: start/stop interval bookkeeping per page or element
//! - Idle detection: a polled countdown reset by user activity
//! - Presence: on-page vs left/idle transitions with callbacks
//! - Engagement: scroll depth and custom event aggregation into snapshots
//! - Dispatch: best-effort, fire-and-forget snapshot delivery
//!
//! Storage and transport are collaborators behind the [`KeyValueStore`] and
//! [`Transport`] traits; this crate performs no I/O of its own.

pub mod clock;
pub mod dispatch;
mod error;
pub mod identity;
pub mod idle;
pub mod interval;
mod options;
pub mod page;
pub mod presence;
pub mod session;
pub mod signal;
pub mod snapshot;
pub mod timer;
pub mod tracker;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchOutcome, DispatchTrigger, Dispatcher, Transport};
pub use error::{EngineError, StoreError, TransportError};
pub use identity::{Identity, IdentityKey, KeyValueStore, MemoryStore, Scope, classify_referrer};
pub use idle::{IdleDetector, PollOutcome};
pub use interval::{Interval, IntervalAccumulator};
pub use options::EngineOptions;
pub use page::{Attribution, PageContext, Screen};
pub use presence::{Invocations, PresenceEvent, PresenceState};
pub use session::PageSession;
pub use signal::BrowserSignal;
pub use snapshot::EngagementSnapshot;
pub use timer::{ActiveTimer, PageTime};
pub use tracker::{EngagementTracker, MAX_REPORTED_SECONDS, clamp_active_seconds};
pub use types::{ClientId, TimerName, ValidationError};
