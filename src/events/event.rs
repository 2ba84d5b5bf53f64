//! # Runtime events emitted by the supervisor.
//!
//! [`EventKind`] classifies events in three groups:
//! - **Unit lifecycle**: a unit started, stopped, failed or panicked
//! - **Run outcome**: the first failure aborted the run, shutdown was requested,
//!   units stopped within (or overran) the grace period
//! - **Subscriber health**: a subscriber dropped an event or panicked
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use spinbridge::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("main")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.task.as_deref(), Some("main"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `task` (subscriber name) and `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `task` (subscriber name) and `reason`.
    SubscriberOverflow,

    // === Run outcome ===
    /// OS termination signal observed; all units are being canceled.
    ShutdownRequested,

    /// A unit failed; the remaining units are being canceled.
    ///
    /// Sets `task` (the failed unit) and `reason`.
    RunAborted,

    /// All canceled units stopped within the grace period.
    ///
    /// Sets `grace_ms`.
    AllStoppedWithin,

    /// Grace period exceeded; some units did not stop in time.
    ///
    /// Sets `grace_ms` and `reason` (comma-separated stuck units).
    GraceExceeded,

    // === Unit lifecycle ===
    /// Unit is starting. Sets `task`.
    TaskStarting,

    /// Unit finished successfully **or** stopped gracefully after cancellation. Sets `task`.
    TaskStopped,

    /// Unit returned an error. Sets `task` and `reason`.
    TaskFailed,

    /// Unit panicked. Sets `task` and `reason` (panic message).
    TaskPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the unit (or subscriber), if applicable.
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, panic payloads, stuck units).
    pub reason: Option<Arc<str>>,
    /// Grace period in milliseconds (compact).
    pub grace_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            reason: None,
            grace_ms: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a unit name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a grace period (stored as milliseconds).
    #[inline]
    pub fn with_grace(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.grace_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}
