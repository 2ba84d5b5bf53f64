//! # LogWriter: runtime events as `tracing` records
//!
//! Unit lifecycle goes out at `info`, failures and overruns at `warn`/`error`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  spinbridge: starting task="pump"
//! INFO  spinbridge: starting task="main"
//! WARN  spinbridge: failed task="main" reason="execution failed: sensor offline"
//! WARN  spinbridge: run aborted task="main"
//! INFO  spinbridge: stopped task="pump"
//! INFO  spinbridge: all stopped within grace grace_ms=10000
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Debug, Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskStarting => tracing::info!(target: "spinbridge", seq = e.seq, task, "starting"),
            EventKind::TaskStopped => tracing::info!(target: "spinbridge", seq = e.seq, task, "stopped"),
            EventKind::TaskFailed => {
                tracing::warn!(target: "spinbridge", seq = e.seq, task, reason, "failed")
            }
            EventKind::TaskPanicked => {
                tracing::error!(target: "spinbridge", seq = e.seq, task, reason, "panicked")
            }
            EventKind::RunAborted => {
                tracing::warn!(target: "spinbridge", seq = e.seq, task, reason, "run aborted")
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "spinbridge", seq = e.seq, "shutdown requested")
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(target: "spinbridge", seq = e.seq, grace_ms = e.grace_ms, "all stopped within grace")
            }
            EventKind::GraceExceeded => {
                tracing::error!(target: "spinbridge", seq = e.seq, grace_ms = e.grace_ms, stuck = reason, "grace exceeded")
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "spinbridge", seq = e.seq, subscriber = task, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: "spinbridge", seq = e.seq, subscriber = task, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
