//! # Cooperative dispatch pump.
//!
//! The [`Pump`] gives the middleware a chance to run its ready callbacks on every
//! scheduler tick without ever holding the scheduler for more than one dispatch step.
//!
//! ```text
//! loop {
//!   ├─► token canceled?            ──► PumpExit::Canceled
//!   ├─► session dropped?           ──► PumpExit::SessionDropped
//!   ├─► !session.is_ok()           ──► PumpExit::SessionClosed
//!   ├─► dispatch_pending(0)        ──► Err(e) ──► return Err(e)
//!   └─► pause (cancellable):
//!         period == 0    ──► yield_now
//!         period <  1ms  ──► yield_now until period elapsed
//!         period >= 1ms  ──► sleep(period)
//! }
//! ```
//!
//! The pump holds a [`Weak`] reference to its session; it never keeps the session alive.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::PumpConfig;
use crate::error::{MiddlewareError, TaskError};
use crate::middleware::Middleware;
use crate::session::Session;
use crate::tasks::{BoxTaskFuture, Task};

/// Why a pump loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The session was shut down or the middleware stopped running.
    SessionClosed,
    /// Every strong reference to the session was dropped.
    SessionDropped,
    /// The pump's cancellation token fired.
    Canceled,
}

/// Drives `Middleware::dispatch_pending` for one session.
pub struct Pump<M> {
    session: Weak<Session<M>>,
    cfg: PumpConfig,
}

impl<M: Middleware> Pump<M> {
    pub fn new(session: &Arc<Session<M>>, cfg: PumpConfig) -> Self {
        Self {
            session: Arc::downgrade(session),
            cfg,
        }
    }

    pub fn config(&self) -> PumpConfig {
        self.cfg
    }

    /// Performs one dispatch step.
    ///
    /// Returns `Break` without dispatching when the session is gone or no longer ok.
    pub fn tick(&self) -> Result<ControlFlow<PumpExit>, MiddlewareError> {
        let Some(session) = self.session.upgrade() else {
            return Ok(ControlFlow::Break(PumpExit::SessionDropped));
        };
        if !session.is_ok() {
            return Ok(ControlFlow::Break(PumpExit::SessionClosed));
        }
        session
            .middleware()
            .dispatch_pending(self.cfg.dispatch_timeout)?;
        Ok(ControlFlow::Continue(()))
    }

    /// Runs the dispatch loop until the session closes, `token` fires, or dispatch fails.
    ///
    /// A dispatch failure ends the loop and is returned unchanged.
    pub async fn run(&self, token: CancellationToken) -> Result<PumpExit, MiddlewareError> {
        let mut ticks: u64 = 0;
        loop {
            if token.is_cancelled() {
                tracing::debug!(ticks, "pump canceled");
                return Ok(PumpExit::Canceled);
            }
            match self.tick() {
                Ok(ControlFlow::Continue(())) => ticks += 1,
                Ok(ControlFlow::Break(exit)) => {
                    tracing::debug!(ticks, ?exit, "pump stopped");
                    return Ok(exit);
                }
                Err(err) => {
                    tracing::error!(ticks, error = %err, "dispatch failed; pump stopping");
                    return Err(err);
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(ticks, "pump canceled");
                    return Ok(PumpExit::Canceled);
                }
                _ = self.pause() => {}
            }
        }
    }

    async fn pause(&self) {
        let period = self.cfg.period;
        if self.cfg.yields_only() {
            tokio::task::yield_now().await;
        } else if period >= TIMER_RESOLUTION {
            tokio::time::sleep(period).await;
        } else {
            spin_for(period).await;
        }
    }
}

/// Granularity of tokio's timer wheel. Shorter sleeps round up to it.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Yields to the scheduler until `period` has elapsed.
///
/// A paused test clock does not advance while tasks keep yielding; once `period` of
/// real time has passed without the runtime clock following, the rest is slept.
async fn spin_for(period: Duration) {
    let deadline = Instant::now() + period;
    let started = std::time::Instant::now();
    loop {
        tokio::task::yield_now().await;
        if Instant::now() >= deadline {
            return;
        }
        if started.elapsed() >= period {
            tokio::time::sleep_until(deadline).await;
            return;
        }
    }
}

impl<M: Middleware> Task for Pump<M> {
    fn name(&self) -> &str {
        "pump"
    }

    fn spawn(self: Box<Self>, ctx: CancellationToken) -> BoxTaskFuture {
        Box::pin(async move {
            match self.run(ctx).await {
                Ok(_) => Ok(()),
                Err(source) => Err(TaskError::Dispatch { source }),
            }
        })
    }
}
