//! # Session: explicit handle to the middleware connection.
//!
//! A [`Session`] owns the middleware client and a liveness flag. The flag is set when the
//! session is created and cleared by [`Session::shutdown`]; the [`Pump`] reads it on
//! every tick through a non-owning reference. Nothing in spinbridge consults global state.
//!
//! ```text
//! Session::new() ──► alive = true
//!      │
//!      ├─► subscribe::<T>()   ──► Bridge<T>
//!      ├─► send_goal::<A>()   ──► GoalStream<A, M>
//!      ├─► pump(cfg)          ──► Pump<M>  (Weak<Session<M>>)
//!      │
//! Session::shutdown() ──► alive = false ──► pump exits on its next tick
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::core::{Pump, PumpConfig};
use crate::error::MiddlewareError;
use crate::goal::GoalStream;
use crate::middleware::{Action, Middleware};

/// Process-wide handle to a middleware connection.
pub struct Session<M> {
    name: String,
    middleware: M,
    alive: AtomicBool,
}

impl<M: Middleware> Session<M> {
    /// Creates a live session around `middleware`.
    pub fn new(name: impl Into<String>, middleware: M) -> Arc<Self> {
        let name = name.into();
        tracing::debug!(session = %name, "session created");
        Arc::new(Self {
            name,
            middleware,
            alive: AtomicBool::new(true),
        })
    }

    /// True while the session has not been shut down and the middleware is running.
    pub fn is_ok(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.middleware.is_running()
    }

    /// Clears the liveness flag. Idempotent.
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::debug!(session = %self.name, "session shut down");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn middleware(&self) -> &M {
        &self.middleware
    }

    /// Subscribes to `topic` and returns a bridge over the incoming messages.
    pub fn subscribe<T: Send + 'static>(
        &self,
        topic: &str,
        depth: usize,
    ) -> Result<Bridge<T>, MiddlewareError> {
        Bridge::subscribe(self, topic, depth)
    }

    /// Prepares a goal for `server`. The goal is submitted when the stream is first polled.
    pub fn send_goal<A: Action>(self: &Arc<Self>, server: &str, goal: A::Goal) -> GoalStream<A, M> {
        GoalStream::new(Arc::clone(self), server, goal)
    }

    /// Builds a pump that drives this session's dispatch.
    pub fn pump(self: &Arc<Self>, cfg: PumpConfig) -> Pump<M> {
        Pump::new(self, cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::loopback::LoopbackMiddleware;

    #[test]
    fn liveness_follows_flag_and_middleware() {
        let mw = LoopbackMiddleware::new();
        let session = Session::new("node", mw.clone());
        assert!(session.is_ok());

        session.shutdown();
        assert!(!session.is_ok());
        session.shutdown();

        let other = Session::new("node2", mw.clone());
        assert!(other.is_ok());
        mw.shutdown();
        assert!(!other.is_ok());
    }
}
