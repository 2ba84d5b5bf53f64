//! # Middleware collaborator boundary.
//!
//! spinbridge does not speak any wire protocol. It sits on top of a middleware client
//! that exposes four capabilities, captured by the [`Middleware`] trait:
//!
//! ```text
//!   dispatch_pending(timeout)              non-blocking "run ready callbacks once"
//!   is_running()                           liveness of the middleware context
//!   subscribe::<T>(topic, depth, cb)   ──► Subscription (RAII, drop = detach)
//!   submit_goal::<A>(server, goal, cb) ──► Acceptance ──► GoalResponse
//!                                                          ├─ Accepted { id, result: ResultSlot }
//!                                                          └─ Rejected { id }
//! ```
//!
//! ## Rules
//! - Callbacks run inside `dispatch_pending` and must only enqueue (never block).
//! - A middleware must tolerate `subscribe`/`submit_goal` being called from inside a callback.
//! - `cancel_goal` is a request; it never waits for the server.

mod slot;

#[cfg(any(test, feature = "loopback"))]
pub mod loopback;

pub use slot::{ResultSlot, ResultWriter};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::MiddlewareError;

/// Callback invoked by the middleware once per delivered item.
pub type Callback<T> = Box<dyn FnMut(T) + Send>;

/// Future resolving to the server's answer to a goal submission.
pub type Acceptance<R> = BoxFuture<'static, Result<GoalResponse<R>, MiddlewareError>>;

/// Client side of an external pub/sub + action middleware.
pub trait Middleware: Send + Sync + 'static {
    /// Invokes the callbacks that are ready right now, waiting at most `timeout`.
    ///
    /// Callers pass `Duration::ZERO`; the call must return promptly whether or not work was done.
    fn dispatch_pending(&self, timeout: Duration) -> Result<(), MiddlewareError>;

    /// Returns `false` once the middleware context has been shut down.
    fn is_running(&self) -> bool;

    /// Registers `callback` for messages of type `T` on `topic`.
    fn subscribe<T: Send + 'static>(
        &self,
        topic: &str,
        depth: usize,
        callback: Callback<T>,
    ) -> Result<Subscription, MiddlewareError>;

    /// Submits `goal` to the action `server`; `feedback` receives the goal's feedback messages.
    fn submit_goal<A: Action>(
        &self,
        server: &str,
        goal: A::Goal,
        feedback: Callback<A::Feedback>,
    ) -> Result<Acceptance<A::Result>, MiddlewareError>;

    /// Requests cancellation of an accepted goal.
    ///
    /// Middlewares without cancellation support keep this default, which ignores the request.
    fn cancel_goal(&self, server: &str, goal: GoalId) -> Result<(), MiddlewareError> {
        let _ = (server, goal);
        Ok(())
    }
}

/// Type-level description of an action: goal, feedback and result message types.
pub trait Action: Send + 'static {
    type Goal: Send + 'static;
    type Feedback: Send + 'static;
    type Result: Send + 'static;
}

/// Registration handle of one subscription.
///
/// Dropping the handle detaches the callback from the middleware.
pub struct Subscription {
    topic: Arc<str>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a handle; `detach` runs exactly once, when the handle is dropped.
    pub fn new(topic: impl Into<Arc<str>>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            detach: Some(Box::new(detach)),
        }
    }

    /// Topic this subscription is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// 128-bit goal identifier (a UUID on ROS 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GoalId([u8; 16]);

impl GoalId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_u128(v: u128) -> Self {
        Self(v.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Server's answer to a goal submission.
pub enum GoalResponse<R> {
    /// The goal was accepted; `result` resolves once, when the goal terminates.
    Accepted { id: GoalId, result: ResultSlot<R> },
    /// The goal was rejected.
    Rejected { id: GoalId },
}

impl<R> fmt::Debug for GoalResponse<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalResponse::Accepted { id, .. } => f.debug_struct("Accepted").field("id", id).finish(),
            GoalResponse::Rejected { id } => f.debug_struct("Rejected").field("id", id).finish(),
        }
    }
}

/// Terminal status reported together with a goal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Succeeded,
    Aborted,
    Canceled,
}

/// Terminal result of a goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalResult<R> {
    pub status: GoalStatus,
    pub value: R,
}

impl<R> GoalResult<R> {
    pub fn succeeded(value: R) -> Self {
        Self {
            status: GoalStatus::Succeeded,
            value,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GoalStatus::Succeeded
    }
}
