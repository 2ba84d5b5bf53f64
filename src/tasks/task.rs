//! # Task abstraction.
//!
//! A [`Task`] is consumed when it is started: [`Task::spawn`] takes the boxed task by
//! value, so consumer logic can own bridges and goal streams without sharing them.
//!
//! A task receives a [`CancellationToken`] and should watch it to stop cooperatively
//! during shutdown or failure wind-down.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Future returned by [`Task::spawn`].
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Owned handle to a task, as accepted by [`Supervisor::run`](crate::Supervisor::run).
pub type TaskRef = Box<dyn Task>;

/// # Asynchronous, cancelable, run-once unit.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use spinbridge::{BoxTaskFuture, Task, TaskError};
///
/// struct Heartbeat;
///
/// impl Task for Heartbeat {
///     fn name(&self) -> &str { "heartbeat" }
///
///     fn spawn(self: Box<Self>, ctx: CancellationToken) -> BoxTaskFuture {
///         Box::pin(async move {
///             ctx.cancelled().await;
///             Err(TaskError::Canceled)
///         })
///     }
/// }
/// ```
pub trait Task: Send + 'static {
    /// Returns a stable, human-readable task name.
    fn name(&self) -> &str;

    /// Starts the unit. The returned future runs until completion or cancellation.
    ///
    /// Returning `Err(TaskError::Canceled)` after observing `ctx` is a graceful stop.
    fn spawn(self: Box<Self>, ctx: CancellationToken) -> BoxTaskFuture;
}
