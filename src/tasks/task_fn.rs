//! # Function-backed task (`TaskFn`)
//!
//! [`TaskFn`] wraps a closure `F: FnOnce(CancellationToken) -> Fut`. The closure runs
//! once, when the supervisor starts the unit, and may move owned state (bridges, goal
//! streams, sessions) into its future.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use spinbridge::{TaskError, TaskFn, TaskRef};
//!
//! let t: TaskRef = TaskFn::boxed("worker", |ctx: CancellationToken| async move {
//!     if ctx.is_cancelled() {
//!         return Err(TaskError::Canceled);
//!     }
//!     Ok(())
//! });
//!
//! assert_eq!(t.name(), "worker");
//! ```

use std::borrow::Cow;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::tasks::task::{BoxTaskFuture, Task, TaskRef};

/// Function-backed task implementation.
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Creates a new function-backed task.
    ///
    /// Prefer [`TaskFn::boxed`] when you immediately need a [`TaskRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the task and returns it as an owned handle (`Box<dyn Task>`).
    pub fn boxed(name: impl Into<Cow<'static, str>>, f: F) -> TaskRef {
        Box::new(Self::new(name, f))
    }
}

impl<F, Fut> Task for TaskFn<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(self: Box<Self>, ctx: CancellationToken) -> BoxTaskFuture {
        Box::pin((self.f)(ctx))
    }
}
