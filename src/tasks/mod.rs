//! # Units of work run by the supervisor.
//!
//! - [`Task`] - trait for a named, cancelable, run-once unit
//! - [`TaskFn`] - closure-backed implementation (the usual way to wrap consumer logic)
//! - [`TaskRef`] - owned handle (`Box<dyn Task>`)
//!
//! The [`Pump`](crate::Pump) is itself a [`Task`].

mod task;
mod task_fn;

pub use task::{BoxTaskFuture, Task, TaskRef};
pub use task_fn::TaskFn;
