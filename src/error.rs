//! Error types used by the spinbridge runtime, bridges and goal streams.
//!
//! This module defines four enums/structs, one per layer:
//!
//! - [`MiddlewareError`]: reported by the external middleware (dispatch, subscribe, submit).
//! - [`GoalError`]: raised by a [`GoalStream`](crate::GoalStream) (rejection, execution failure).
//! - [`TaskError`]: returned by supervised units of work (the pump and consumer logic).
//! - [`RuntimeError`]: returned by the [`Supervisor`](crate::Supervisor) to the caller of the program.
//!
//! All of them provide `as_label` for logs/metrics. None of them is recovered locally:
//! bridges and goal streams hand errors to their consumer, and the supervisor hands the
//! first failure to the process boundary.

use std::borrow::Cow;
use std::time::Duration;

use thiserror::Error;

use crate::middleware::GoalId;

/// # Error reported by the middleware collaborator.
///
/// The middleware owns its own error model; at this boundary it is reduced to a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MiddlewareError {
    message: Cow<'static, str>,
}

impl MiddlewareError {
    /// Creates a new middleware error with the given message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// # Errors produced by a goal stream.
///
/// A goal stream yields at most one of these, after which it is exhausted.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GoalError {
    /// The action server did not accept the goal. No events were emitted.
    #[error("goal {goal} rejected by '{server}'")]
    Rejected {
        /// Action server name.
        server: String,
        /// Identifier assigned to the rejected goal.
        goal: GoalId,
    },

    /// Submitting, awaiting acceptance, or awaiting the result failed.
    #[error("goal execution failed: {source}")]
    ExecutionFailed {
        /// The middleware failure that ended the goal.
        source: MiddlewareError,
    },
}

impl GoalError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use spinbridge::{GoalError, GoalId};
    ///
    /// let err = GoalError::Rejected { server: "navigate".into(), goal: GoalId::from_u128(7) };
    /// assert_eq!(err.as_label(), "goal_rejected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            GoalError::Rejected { .. } => "goal_rejected",
            GoalError::ExecutionFailed { .. } => "goal_execution_failed",
        }
    }

    /// Wraps a middleware failure.
    pub(crate) fn execution(source: MiddlewareError) -> Self {
        GoalError::ExecutionFailed { source }
    }
}

/// # Errors returned by supervised units of work.
///
/// Consumer logic returns this type; `?` converts goal and middleware errors into it.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The middleware dispatch step failed (raised by the pump).
    #[error("dispatch failed: {source}")]
    Dispatch {
        /// The failure reported by `dispatch_pending`.
        source: MiddlewareError,
    },

    /// A goal stream consumed by this unit failed.
    #[error(transparent)]
    Goal(#[from] GoalError),

    /// A middleware call made by this unit failed (e.g. subscribe).
    #[error("middleware error: {0}")]
    Middleware(#[from] MiddlewareError),

    /// Application logic failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The unit stopped because its context was cancelled. Treated as a graceful stop.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Builds a [`TaskError::Fail`] from anything printable.
    pub fn fail(error: impl std::fmt::Display) -> Self {
        TaskError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use spinbridge::TaskError;
    ///
    /// assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
    /// assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Dispatch { .. } => "task_dispatch_failed",
            TaskError::Goal(e) => e.as_label(),
            TaskError::Middleware(_) => "task_middleware_error",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }
}

/// # Errors produced by the supervisor runtime.
///
/// Exactly one of these is returned per failed run: the first failure observed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The middleware dispatch step failed inside the pump.
    #[error("dispatch failed in '{task}': {source}")]
    Dispatch {
        /// Name of the unit that drove the dispatch (usually `"pump"`).
        task: String,
        /// The middleware failure.
        source: MiddlewareError,
    },

    /// Consumer logic returned an error.
    #[error("task '{task}' failed: {source}")]
    Consumer {
        /// Name of the failed unit.
        task: String,
        /// The error it returned.
        source: TaskError,
    },

    /// A unit panicked.
    #[error("task '{task}' panicked: {info}")]
    Panicked {
        /// Name of the panicked unit.
        task: String,
        /// Panic payload rendered as text.
        info: String,
    },

    /// Shutdown grace period was exceeded; the listed units were aborted.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Units that did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Maps the error a unit returned into the runtime taxonomy.
    pub(crate) fn from_task(task: &str, err: TaskError) -> Self {
        match err {
            TaskError::Dispatch { source } => RuntimeError::Dispatch {
                task: task.to_string(),
                source,
            },
            other => RuntimeError::Consumer {
                task: task.to_string(),
                source: other,
            },
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use spinbridge::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Dispatch { .. } => "runtime_dispatch_failed",
            RuntimeError::Consumer { .. } => "runtime_consumer_failed",
            RuntimeError::Panicked { .. } => "runtime_task_panicked",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }

    /// Name of the unit the failure came from, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            RuntimeError::Dispatch { task, .. }
            | RuntimeError::Consumer { task, .. }
            | RuntimeError::Panicked { task, .. } => Some(task),
            RuntimeError::GraceExceeded { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_task_error_maps_to_runtime_dispatch() {
        let err = RuntimeError::from_task(
            "pump",
            TaskError::Dispatch {
                source: MiddlewareError::new("rcl_wait failed"),
            },
        );
        assert_eq!(err.as_label(), "runtime_dispatch_failed");
        assert_eq!(err.task(), Some("pump"));
        assert!(err.to_string().contains("rcl_wait failed"));
    }

    #[test]
    fn goal_errors_map_to_consumer_failures() {
        let err = RuntimeError::from_task(
            "main",
            TaskError::from(GoalError::Rejected {
                server: "dock".into(),
                goal: GoalId::from_u128(1),
            }),
        );
        match err {
            RuntimeError::Consumer { task, source } => {
                assert_eq!(task, "main");
                assert_eq!(source.as_label(), "goal_rejected");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
