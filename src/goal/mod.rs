//! # Goal merging: feedback stream + terminal result as one sequence.
//!
//! A [`GoalStream`] submits one goal and presents everything that happens to it as a
//! single ordered, lazy sequence of [`MergedEvent`]s that ends with exactly one
//! [`MergedEvent::Result`] or with a [`GoalError`](crate::GoalError).
//!
//! ## Lifecycle
//! ```text
//! Pending ──► Rejected                       (GoalError::Rejected, no events)
//!    │
//!    └──► Accepted ──► Active ─┬─► Feedback(f) ... (loop)
//!                              ├─► Result(r) ──► Succeeded | Failed | Canceled
//!                              └─► error     ──► Failed   (GoalError::ExecutionFailed)
//! ```
//!
//! ## Rules
//! - The goal is submitted on the first poll, not when the stream is built.
//! - When the result and a feedback item are ready in the same poll, the result wins and
//!   the stream ends. Feedback still buffered at that point is discarded.
//! - After the terminal element the stream yields `None` forever.
//! - Dropping an active stream requests cancellation and unregisters the feedback callback.

mod event;
mod merger;
mod state;

pub use event::MergedEvent;
pub use merger::GoalStream;
pub use state::GoalState;
