//! # Single-assignment result cell.
//!
//! [`ResultWriter`] is handed to the middleware's completion path, [`ResultSlot`] to the
//! goal stream. The writer is consumed by the write, so the slot is assigned at most once.
//! A writer dropped without writing resolves the slot with a [`MiddlewareError`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::MiddlewareError;
use crate::middleware::{GoalResult, GoalStatus};

type Delivery<R> = Result<GoalResult<R>, MiddlewareError>;

/// Awaitable side of a goal's terminal result.
#[derive(Debug)]
pub struct ResultSlot<R> {
    rx: oneshot::Receiver<Delivery<R>>,
}

/// Write side of a goal's terminal result.
#[derive(Debug)]
pub struct ResultWriter<R> {
    tx: oneshot::Sender<Delivery<R>>,
}

impl<R> ResultSlot<R> {
    /// Creates a connected writer/slot pair.
    pub fn channel() -> (ResultWriter<R>, ResultSlot<R>) {
        let (tx, rx) = oneshot::channel();
        (ResultWriter { tx }, ResultSlot { rx })
    }
}

impl<R> ResultWriter<R> {
    /// Stores the terminal outcome. Returns `false` if the slot was already dropped.
    pub fn complete(self, outcome: Result<GoalResult<R>, MiddlewareError>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    pub fn succeed(self, value: R) -> bool {
        self.finish(GoalStatus::Succeeded, value)
    }

    pub fn finish(self, status: GoalStatus, value: R) -> bool {
        self.complete(Ok(GoalResult { status, value }))
    }

    /// True once the slot side has been dropped (nobody awaits the result anymore).
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<R> Future for ResultSlot<R> {
    type Output = Result<GoalResult<R>, MiddlewareError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(MiddlewareError::new(
                "goal result was never delivered",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
