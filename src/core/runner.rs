//! # Run one supervised unit.
//!
//! [`run_unit`] starts a [`Task`](crate::Task), catches panics and publishes lifecycle events to the [`Bus`].
//!
//! ## Event flow
//! ```text
//! publish TaskStarting
//! task.spawn(child) ──► Ok(())             ──► publish TaskStopped ──► Ok
//!                   ──► Err(Canceled)      ──► publish TaskStopped ──► Ok (graceful)
//!                   ──► Err(e)             ──► publish TaskFailed  ──► Err(RuntimeError)
//!                   ──► panic              ──► publish TaskPanicked ──► Err(Panicked)
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event per unit.
//! - `Canceled` is a graceful exit, never a failure.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::TaskRef;

/// How one unit ended.
pub(crate) struct UnitExit {
    pub name: Arc<str>,
    pub outcome: Result<(), RuntimeError>,
}

/// Runs `task` to completion under `ctx`.
pub(crate) async fn run_unit(task: TaskRef, ctx: CancellationToken, bus: Bus) -> UnitExit {
    let name: Arc<str> = Arc::from(task.name());
    bus.publish(Event::new(EventKind::TaskStarting).with_task(Arc::clone(&name)));
    tracing::debug!(task = %name, "unit starting");

    let res = match std::panic::catch_unwind(AssertUnwindSafe(|| task.spawn(ctx))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    let outcome = match res {
        Ok(Ok(())) | Ok(Err(TaskError::Canceled)) => {
            bus.publish(Event::new(EventKind::TaskStopped).with_task(Arc::clone(&name)));
            tracing::debug!(task = %name, "unit stopped");
            Ok(())
        }
        Ok(Err(err)) => {
            bus.publish(
                Event::new(EventKind::TaskFailed)
                    .with_task(Arc::clone(&name))
                    .with_reason(err.to_string()),
            );
            tracing::warn!(task = %name, label = err.as_label(), error = %err, "unit failed");
            Err(RuntimeError::from_task(&name, err))
        }
        Err(panic) => {
            let info = panic_message(&*panic);
            bus.publish(
                Event::new(EventKind::TaskPanicked)
                    .with_task(Arc::clone(&name))
                    .with_reason(info.clone()),
            );
            tracing::error!(task = %name, %info, "unit panicked");
            Err(RuntimeError::Panicked {
                task: name.to_string(),
                info,
            })
        }
    };

    UnitExit { name, outcome }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;

    async fn kinds(rx: &mut tokio::sync::broadcast::Receiver<Event>, n: usize) -> Vec<EventKind> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(rx.recv().await.unwrap().kind);
        }
        out
    }

    #[tokio::test]
    async fn canceled_unit_counts_as_stopped() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let token = CancellationToken::new();
        token.cancel();
        let task = TaskFn::boxed("waiter", |ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err(TaskError::Canceled)
        });

        let exit = run_unit(task, token, bus).await;
        assert_eq!(&*exit.name, "waiter");
        assert!(exit.outcome.is_ok());
        assert_eq!(kinds(&mut rx, 2).await, vec![EventKind::TaskStarting, EventKind::TaskStopped]);
    }

    #[tokio::test]
    async fn failure_is_mapped_and_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let task = TaskFn::boxed("main", |_ctx: CancellationToken| async {
            Err(TaskError::fail("sensor offline"))
        });

        let exit = run_unit(task, CancellationToken::new(), bus).await;
        let err = exit.outcome.unwrap_err();
        assert_eq!(err.as_label(), "runtime_consumer_failed");
        assert_eq!(kinds(&mut rx, 2).await, vec![EventKind::TaskStarting, EventKind::TaskFailed]);
    }

    #[tokio::test]
    async fn panic_is_caught() {
        let bus = Bus::new(16);
        let task = TaskFn::boxed("boom", |_ctx: CancellationToken| async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let exit = run_unit(task, CancellationToken::new(), bus).await;
        match exit.outcome {
            Err(RuntimeError::Panicked { task, info }) => {
                assert_eq!(task, "boom");
                assert_eq!(info, "kaboom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
