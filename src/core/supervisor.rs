//! # Supervisor: runs the pump beside consumer logic and surfaces the first failure.
//!
//! Running two concurrent units and returning when the *first one finishes* hides a
//! failure in the other. The [`Supervisor`] instead waits for the **first failure**:
//!
//! ```text
//! run(units)
//!   ├─ spawn listener: Bus ──► SubscriberSet
//!   ├─ spawn run_unit(u, runtime_token.child_token())  for each unit
//!   └─ loop select! {
//!        join_next():
//!          ├─ Ok(())  ──► all joined?           ──► Ok(())
//!          │             cancel_on_first_exit?  ──► cancel all, join within grace
//!          └─ Err(e)  ──► publish RunAborted
//!                         cancel all, join within grace (overrun only logged)
//!                         ──► Err(e)                         (first failure wins)
//!        OS signal:
//!          └─ publish ShutdownRequested
//!             cancel all, join within grace
//!               ├─ all joined ──► publish AllStoppedWithin ──► Ok / first failure
//!               └─ timeout    ──► publish GraceExceeded    ──► Err(GraceExceeded)
//!      }
//! ```
//!
//! ## Rules
//! - Exactly one error is returned per run: the first failure observed.
//! - `TaskError::Canceled` is a graceful stop, never a failure.
//! - Units still running when `run` returns are aborted.
//! - With `grace = 0` canceled units are aborted at once and never reported as stuck.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use spinbridge::{Supervisor, SupervisorConfig, TaskError, TaskFn, TaskRef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let cfg = SupervisorConfig { handle_signals: false, ..SupervisorConfig::default() };
//!     let sup = Supervisor::builder(cfg).build();
//!
//!     let ok: TaskRef = TaskFn::boxed("ok", |_ctx: CancellationToken| async { Ok(()) });
//!     let bad: TaskRef = TaskFn::boxed("bad", |_ctx: CancellationToken| async {
//!         Err(TaskError::fail("sensor offline"))
//!     });
//!
//!     let err = sup.run(vec![ok, bad]).await.unwrap_err();
//!     assert_eq!(err.task(), Some("bad"));
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::core::runner::{run_unit, UnitExit};
use crate::core::{shutdown, Pump, SupervisorBuilder, SupervisorConfig};
use crate::error::{RuntimeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::middleware::Middleware;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{TaskFn, TaskRef};

/// Outcome of joining canceled units.
struct WindDown {
    /// First failure observed while joining.
    failure: Option<RuntimeError>,
    /// Units that did not stop within grace (`None` when all stopped).
    stuck: Option<Vec<String>>,
}

/// First-failure supervisor for a fixed set of units.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl Supervisor {
    /// Starts building a supervisor.
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        bus: Bus,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            subscribers,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Event bus the supervisor publishes on. Receivers see events sent after subscribing.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runs `units` concurrently until all complete, one fails, or shutdown is requested.
    ///
    /// Subscribers have seen every event of the run by the time this returns.
    pub async fn run(&self, units: Vec<TaskRef>) -> Result<(), RuntimeError> {
        let listener_stop = CancellationToken::new();
        let listener = self.subscriber_listener(listener_stop.clone());

        let token = CancellationToken::new();
        let mut set = JoinSet::new();
        let mut remaining: Vec<Arc<str>> = Vec::with_capacity(units.len());
        for unit in units {
            remaining.push(Arc::from(unit.name()));
            set.spawn(run_unit(unit, token.child_token(), self.bus.clone()));
        }

        let res = self.drive(&mut set, &token, &mut remaining).await;
        set.abort_all();

        listener_stop.cancel();
        if let Err(err) = listener.await {
            tracing::warn!(error = %err, "event listener ended abnormally");
        }
        res
    }

    async fn drive(
        &self,
        set: &mut JoinSet<UnitExit>,
        token: &CancellationToken,
        remaining: &mut Vec<Arc<str>>,
    ) -> Result<(), RuntimeError> {
        let signal = shutdown::requested(self.cfg.handle_signals);
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;
                joined = set.join_next() => {
                    let Some(joined) = joined else {
                        tracing::debug!("all units completed");
                        return Ok(());
                    };
                    let exit = unit_exit(joined);
                    forget(remaining, &exit.name);

                    match exit.outcome {
                        Ok(()) if self.cfg.cancel_on_first_exit => {
                            tracing::debug!(task = %exit.name, "unit completed; stopping the rest");
                            token.cancel();
                            return self.conclude(self.join_within_grace(set, remaining).await);
                        }
                        Ok(()) => {}
                        Err(err) => {
                            self.bus.publish(
                                Event::new(EventKind::RunAborted)
                                    .with_task(Arc::clone(&exit.name))
                                    .with_reason(err.to_string()),
                            );
                            tracing::error!(task = %exit.name, error = %err, "run aborted by first failure");
                            token.cancel();

                            let wind = self.join_within_grace(set, remaining).await;
                            if let Some(later) = wind.failure {
                                tracing::warn!(error = %later, "further failure during wind-down");
                            }
                            if let Some(stuck) = wind.stuck {
                                tracing::warn!(?stuck, "units outlived grace after failure");
                            }
                            return Err(err);
                        }
                    }
                }
                _ = &mut signal => {
                    self.bus.publish(Event::new(EventKind::ShutdownRequested));
                    tracing::info!("shutdown requested");
                    token.cancel();
                    return self.conclude(self.join_within_grace(set, remaining).await);
                }
            }
        }
    }

    /// Result of a wind-down that was not caused by a failure.
    fn conclude(&self, wind: WindDown) -> Result<(), RuntimeError> {
        if let Some(stuck) = wind.stuck {
            return Err(RuntimeError::GraceExceeded {
                grace: self.cfg.grace,
                stuck,
            });
        }
        match wind.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Joins every remaining unit within the configured grace period.
    async fn join_within_grace(
        &self,
        set: &mut JoinSet<UnitExit>,
        remaining: &mut Vec<Arc<str>>,
    ) -> WindDown {
        let grace = self.cfg.grace;
        if grace.is_zero() {
            return self.abort_remaining(set, remaining).await;
        }
        let mut failure = None;

        let joined = tokio::time::timeout(grace, async {
            while let Some(joined) = set.join_next().await {
                let exit = unit_exit(joined);
                forget(remaining, &exit.name);
                if let Err(err) = exit.outcome {
                    failure.get_or_insert(err);
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                self.bus
                    .publish(Event::new(EventKind::AllStoppedWithin).with_grace(grace));
                WindDown {
                    failure,
                    stuck: None,
                }
            }
            Err(_elapsed) => {
                set.abort_all();
                let stuck: Vec<String> = remaining.iter().map(|n| n.to_string()).collect();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_grace(grace)
                        .with_reason(stuck.join(", ")),
                );
                tracing::error!(grace_ms = grace.as_millis() as u64, ?stuck, "grace exceeded");
                WindDown {
                    failure,
                    stuck: Some(stuck),
                }
            }
        }
    }

    /// Aborts every remaining unit at its current await point.
    ///
    /// Units that finished before the abort keep their outcome. Aborted units are
    /// reported as stopped, never as stuck.
    async fn abort_remaining(
        &self,
        set: &mut JoinSet<UnitExit>,
        remaining: &mut Vec<Arc<str>>,
    ) -> WindDown {
        set.abort_all();
        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            if matches!(&joined, Err(err) if err.is_cancelled()) {
                continue;
            }
            let exit = unit_exit(joined);
            forget(remaining, &exit.name);
            if let Err(err) = exit.outcome {
                failure.get_or_insert(err);
            }
        }

        for name in remaining.drain(..) {
            tracing::debug!(task = %name, "unit aborted");
            self.bus.publish(
                Event::new(EventKind::TaskStopped)
                    .with_task(name)
                    .with_reason("aborted"),
            );
        }
        self.bus
            .publish(Event::new(EventKind::AllStoppedWithin).with_grace(Duration::ZERO));
        WindDown {
            failure,
            stuck: None,
        }
    }

    /// Forwards bus events to the subscriber set until `stop` fires, then drains.
    fn subscriber_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.bus.clone());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        })
    }
}

fn unit_exit(joined: Result<UnitExit, JoinError>) -> UnitExit {
    joined.unwrap_or_else(|err| UnitExit {
        name: Arc::from("<unknown>"),
        outcome: Err(RuntimeError::Panicked {
            task: "<unknown>".to_string(),
            info: err.to_string(),
        }),
    })
}

fn forget(remaining: &mut Vec<Arc<str>>, name: &str) {
    if let Some(pos) = remaining.iter().position(|n| &**n == name) {
        remaining.swap_remove(pos);
    }
}

/// Runs `pump` beside `main` and returns the first failure of either.
///
/// Uses a default supervisor with `cancel_on_first_exit` and a zero grace period: as soon
/// as either side finishes or fails, the other is aborted at its current await point.
/// `main` does not need to watch its token; a consumer blocked in `Bridge::next` is
/// dropped there.
///
/// ```no_run
/// # #[cfg(feature = "loopback")]
/// # async fn demo() -> Result<(), spinbridge::RuntimeError> {
/// use spinbridge::{LoopbackMiddleware, PumpConfig, Session};
///
/// let session = Session::new("demo", LoopbackMiddleware::new());
/// let pump = session.pump(PumpConfig::default());
/// spinbridge::run(pump, move |_ctx| async move {
///     let mut odom = session.subscribe::<f64>("/odom", 10)?;
///     while let Some(x) = odom.next().await {
///         if x > 1.0 {
///             break;
///         }
///     }
///     Ok(())
/// })
/// .await
/// # }
/// ```
pub async fn run<M, F, Fut>(pump: Pump<M>, main: F) -> Result<(), RuntimeError>
where
    M: Middleware,
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    let cfg = SupervisorConfig {
        grace: Duration::ZERO,
        cancel_on_first_exit: true,
        ..SupervisorConfig::default()
    };
    let pump: TaskRef = Box::new(pump);
    Supervisor::builder(cfg)
        .build()
        .run(vec![pump, TaskFn::boxed("main", main)])
        .await
}
