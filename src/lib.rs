//! # spinbridge
//!
//! **spinbridge** adapts a callback-driven middleware client (pub/sub topics plus
//! goal/feedback/result actions, as found in robotics middleware) to sequential async
//! consumption on tokio, without losing messages, without blocking dispatch, and without
//! swallowing failures.
//!
//! ## Architecture
//! ```text
//!             ┌──────────────────────────────────────────────────────────┐
//!             │ Supervisor (first-failure, grace, OS signals, Bus)       │
//!             └──────┬───────────────────────────────────┬───────────────┘
//!                    ▼                                   ▼
//!          ┌───────────────────┐               ┌───────────────────────┐
//!          │ Pump (Task "pump")│               │ consumer (TaskFn)     │
//!          │ loop {            │               │  bridge.next().await  │
//!          │   dispatch_pending│               │  goal.next().await    │
//!          │   sleep / yield   │               └──────────▲────────────┘
//!          │ }                 │                          │ pull
//!          └────────┬──────────┘                          │
//!                   ▼ callbacks                           │
//!          ┌───────────────────┐  push   ┌────────────────┴────────────┐
//!          │ Middleware        │ ──────► │ Bridge<T>   (FIFO, unbounded)│
//!          │ (Session<M>)      │ ──────► │ GoalStream  (feedback+result)│
//!          └───────────────────┘         └─────────────────────────────┘
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                         |
//! |-------------------|-----------------------------------------------------------------|--------------------------------------------|
//! | **Middleware**    | Boundary to the external client library.                        | [`Middleware`], [`Action`], [`Subscription`] |
//! | **Session**       | Explicit handle with init/teardown liveness flag.               | [`Session`]                                |
//! | **Pump**          | Cooperative dispatch loop, one step per tick.                   | [`Pump`], [`PumpConfig`]                   |
//! | **Bridges**       | Callback → ordered async sequence.                              | [`Bridge`]                                 |
//! | **Goals**         | Feedback + result merged into one lazy stream.                  | [`GoalStream`], [`MergedEvent`]            |
//! | **Supervision**   | Run the pump beside consumer logic, return the first failure.   | [`Supervisor`], [`run`]                    |
//! | **Subscriber API**| Observe unit lifecycle events.                                  | [`Subscribe`], [`Event`]                   |
//! | **Errors**        | Typed errors per layer.                                         | [`GoalError`], [`TaskError`], [`RuntimeError`] |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a subscriber rendering events through `tracing`.
//! - `loopback`: exports [`LoopbackMiddleware`], an in-memory middleware for tests and demos.
//!
//! ## Example
//! ```rust
//! # #[cfg(feature = "loopback")]
//! # mod demo {
//! use spinbridge::{LoopbackMiddleware, PumpConfig, Session};
//!
//! #[tokio::main(flavor = "current_thread")]
//! pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mw = LoopbackMiddleware::new();
//!     let session = Session::new("listener", mw.clone());
//!     let mut chatter = session.subscribe::<String>("/chatter", 10)?;
//!     mw.publish("/chatter", "hello".to_string());
//!
//!     let pump = session.pump(PumpConfig::default());
//!     spinbridge::run(pump, move |_ctx| async move {
//!         let msg = chatter.next().await;
//!         assert_eq!(msg.as_deref(), Some("hello"));
//!         Ok(())
//!     })
//!     .await?;
//!     Ok(())
//! }
//! # }
//! # fn main() {
//! #     #[cfg(feature = "loopback")]
//! #     demo::main().unwrap();
//! # }
//! ```

mod bridge;
mod core;
mod error;
mod events;
mod goal;
mod middleware;
mod session;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use crate::core::{run, Pump, PumpConfig, PumpExit, Supervisor, SupervisorBuilder, SupervisorConfig};
pub use bridge::Bridge;
pub use error::{GoalError, MiddlewareError, RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use goal::{GoalState, GoalStream, MergedEvent};
pub use middleware::{
    Acceptance, Action, Callback, GoalId, GoalResponse, GoalResult, GoalStatus, Middleware,
    ResultSlot, ResultWriter, Subscription,
};
pub use session::Session;
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{BoxTaskFuture, Task, TaskFn, TaskRef};

// In-memory middleware for tests and demos.
// Enable with: `--features loopback`
#[cfg(feature = "loopback")]
pub use middleware::loopback::{GoalInbox, IncomingGoal, LoopbackMiddleware, ServerGoal};

// Built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
