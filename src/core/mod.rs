//! Runtime core: the dispatch pump and the supervisor that runs it beside consumer logic.
//!
//! Internal modules:
//! - [`pump`]: cooperative dispatch loop over a [`Session`](crate::Session);
//! - [`runner`]: runs one unit, catches panics, publishes lifecycle events;
//! - [`supervisor`]: first-failure supervision, shutdown and grace handling;
//! - [`builder`]: supervisor construction;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`config`]: [`SupervisorConfig`] and [`PumpConfig`].

mod builder;
mod config;
mod pump;
mod runner;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{PumpConfig, SupervisorConfig};
pub use pump::{Pump, PumpExit};
pub use supervisor::{run, Supervisor};

pub(crate) use runner::panic_message;
