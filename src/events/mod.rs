//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to publish and
//! observe what the supervisor does with its units of work.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor`, `runner::run_unit`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor's listener, which fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
