//! # Event subscribers.
//!
//! Runtime [`Event`](crate::events::Event)s published on the supervisor's bus are fanned
//! out to [`Subscribe`] implementors through a [`SubscriberSet`].
//!
//! ```text
//!   run_unit / Supervisor ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                                    ┌────────┼────────┐
//!                                                                    ▼        ▼        ▼
//!                                                                LogWriter  metrics  custom
//! ```
//!
//! ## Implementing a subscriber
//! ```no_run
//! use async_trait::async_trait;
//! use spinbridge::{Event, EventKind, Subscribe};
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::TaskFailed {
//!             // bump a counter
//!         }
//!     }
//!     fn name(&self) -> &'static str { "failure-counter" }
//! }
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod embedded;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
