//! `harvest-perception` – what the arm currently believes about the fruit.
//!
//! # Modules
//!
//! - [`listener`] – [`PerceptionListener`][listener::PerceptionListener]:
//!   thread-safe latest-value store for the target pose, fruit width and
//!   distance to fruit, read by the orchestrator as one consistent
//!   [`PerceptionSnapshot`][listener::PerceptionSnapshot].
//! - [`spin`] – the background task that drains the perception topic of the
//!   event bus into the listener.

pub mod listener;
pub mod spin;

pub use listener::{PerceptionListener, PerceptionSnapshot, TARGET_ORIENTATION};
pub use spin::spin;
