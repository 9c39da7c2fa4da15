//! `harvest-middleware` – message plumbing.
//!
//! Routes perception data in and operator markers out without caring about
//! what the data means.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`rosbridge`] – WebSocket client for a `rosbridge_server`: subscribes to
//!   the perception topics, feeds them onto the bus, and forwards markers and
//!   phase updates back out.

pub mod bus;
pub mod rosbridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use rosbridge::{RosbridgeClient, RosbridgeTopics};
