//! Background subscription service.
//!
//! [`spin`] drains the [`Topic::Perception`] lane of the event bus into a
//! [`PerceptionListener`], one message at a time, until the bus closes or
//! the cancellation token fires.

use harvest_middleware::{EventBus, Topic, TopicReceiver};
use harvest_types::EventPayload;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::listener::PerceptionListener;

/// Feed every perception event from `receiver` into `listener`.
///
/// Returns the number of messages handled.  A lagging receiver only logs a
/// warning: with latest-value semantics the dropped samples are stale anyway.
pub async fn spin(
    listener: PerceptionListener,
    mut receiver: TopicReceiver,
    cancel: CancellationToken,
) -> u64 {
    let topic = receiver.topic();
    let mut handled = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(event) => {
                    if let EventPayload::Perception(message) = event.payload {
                        listener.handle(message);
                        handled += 1;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(?topic, lagged_by = n, "perception spin lagged; older samples skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!(handled, "perception spin stopped");
    handled
}

impl PerceptionListener {
    /// Subscribe to `bus` now and spawn [`spin`] on the current Tokio runtime.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn attach(&self, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<u64> {
        let receiver = bus.subscribe_to(Topic::Perception);
        tokio::spawn(spin(self.clone(), receiver, cancel))
    }
}
