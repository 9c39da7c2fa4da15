//! Operator feedback: display markers and the "press next" prompt.
//!
//! Markers are fire-and-forget.  [`BusVisualizer`] puts them on the
//! [`Topic::Markers`] lane of the event bus, from where the rosbridge client
//! forwards them to the display.  Nobody listening is not an error.

use async_trait::async_trait;
use harvest_middleware::{EventBus, Topic};
use harvest_types::{Event, EventPayload, HarvestError, MarkerEvent, Point3, Pose, Quaternion};
use tracing::{debug, info};

use crate::move_group::Plan;

/// Where text labels are anchored: half a metre above the world origin.
pub const TEXT_POSE: Pose = Pose::new(Point3::new(0.0, 0.0, 0.5), Quaternion::identity());

/// Sink for operator-feedback markers.
pub trait Visualizer: Send + Sync {
    fn publish(&self, marker: MarkerEvent);

    fn delete_all_markers(&self) {
        self.publish(MarkerEvent::DeleteAll);
    }

    fn publish_text(&self, text: &str) {
        self.publish(MarkerEvent::Text {
            pose: TEXT_POSE,
            text: text.to_string(),
        });
    }

    fn publish_trajectory_line(&self, plan: &Plan) {
        self.publish(MarkerEvent::TrajectoryLine {
            points: plan.trajectory.clone(),
        });
    }

    fn publish_axis_labeled(&self, pose: &Pose, label: &str) {
        self.publish(MarkerEvent::AxisLabeled {
            pose: *pose,
            label: label.to_string(),
        });
    }

    fn trigger(&self) {
        self.publish(MarkerEvent::Trigger);
    }
}

/// Publishes markers on the event bus.
#[derive(Debug, Clone)]
pub struct BusVisualizer {
    bus: EventBus,
    source: String,
}

impl BusVisualizer {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            source: "harvest-hal::visualizer".to_string(),
        }
    }
}

impl Visualizer for BusVisualizer {
    fn publish(&self, marker: MarkerEvent) {
        let event = Event::new(self.source.clone(), EventPayload::Marker(marker));
        if let Err(e) = self.bus.publish_to(Topic::Markers, event) {
            debug!(error = %e, "marker dropped");
        }
    }
}

/// Blocks the loop until the operator lets it continue.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Show `message` and wait.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Cancelled`] when the operator aborts instead
    /// of continuing.
    async fn wait_for_next(&self, message: &str) -> Result<(), HarvestError>;
}

/// Prompt that never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoContinue;

#[async_trait]
impl OperatorPrompt for AutoContinue {
    async fn wait_for_next(&self, message: &str) -> Result<(), HarvestError> {
        info!(prompt = message, "auto-continue");
        Ok(())
    }
}
