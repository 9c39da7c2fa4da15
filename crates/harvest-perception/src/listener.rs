//! Latest-value perception store.
//!
//! Three independent feeds update the store: the target position, the fruit
//! width and the distance to the fruit.  Every update overwrites the previous
//! value; no history is kept and nothing is validated (NaN, zero and
//! out-of-range values are stored as received).
//!
//! The target orientation is never sensed.  Every position update replaces
//! the stored orientation with [`TARGET_ORIENTATION`], whatever orientation
//! the incoming message carried.
//!
//! All fields live behind one [`RwLock`], so a [`PerceptionSnapshot`] is
//! always read from a single instant and can never mix a half-written pose
//! with a later width.
//!
//! # Example
//!
//! ```rust
//! use harvest_perception::listener::{PerceptionListener, TARGET_ORIENTATION};
//! use harvest_types::Point3;
//!
//! let listener = PerceptionListener::new();
//! listener.on_target_position(Point3::new(0.3, 0.4, 0.5));
//! listener.on_fruit_width(0.045);
//!
//! let snapshot = listener.snapshot();
//! assert_eq!(snapshot.target_pose.orientation, TARGET_ORIENTATION);
//! assert!((snapshot.fruit_width - 0.045).abs() < f32::EPSILON);
//! ```

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use harvest_types::{PerceptionMessage, Point3, Pose, Quaternion};
use tracing::trace;

/// Fixed grasp orientation applied to every perceived target.
pub const TARGET_ORIENTATION: Quaternion = Quaternion::new(-0.707, -0.005, 0.006, 0.707);

/// A consistent copy of everything the listener knows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerceptionSnapshot {
    /// Latest target position with [`TARGET_ORIENTATION`], or the default
    /// pose (origin, identity) before the first message.
    pub target_pose: Pose,
    /// Latest fruit width in metres, `0.0` before the first message.
    pub fruit_width: f32,
    /// Latest distance to the fruit in metres, `0.0` before the first message.
    pub distance_to_fruit: f32,
    pub target_received_at: Option<Instant>,
    pub fruit_width_received_at: Option<Instant>,
    pub distance_received_at: Option<Instant>,
}

impl PerceptionSnapshot {
    /// `true` once at least one target position has arrived.
    pub fn has_target(&self) -> bool {
        self.target_received_at.is_some()
    }

    /// `true` once at least one fruit width has arrived.
    pub fn has_fruit_width(&self) -> bool {
        self.fruit_width_received_at.is_some()
    }
}

/// Shared, cloneable handle to the perception store.
///
/// Clones share the same underlying state, so one clone can live in the spin
/// task while another is read by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct PerceptionListener {
    state: Arc<RwLock<PerceptionSnapshot>>,
}

impl PerceptionListener {
    /// Create an empty store with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new target position and reset the orientation to
    /// [`TARGET_ORIENTATION`].
    pub fn on_target_position(&self, position: Point3) {
        trace!(x = position.x, y = position.y, z = position.z, "target position");
        self.write(|s| {
            s.target_pose = Pose::new(position, TARGET_ORIENTATION);
            s.target_received_at = Some(Instant::now());
        });
    }

    /// Store a full pose message.  Only its position is used.
    pub fn on_target_pose(&self, pose: Pose) {
        self.on_target_position(pose.position);
    }

    pub fn on_fruit_width(&self, width: f32) {
        trace!(width, "fruit width");
        self.write(|s| {
            s.fruit_width = width;
            s.fruit_width_received_at = Some(Instant::now());
        });
    }

    pub fn on_distance_to_fruit(&self, distance: f32) {
        trace!(distance, "distance to fruit");
        self.write(|s| {
            s.distance_to_fruit = distance;
            s.distance_received_at = Some(Instant::now());
        });
    }

    /// Dispatch a transport message to the matching handler.
    pub fn handle(&self, message: PerceptionMessage) {
        match message {
            PerceptionMessage::TargetPose(pose) => self.on_target_pose(pose),
            PerceptionMessage::FruitWidth(width) => self.on_fruit_width(width),
            PerceptionMessage::DistanceToFruit(distance) => self.on_distance_to_fruit(distance),
        }
    }

    pub fn target_pose(&self) -> Pose {
        self.snapshot().target_pose
    }

    pub fn fruit_width(&self) -> f32 {
        self.snapshot().fruit_width
    }

    pub fn distance_to_fruit(&self) -> f32 {
        self.snapshot().distance_to_fruit
    }

    /// Read all fields under a single lock acquisition.
    pub fn snapshot(&self) -> PerceptionSnapshot {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    // A panicking writer cannot leave a field half-assigned (every update is
    // a plain copy), so a poisoned lock is still safe to reuse.
    fn write(&self, update: impl FnOnce(&mut PerceptionSnapshot)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut guard);
    }
}
