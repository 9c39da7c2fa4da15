use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of joints in a UR-series manipulator.
pub const JOINT_COUNT: usize = 6;

/// A point in 3-D space (metres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion in `geometry_msgs` field order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub const fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Cartesian pose: position plus orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3,
    pub orientation: Quaternion,
}

impl Pose {
    pub const fn new(position: Point3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Return a copy of this pose translated by `(dx, dy, dz)`.  The
    /// orientation is left untouched.
    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            position: Point3::new(
                self.position.x + dx,
                self.position.y + dy,
                self.position.z + dz,
            ),
            orientation: self.orientation,
        }
    }
}

/// A full joint-space configuration of the arm (radians, base to wrist 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointConfiguration(pub [f64; JOINT_COUNT]);

impl JointConfiguration {
    pub fn positions(&self) -> &[f64; JOINT_COUNT] {
        &self.0
    }

    /// Return a copy with joint `index` replaced by `value`.  Out-of-range
    /// indices leave the configuration unchanged.
    pub fn with_joint(mut self, index: usize, value: f64) -> Self {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
        self
    }
}

/// What a single planning request aims for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target")]
pub enum MotionTarget {
    Joints(JointConfiguration),
    Pose(Pose),
}

/// Velocity and acceleration scaling factors applied to the next plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityScaling {
    pub velocity: f64,
    pub acceleration: f64,
}

impl VelocityScaling {
    /// Same factor for velocity and acceleration.
    pub const fn uniform(factor: f64) -> Self {
        Self {
            velocity: factor,
            acceleration: factor,
        }
    }
}

/// Geometric primitive used for collision objects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SolidPrimitive {
    Cylinder { height: f64, radius: f64 },
    Box { x: f64, y: f64, z: f64 },
}

/// A collision object added to the planning scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionObject {
    pub id: String,
    /// Frame the primitive pose is expressed in.
    pub frame_id: String,
    pub primitive: SolidPrimitive,
    pub pose: Pose,
}

/// A collision object rigidly attached to a robot link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAttachment {
    pub object: CollisionObject,
    /// Link the object is attached to.
    pub link: String,
    /// Links allowed to touch the object without counting as a collision.
    pub touch_links: Vec<String>,
}

/// Orientation path constraint applied to every subsequent plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationConstraint {
    pub link_name: String,
    pub frame_id: String,
    pub orientation: Quaternion,
    /// Absolute x/y/z axis tolerances (radians).
    pub absolute_tolerance: [f64; 3],
    pub weight: f64,
}

/// A single gripper goal: aperture, effort and speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GripperGoal {
    /// Finger aperture in metres.
    pub position: f32,
    pub max_effort: f32,
    /// Finger speed in m/s.
    pub max_speed: f32,
}

impl GripperGoal {
    /// Aperture used when opening, independent of the sensed fruit width.
    pub const OPEN_APERTURE: f32 = 0.060;
    pub const OPEN_EFFORT: f32 = 140.0;
    pub const CLOSE_EFFORT: f32 = 40.0;
    pub const SPEED: f32 = 0.05;

    pub const fn open() -> Self {
        Self {
            position: Self::OPEN_APERTURE,
            max_effort: Self::OPEN_EFFORT,
            max_speed: Self::SPEED,
        }
    }

    /// Close onto a fruit of the given width.
    pub const fn close(fruit_width: f32) -> Self {
        Self {
            position: fruit_width,
            max_effort: Self::CLOSE_EFFORT,
            max_speed: Self::SPEED,
        }
    }
}

/// Inbound perception data as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PerceptionMessage {
    /// `/target_position`: only the position is meaningful.
    TargetPose(Pose),
    /// `/fruit_width` in metres.
    FruitWidth(f32),
    /// `/distance_to_fruit` in metres.
    DistanceToFruit(f32),
}

/// Operator-feedback markers published while the choreography runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkerEvent {
    DeleteAll,
    Text { pose: Pose, text: String },
    /// Joint-space waypoints of the most recent plan.
    TrajectoryLine { points: Vec<JointConfiguration> },
    AxisLabeled { pose: Pose, label: String },
    /// Flush all queued markers to the display.
    Trigger,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "harvest-middleware::rosbridge/fruit_width"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Perception(PerceptionMessage),
    Marker(MarkerEvent),
    /// The orchestrator entered a new phase of the choreography.
    PhaseChanged { cycle: u64, phase: String },
    Fault { component: String, message: String },
}

/// Global error type spanning planning, actuation, transport and
/// configuration failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HarvestError {
    #[error("Planning failed during {phase}: {details}")]
    Planning { phase: String, details: String },

    #[error("Execution failed during {phase}: {details}")]
    Execution { phase: String, details: String },

    #[error("Gripper Fault on {component}: {details}")]
    Gripper { component: String, details: String },

    #[error("{operation} timed out after {seconds:.1}s")]
    Timeout { operation: String, seconds: f64 },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}
