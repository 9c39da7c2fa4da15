//! Generic `Gripper` trait for parallel-jaw end effectors.

use async_trait::async_trait;
use harvest_types::{GripperGoal, HarvestError};

/// How a gripper command that ran to completion ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GripperOutcome {
    Succeeded,
    /// The driver answered but reported failure (non-zero exit status,
    /// rejected goal, …).
    Failed {
        exit_code: Option<i32>,
        details: String,
    },
}

impl GripperOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GripperOutcome::Succeeded)
    }
}

/// A gripper that accepts aperture/effort/speed goals.
///
/// [`open`][Gripper::open] and [`close`][Gripper::close] are provided on top
/// of [`command`][Gripper::command]; drivers only implement the latter.
#[async_trait]
pub trait Gripper: Send + Sync {
    /// Stable identifier, used in logs and errors.
    fn id(&self) -> &str;

    /// Send a single goal and wait for the result.
    ///
    /// # Errors
    ///
    /// * [`HarvestError::Timeout`] – no answer within the driver's bound.
    /// * [`HarvestError::Gripper`] – the driver could not be reached at all.
    async fn command(&self, goal: GripperGoal) -> Result<GripperOutcome, HarvestError>;

    /// Open to the fixed release aperture.
    async fn open(&self) -> Result<GripperOutcome, HarvestError> {
        self.command(GripperGoal::open()).await
    }

    /// Close onto a fruit of `fruit_width` metres.
    async fn close(&self, fruit_width: f32) -> Result<GripperOutcome, HarvestError> {
        self.command(GripperGoal::close(fruit_width)).await
    }
}
