//! Generic `MoveGroup` trait for a motion-planning backend.
//!
//! Inverse kinematics, collision-aware planning, joint-limit clamping and
//! trajectory execution all happen on the other side of this trait.  The
//! orchestrator only sets targets and scaling factors, asks for a plan and
//! then asks for the motion to be carried out.

use async_trait::async_trait;
use harvest_types::{
    CollisionObject, HarvestError, JointConfiguration, MotionTarget, OrientationConstraint,
    ToolAttachment, VelocityScaling,
};

/// Result of a successful planning request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Joint-space waypoints from the start state to the goal.
    pub trajectory: Vec<JointConfiguration>,
}

/// A planning group of the arm, e.g. `"ur_manipulator"`.
///
/// Setter methods are synchronous: they only stage state for the next
/// [`plan`][MoveGroup::plan] call.  Everything that talks to the planner or
/// moves the arm is async.
#[async_trait]
pub trait MoveGroup: Send {
    /// Frame every pose target is expressed in.
    fn planning_frame(&self) -> &str;

    /// Link whose pose a [`MotionTarget::Pose`] refers to.
    fn end_effector_link(&self) -> &str;

    fn group_names(&self) -> Vec<String>;

    /// Latest joint state reported by the arm.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Transport`] when no state arrives in time.
    async fn current_joints(&mut self) -> Result<JointConfiguration, HarvestError>;

    /// Stage the goal for the next plan.
    ///
    /// Returns `false` when the target lies outside the joint limits.  The
    /// backend clamps it and the request still proceeds.
    fn set_target(&mut self, target: MotionTarget) -> bool;

    /// Plan from the measured state instead of the end of the last plan.
    fn set_start_state_to_current(&mut self);

    fn set_scaling(&mut self, scaling: VelocityScaling);

    /// Plan towards the staged target.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Planning`] when no valid trajectory exists.
    async fn plan(&mut self) -> Result<Plan, HarvestError>;

    /// Move to the staged target, executing whatever plan the backend holds.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Execution`] when the controller rejects or
    /// aborts the trajectory.
    async fn execute(&mut self) -> Result<(), HarvestError>;

    /// Add `object` to the planning scene.
    async fn apply_collision_object(&mut self, object: &CollisionObject)
    -> Result<(), HarvestError>;

    /// Rigidly attach an object (already in the scene) to a robot link.
    async fn attach_object(&mut self, attachment: &ToolAttachment) -> Result<(), HarvestError>;

    /// Constrain every subsequent plan.
    fn set_path_constraint(&mut self, constraint: OrientationConstraint);
}
