//! In-process simulation drivers for headless runs and CI.
//!
//! Every seam of the pick-place loop has a stand-in here that records what
//! it was asked to do and returns plausible results.  Recording handles are
//! cheap clones sharing state with the driver, so a test can move the driver
//! into the orchestrator and still inspect it afterwards.
//!
//! # Example
//!
//! ```rust
//! use harvest_hal::move_group::MoveGroup;
//! use harvest_hal::sim::SimMoveGroup;
//! use harvest_types::{JointConfiguration, MotionTarget};
//!
//! let mut arm = SimMoveGroup::new().failing_plan_calls([0]);
//! let journal = arm.journal();
//! assert!(arm.set_target(MotionTarget::Joints(JointConfiguration::default())));
//! assert_eq!(journal.calls().len(), 1);
//! ```

use std::collections::HashSet;
use std::f64::consts::{PI, TAU};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use harvest_types::{
    CollisionObject, GripperGoal, HarvestError, JOINT_COUNT, JointConfiguration, MarkerEvent,
    MotionTarget, OrientationConstraint, ToolAttachment, VelocityScaling,
};
use tracing::debug;

use crate::gripper::{Gripper, GripperOutcome};
use crate::move_group::{MoveGroup, Plan};
use crate::visualizer::{OperatorPrompt, Visualizer};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated planning group
// ────────────────────────────────────────────────────────────────────────────

/// Symmetric joint limits of a UR e-series arm (radians).  The elbow is
/// limited to ±π, every other joint to ±2π.
pub const UR_JOINT_LIMITS: [f64; JOINT_COUNT] = [TAU, TAU, PI, TAU, TAU, TAU];

/// One call made on a [`SimMoveGroup`].
#[derive(Debug, Clone, PartialEq)]
pub enum MoveGroupCall {
    SetTarget { target: MotionTarget, within_bounds: bool },
    SetStartStateToCurrent,
    SetScaling(VelocityScaling),
    Plan { success: bool },
    Execute,
    ApplyCollisionObject(String),
    AttachObject { object: String, link: String },
    SetPathConstraint(String),
}

/// Shared record of every call a [`SimMoveGroup`] received.
#[derive(Debug, Clone, Default)]
pub struct MoveGroupJournal {
    calls: Arc<Mutex<Vec<MoveGroupCall>>>,
}

impl MoveGroupJournal {
    pub fn calls(&self) -> Vec<MoveGroupCall> {
        lock(&self.calls).clone()
    }

    pub fn executions(&self) -> usize {
        self.count(|c| matches!(c, MoveGroupCall::Execute))
    }

    pub fn plans(&self) -> usize {
        self.count(|c| matches!(c, MoveGroupCall::Plan { .. }))
    }

    /// Every target staged so far, in order.
    pub fn targets(&self) -> Vec<MotionTarget> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MoveGroupCall::SetTarget { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Every scaling factor set so far, in order.
    pub fn scalings(&self) -> Vec<VelocityScaling> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MoveGroupCall::SetScaling(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&MoveGroupCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: MoveGroupCall) {
        lock(&self.calls).push(call);
    }
}

#[derive(Debug, Clone, Default)]
enum PlanFailures {
    #[default]
    Never,
    Always,
    /// Zero-based indices of the `plan` calls that fail.
    Calls(HashSet<usize>),
}

/// A kinematic stand-in for a UR planning group.
///
/// Joint targets are clamped to [`UR_JOINT_LIMITS`] and reached exactly on
/// execute.  There is no IK: pose targets plan and execute but leave the
/// joint state unchanged.
#[derive(Debug)]
pub struct SimMoveGroup {
    group: String,
    motion_time: Duration,
    joints: JointConfiguration,
    target: Option<MotionTarget>,
    failures: PlanFailures,
    plan_calls: usize,
    joint_state_fails: bool,
    executions_fail: bool,
    journal: MoveGroupJournal,
}

impl Default for SimMoveGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMoveGroup {
    pub fn new() -> Self {
        Self {
            group: "ur_manipulator".to_string(),
            motion_time: Duration::ZERO,
            joints: JointConfiguration::default(),
            target: None,
            failures: PlanFailures::Never,
            plan_calls: 0,
            joint_state_fails: false,
            executions_fail: false,
            journal: MoveGroupJournal::default(),
        }
    }

    pub fn with_planning_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Make every execute take `duration`, like a real arm would.
    pub fn with_motion_time(mut self, duration: Duration) -> Self {
        self.motion_time = duration;
        self
    }

    /// Start from `joints` instead of all zeros.
    pub fn with_joints(mut self, joints: JointConfiguration) -> Self {
        self.joints = joints;
        self
    }

    /// Make every `plan` call fail.
    pub fn failing_all_plans(mut self) -> Self {
        self.failures = PlanFailures::Always;
        self
    }

    /// Make the listed `plan` calls (zero-based) fail.
    pub fn failing_plan_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.failures = PlanFailures::Calls(calls.into_iter().collect());
        self
    }

    /// Make `current_joints` fail, as with no joint state published.
    pub fn failing_joint_state(mut self) -> Self {
        self.joint_state_fails = true;
        self
    }

    /// Make every `execute` call fail without moving.
    pub fn failing_executions(mut self) -> Self {
        self.executions_fail = true;
        self
    }

    pub fn journal(&self) -> MoveGroupJournal {
        self.journal.clone()
    }

    fn plan_fails(&self, call: usize) -> bool {
        match &self.failures {
            PlanFailures::Never => false,
            PlanFailures::Always => true,
            PlanFailures::Calls(set) => set.contains(&call),
        }
    }
}

/// Clamp every joint into [`UR_JOINT_LIMITS`].  Returns the clamped
/// configuration and whether it was already inside.
pub fn clamp_to_limits(joints: JointConfiguration) -> (JointConfiguration, bool) {
    let mut clamped = joints;
    let mut within = true;
    for (value, limit) in clamped.0.iter_mut().zip(UR_JOINT_LIMITS) {
        if value.abs() > limit {
            within = false;
            *value = value.clamp(-limit, limit);
        }
    }
    (clamped, within)
}

#[async_trait]
impl MoveGroup for SimMoveGroup {
    fn planning_frame(&self) -> &str {
        "world"
    }

    fn end_effector_link(&self) -> &str {
        "tool0"
    }

    fn group_names(&self) -> Vec<String> {
        vec![self.group.clone()]
    }

    async fn current_joints(&mut self) -> Result<JointConfiguration, HarvestError> {
        if self.joint_state_fails {
            return Err(HarvestError::Transport(
                "simulated joint state unavailable".to_string(),
            ));
        }
        Ok(self.joints)
    }

    fn set_target(&mut self, target: MotionTarget) -> bool {
        let (staged, within_bounds) = match target {
            MotionTarget::Joints(joints) => {
                let (clamped, within) = clamp_to_limits(joints);
                (MotionTarget::Joints(clamped), within)
            }
            MotionTarget::Pose(_) => (target, true),
        };
        self.target = Some(staged);
        self.journal.push(MoveGroupCall::SetTarget {
            target,
            within_bounds,
        });
        within_bounds
    }

    fn set_start_state_to_current(&mut self) {
        self.journal.push(MoveGroupCall::SetStartStateToCurrent);
    }

    fn set_scaling(&mut self, scaling: VelocityScaling) {
        self.journal.push(MoveGroupCall::SetScaling(scaling));
    }

    async fn plan(&mut self) -> Result<Plan, HarvestError> {
        let call = self.plan_calls;
        self.plan_calls += 1;

        let Some(target) = self.target else {
            self.journal.push(MoveGroupCall::Plan { success: false });
            return Err(HarvestError::Planning {
                phase: format!("plan #{call}"),
                details: "no target set".to_string(),
            });
        };
        if self.plan_fails(call) {
            self.journal.push(MoveGroupCall::Plan { success: false });
            return Err(HarvestError::Planning {
                phase: format!("plan #{call}"),
                details: "simulated planning failure".to_string(),
            });
        }

        self.journal.push(MoveGroupCall::Plan { success: true });
        let goal = match target {
            MotionTarget::Joints(joints) => joints,
            MotionTarget::Pose(_) => self.joints,
        };
        Ok(Plan {
            trajectory: vec![self.joints, goal],
        })
    }

    async fn execute(&mut self) -> Result<(), HarvestError> {
        self.journal.push(MoveGroupCall::Execute);
        if !self.motion_time.is_zero() {
            tokio::time::sleep(self.motion_time).await;
        }
        if self.executions_fail {
            return Err(HarvestError::Execution {
                phase: "execute".to_string(),
                details: "simulated execution failure".to_string(),
            });
        }
        if let Some(MotionTarget::Joints(joints)) = self.target {
            self.joints = joints;
        }
        debug!(joints = ?self.joints.positions(), "sim arm moved");
        Ok(())
    }

    async fn apply_collision_object(
        &mut self,
        object: &CollisionObject,
    ) -> Result<(), HarvestError> {
        self.journal
            .push(MoveGroupCall::ApplyCollisionObject(object.id.clone()));
        Ok(())
    }

    async fn attach_object(&mut self, attachment: &ToolAttachment) -> Result<(), HarvestError> {
        self.journal.push(MoveGroupCall::AttachObject {
            object: attachment.object.id.clone(),
            link: attachment.link.clone(),
        });
        Ok(())
    }

    fn set_path_constraint(&mut self, constraint: OrientationConstraint) {
        self.journal
            .push(MoveGroupCall::SetPathConstraint(constraint.link_name));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated gripper
// ────────────────────────────────────────────────────────────────────────────

/// Records every goal.  Succeeds unless built with [`failing`][Self::failing].
#[derive(Debug, Clone)]
pub struct SimGripper {
    id: String,
    fail: bool,
    goals: Arc<Mutex<Vec<GripperGoal>>>,
}

impl SimGripper {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fail: false,
            goals: Arc::default(),
        }
    }

    /// Report every goal as a non-zero exit.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn goals(&self) -> Vec<GripperGoal> {
        lock(&self.goals).clone()
    }
}

#[async_trait]
impl Gripper for SimGripper {
    fn id(&self) -> &str {
        &self.id
    }

    async fn command(&self, goal: GripperGoal) -> Result<GripperOutcome, HarvestError> {
        lock(&self.goals).push(goal);
        if self.fail {
            Ok(GripperOutcome::Failed {
                exit_code: Some(1),
                details: "simulated gripper failure".to_string(),
            })
        } else {
            Ok(GripperOutcome::Succeeded)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording visualizer and prompt
// ────────────────────────────────────────────────────────────────────────────

/// Keeps every marker in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingVisualizer {
    markers: Arc<Mutex<Vec<MarkerEvent>>>,
}

impl RecordingVisualizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markers(&self) -> Vec<MarkerEvent> {
        lock(&self.markers).clone()
    }

    /// Text of every [`MarkerEvent::Text`] published, in order.
    pub fn texts(&self) -> Vec<String> {
        lock(&self.markers)
            .iter()
            .filter_map(|m| match m {
                MarkerEvent::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Visualizer for RecordingVisualizer {
    fn publish(&self, marker: MarkerEvent) {
        lock(&self.markers).push(marker);
    }
}

/// Counts prompts and always continues.
#[derive(Debug, Clone, Default)]
pub struct CountingPrompt {
    prompts: Arc<Mutex<usize>>,
}

impl CountingPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        *lock(&self.prompts)
    }
}

#[async_trait]
impl OperatorPrompt for CountingPrompt {
    async fn wait_for_next(&self, _message: &str) -> Result<(), HarvestError> {
        *lock(&self.prompts) += 1;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_types::{Point3, Pose, Quaternion};

    #[test]
    fn out_of_range_joints_are_clamped_and_reported() {
        let mut arm = SimMoveGroup::new();
        let within = arm.set_target(MotionTarget::Joints(JointConfiguration([
            0.0, 0.0, 4.0, 0.0, 0.0, -7.0,
        ])));
        assert!(!within);
        assert_eq!(arm.target, Some(MotionTarget::Joints(JointConfiguration([
            0.0, 0.0, PI, 0.0, 0.0, -TAU,
        ]))));
    }

    #[test]
    fn home_configuration_is_within_limits() {
        let (_, within) =
            clamp_to_limits(JointConfiguration([1.571, -2.758, 2.758, -3.141, -1.553, 0.0]));
        assert!(within);
    }

    #[tokio::test]
    async fn execute_reaches_joint_target() {
        let mut arm = SimMoveGroup::new();
        let goal = JointConfiguration([0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        arm.set_target(MotionTarget::Joints(goal));
        let plan = arm.plan().await.unwrap();
        assert_eq!(plan.trajectory.last(), Some(&goal));
        arm.execute().await.unwrap();
        assert_eq!(arm.current_joints().await.unwrap(), goal);
    }

    #[tokio::test]
    async fn pose_targets_leave_joints_unchanged() {
        let start = JointConfiguration([1.0; JOINT_COUNT]);
        let mut arm = SimMoveGroup::new().with_joints(start);
        arm.set_target(MotionTarget::Pose(Pose::new(
            Point3::new(0.3, 0.3, 0.49),
            Quaternion::identity(),
        )));
        arm.plan().await.unwrap();
        arm.execute().await.unwrap();
        assert_eq!(arm.current_joints().await.unwrap(), start);
    }

    #[tokio::test]
    async fn selected_plan_calls_fail() {
        let mut arm = SimMoveGroup::new().failing_plan_calls([1]);
        let journal = arm.journal();
        arm.set_target(MotionTarget::Joints(JointConfiguration::default()));
        assert!(arm.plan().await.is_ok());
        assert!(matches!(arm.plan().await, Err(HarvestError::Planning { .. })));
        assert!(arm.plan().await.is_ok());
        assert_eq!(journal.plans(), 3);
    }

    #[tokio::test]
    async fn failing_joint_state_and_executions() {
        let mut arm = SimMoveGroup::new()
            .failing_joint_state()
            .failing_executions();
        let journal = arm.journal();
        assert!(arm.current_joints().await.is_err());
        arm.set_target(MotionTarget::Joints(JointConfiguration([1.0; JOINT_COUNT])));
        arm.plan().await.unwrap();
        assert!(matches!(arm.execute().await, Err(HarvestError::Execution { .. })));
        assert_eq!(journal.executions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn motion_time_delays_execution() {
        let mut arm = SimMoveGroup::new()
            .with_planning_group("arm")
            .with_motion_time(Duration::from_secs(2));
        assert_eq!(arm.group_names(), vec!["arm".to_string()]);
        arm.set_target(MotionTarget::Joints(JointConfiguration::default()));
        let started = tokio::time::Instant::now();
        arm.execute().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn plan_without_target_fails() {
        let mut arm = SimMoveGroup::new();
        assert!(arm.plan().await.is_err());
    }

    #[tokio::test]
    async fn sim_gripper_records_goals_across_clones() {
        let gripper = SimGripper::new("robotiq");
        let handle = gripper.clone();
        gripper.close(0.045).await.unwrap();
        assert_eq!(handle.goals(), vec![GripperGoal::close(0.045)]);

        let failing = SimGripper::new("robotiq").failing();
        assert!(!failing.open().await.unwrap().is_success());
    }

    #[test]
    fn recording_visualizer_collects_texts() {
        let viz = RecordingVisualizer::new();
        viz.delete_all_markers();
        viz.publish_text("UR Manipulator Demo");
        viz.trigger();
        assert_eq!(viz.markers().len(), 3);
        assert_eq!(viz.texts(), vec!["UR Manipulator Demo".to_string()]);
    }
}
