//! [`PickPlaceOrchestrator`] – the perception-driven pick-and-place loop.
//!
//! One startup pass ([`prepare`][PickPlaceOrchestrator::prepare]) followed by
//! the same choreography repeated until cancelled:
//!
//! ```text
//! HOME → APPROACH → GRASP_OFFSET_1 → GRASP_OFFSET_2 → GRIPPER_CLOSE
//!      → RETRACT → HOME → GRIPPER_OPEN → (next cycle)
//! ```
//!
//! Every motion phase stages a target and scaling on the [`MoveGroup`],
//! plans, shows the result on the [`Visualizer`], optionally waits for the
//! operator and then executes.  Nothing in a cycle is fatal:
//!
//! * out-of-limit joint targets are logged and clamped by the planner;
//! * planning failures are logged, counted, and handled per
//!   [`PlanFailurePolicy`];
//! * gripper failures and timeouts are logged and counted.
//!
//! The [`CancellationToken`] is checked at the top of every cycle and before
//! and after every planning, execution and gripper call.  Cancellation is the
//! only way out of [`run`][PickPlaceOrchestrator::run].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use harvest_hal::{
    AutoContinue, BusVisualizer, Gripper, GripperOutcome, MoveGroup, OperatorPrompt, Plan,
    Visualizer,
};
use harvest_middleware::{EventBus, Topic};
use harvest_perception::PerceptionListener;
use harvest_types::{
    Event, EventPayload, HarvestError, JointConfiguration, MotionTarget, Pose, VelocityScaling,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::failure_streak::FailureStreak;
use crate::scene;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Home configuration, base to wrist 3 (radians).
pub const HOME_JOINTS: [f64; 6] = [1.571, -2.758, 2.758, -3.141, -1.553, 0.0];

/// Offset from the perceived fruit to the first grasp waypoint (x, y, z).
pub const APPROACH_OFFSET: (f64, f64, f64) = (0.0, -0.10, -0.01);

/// Forward step along y from the first to the second grasp waypoint.
pub const RETRACT_STEP_Y: f64 = 0.065;

pub const STARTUP_SCALING: VelocityScaling = VelocityScaling::uniform(0.1);
pub const HOME_SCALING: VelocityScaling = VelocityScaling::uniform(0.5);
pub const GRASP_OFFSET_1_SCALING: VelocityScaling = VelocityScaling::uniform(0.2);
pub const GRASP_OFFSET_2_SCALING: VelocityScaling = VelocityScaling::uniform(0.05);
pub const RETRACT_SCALING: VelocityScaling = VelocityScaling::uniform(0.5);

/// Index of the last wrist joint, zeroed on retract.
const WRIST_3: usize = 5;

const TITLE: &str = "UR Manipulator Demo";
const ATTACHED_TEXT: &str = "Object_attached_to_robot";
const PROMPT_TEXT: &str = "Press 'next' to continue the demo";
const OUT_OF_LIMITS: &str = "Target joint position(s) were outside of limits, but will be clamped.";

// ─────────────────────────────────────────────────────────────────────────────
// Pure helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn home_joints() -> JointConfiguration {
    JointConfiguration(HOME_JOINTS)
}

/// First grasp waypoint: 0.10 m short of the fruit on y and 0.01 m below it.
pub fn approach_waypoint(target: &Pose) -> Pose {
    let (dx, dy, dz) = APPROACH_OFFSET;
    target.offset(dx, dy, dz)
}

/// Second grasp waypoint: 0.065 m further along y from the approach.
pub fn retract_waypoint(approach: &Pose) -> Pose {
    approach.offset(0.0, RETRACT_STEP_Y, 0.0)
}

/// Current joints with the last wrist joint turned back to zero.
pub fn wrist_reset(current: JointConfiguration) -> JointConfiguration {
    current.with_joint(WRIST_3, 0.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// What to do with a motion whose planning failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFailurePolicy {
    /// Issue the execution call anyway; the planner moves along whatever
    /// plan it last held.
    #[default]
    ExecuteAnyway,
    /// Do not execute; continue with the next phase.
    SkipExecution,
}

impl FromStr for PlanFailurePolicy {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "execute_anyway" => Ok(Self::ExecuteAnyway),
            "skip_execution" => Ok(Self::SkipExecution),
            other => Err(HarvestError::Config(format!(
                "unknown plan failure policy '{other}' (expected execute_anyway or skip_execution)"
            ))),
        }
    }
}

/// When the loop waits for the operator before executing a motion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    Never,
    /// Startup and the first cycle only.
    #[default]
    FirstCycle,
    Always,
}

impl FromStr for PromptMode {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "never" => Ok(Self::Never),
            "first_cycle" => Ok(Self::FirstCycle),
            "always" => Ok(Self::Always),
            other => Err(HarvestError::Config(format!(
                "unknown prompt mode '{other}' (expected never, first_cycle or always)"
            ))),
        }
    }
}

/// Configuration bundle for [`PickPlaceOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub on_plan_failure: PlanFailurePolicy,
    pub prompt: PromptMode,
    /// Consecutive planning failures of one phase before an error is logged.
    pub failure_streak_threshold: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            on_plan_failure: PlanFailurePolicy::default(),
            prompt: PromptMode::default(),
            failure_streak_threshold: 3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phases and summary
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Home,
    Approach,
    GraspOffset1,
    GraspOffset2,
    GripperClose,
    Retract,
    ReturnHome,
    GripperOpen,
}

impl Phase {
    /// Phases of one cycle, in order.
    pub const CYCLE: [Phase; 8] = [
        Phase::Home,
        Phase::Approach,
        Phase::GraspOffset1,
        Phase::GraspOffset2,
        Phase::GripperClose,
        Phase::Retract,
        Phase::ReturnHome,
        Phase::GripperOpen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Home => "home",
            Phase::Approach => "approach",
            Phase::GraspOffset1 => "grasp_offset_1",
            Phase::GraspOffset2 => "grasp_offset_2",
            Phase::GripperClose => "gripper_close",
            Phase::Retract => "retract",
            Phase::ReturnHome => "return_home",
            Phase::GripperOpen => "gripper_open",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles_completed: u64,
    pub planning_failures: u64,
    pub execution_failures: u64,
    pub gripper_failures: u64,
}

fn checkpoint(cancel: &CancellationToken, step: impl fmt::Display) -> Result<(), HarvestError> {
    if cancel.is_cancelled() {
        Err(HarvestError::Cancelled(format!("stopped at {step}")))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PickPlaceOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the planner, gripper and feedback handles and drives the loop.
pub struct PickPlaceOrchestrator {
    config: OrchestratorConfig,
    listener: PerceptionListener,
    move_group: Box<dyn MoveGroup>,
    gripper: Arc<dyn Gripper>,
    visualizer: Arc<dyn Visualizer>,
    prompt: Arc<dyn OperatorPrompt>,
    status: Option<EventBus>,
    streak: FailureStreak,
    /// Trajectory shown on the display; replaced on every successful plan.
    last_plan: Plan,
    cycle: u64,
    summary: RunSummary,
}

impl PickPlaceOrchestrator {
    /// Build an orchestrator that publishes nothing and never prompts.  Use
    /// [`with_bus`][Self::with_bus], [`with_visualizer`][Self::with_visualizer]
    /// and [`with_prompt`][Self::with_prompt] to wire feedback.
    pub fn new(
        config: OrchestratorConfig,
        listener: PerceptionListener,
        move_group: Box<dyn MoveGroup>,
        gripper: Arc<dyn Gripper>,
    ) -> Self {
        let streak = FailureStreak::new(config.failure_streak_threshold);
        Self {
            config,
            listener,
            move_group,
            gripper,
            visualizer: Arc::new(BusVisualizer::new(EventBus::new(1))),
            prompt: Arc::new(AutoContinue),
            status: None,
            streak,
            last_plan: Plan::default(),
            cycle: 0,
            summary: RunSummary::default(),
        }
    }

    /// Publish markers and phase/fault status on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.visualizer = Arc::new(BusVisualizer::new(bus.clone()));
        self.status = Some(bus);
        self
    }

    pub fn with_visualizer(mut self, visualizer: Arc<dyn Visualizer>) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn OperatorPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Zero-based index of the cycle currently running (or next to run).
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// One-time setup before the loop: announce, attach the tool geometry,
    /// go home slowly, open the gripper and install the wrist constraint.
    ///
    /// # Errors
    ///
    /// * [`HarvestError::Cancelled`] – the token fired.
    /// * Any error from adding or attaching the collision objects; the loop
    ///   must not run without them.
    #[instrument(skip(self, cancel))]
    pub async fn prepare(&mut self, cancel: &CancellationToken) -> Result<(), HarvestError> {
        let end_effector = self.move_group.end_effector_link().to_string();
        info!(
            planning_frame = self.move_group.planning_frame(),
            end_effector_link = %end_effector,
            planning_groups = ?self.move_group.group_names(),
            "planning group ready"
        );

        self.visualizer.delete_all_markers();
        self.visualizer.publish_text(TITLE);
        self.visualizer.trigger();

        self.streak.reset();
        for attachment in scene::tool_attachments(&end_effector) {
            checkpoint(cancel, "tool attachment")?;
            self.move_group.apply_collision_object(&attachment.object).await?;
            info!(object = %attachment.object.id, link = %attachment.link, "Attach the object to the robot");
            self.move_group.attach_object(&attachment).await?;
            self.visualizer.publish_text(ATTACHED_TEXT);
            self.visualizer.trigger();
        }

        self.move_to(Phase::Home, MotionTarget::Joints(home_joints()), STARTUP_SCALING, cancel)
            .await?;
        self.actuate_gripper(Phase::GripperOpen, cancel).await?;

        self.move_group
            .set_path_constraint(scene::wrist_orientation_constraint());
        debug!("wrist orientation constraint installed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Repeat [`run_cycle`][Self::run_cycle] until `cancel` fires.
    ///
    /// Cancellation is a clean stop and returns the summary.
    ///
    /// # Errors
    ///
    /// Reserved for failures outside the per-phase handling; every failure
    /// inside a cycle is logged and counted instead.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary, HarvestError> {
        loop {
            match self.run_cycle(&cancel).await {
                Ok(()) => {}
                Err(HarvestError::Cancelled(reason)) => {
                    info!(%reason, cycles = self.summary.cycles_completed, "pick-place loop stopped");
                    return Ok(self.summary);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One full pick-and-place cycle.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Cancelled`] when the token fires (or the
    /// operator aborts a prompt).  The cycle is then left where it stopped.
    #[instrument(skip(self, cancel), fields(cycle = self.cycle))]
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<(), HarvestError> {
        checkpoint(cancel, Phase::Home)?;

        self.move_to(Phase::Home, MotionTarget::Joints(home_joints()), HOME_SCALING, cancel)
            .await?;

        self.publish_phase(Phase::Approach);
        let snapshot = self.listener.snapshot();
        if !snapshot.has_target() {
            warn!("no target position received yet; approaching the default pose");
        }
        let approach = approach_waypoint(&snapshot.target_pose);
        let retract = retract_waypoint(&approach);
        debug!(?approach, ?retract, distance_to_fruit = snapshot.distance_to_fruit, "grasp waypoints");

        self.move_group.set_start_state_to_current();
        info!(planning_frame = self.move_group.planning_frame(), "Planning frame");
        self.move_to(Phase::GraspOffset1, MotionTarget::Pose(approach), GRASP_OFFSET_1_SCALING, cancel)
            .await?;
        self.move_to(Phase::GraspOffset2, MotionTarget::Pose(retract), GRASP_OFFSET_2_SCALING, cancel)
            .await?;

        self.actuate_gripper(Phase::GripperClose, cancel).await?;

        checkpoint(cancel, Phase::Retract)?;
        match self.move_group.current_joints().await {
            Ok(current) => {
                self.move_to(
                    Phase::Retract,
                    MotionTarget::Joints(wrist_reset(current)),
                    RETRACT_SCALING,
                    cancel,
                )
                .await?;
            }
            Err(e) => {
                warn!(error = %e, "no joint state; skipping retract");
                self.publish_fault(Phase::Retract, &e);
            }
        }

        self.move_to(Phase::ReturnHome, MotionTarget::Joints(home_joints()), HOME_SCALING, cancel)
            .await?;
        self.actuate_gripper(Phase::GripperOpen, cancel).await?;

        self.summary.cycles_completed += 1;
        self.cycle += 1;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Phase steps
    // -------------------------------------------------------------------------

    #[instrument(skip(self, cancel))]
    async fn move_to(
        &mut self,
        phase: Phase,
        target: MotionTarget,
        scaling: VelocityScaling,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        self.publish_phase(phase);

        if !self.move_group.set_target(target) {
            warn!(%phase, "{OUT_OF_LIMITS}");
        }
        self.move_group.set_scaling(scaling);

        checkpoint(cancel, phase)?;
        let planned = self.move_group.plan().await;
        checkpoint(cancel, phase)?;

        let goal_kind = match target {
            MotionTarget::Joints(_) => "joint-space goal",
            MotionTarget::Pose(_) => "pose goal",
        };
        let success = match planned {
            Ok(plan) => {
                info!(%phase, "Visualizing plan ({goal_kind})");
                self.streak.record_success(phase.as_str());
                self.last_plan = plan;
                true
            }
            Err(e) => {
                warn!(%phase, error = %e, "Visualizing plan ({goal_kind}) FAILED");
                self.summary.planning_failures += 1;
                self.publish_fault(phase, &e);
                if self.streak.record_failure(phase.as_str()) {
                    error!(
                        %phase,
                        consecutive = self.streak.streak(phase.as_str()),
                        threshold = self.streak.threshold(),
                        "phase keeps failing to plan"
                    );
                }
                false
            }
        };

        self.show_plan(target);
        self.prompt_operator(phase, cancel).await?;

        if !success && self.config.on_plan_failure == PlanFailurePolicy::SkipExecution {
            info!(%phase, "planning failed; execution skipped");
            return Ok(());
        }

        checkpoint(cancel, phase)?;
        let executed = self.move_group.execute().await;
        checkpoint(cancel, phase)?;
        if let Err(e) = executed {
            warn!(%phase, error = %e, "execution failed");
            self.summary.execution_failures += 1;
            self.publish_fault(phase, &e);
        }
        Ok(())
    }

    /// Open (release aperture) or close (current fruit width) the gripper.
    #[instrument(skip(self, cancel))]
    async fn actuate_gripper(
        &mut self,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        self.publish_phase(phase);
        checkpoint(cancel, phase)?;
        let result = if phase == Phase::GripperClose {
            let width = self.listener.fruit_width();
            info!(fruit_width = width, "closing gripper");
            self.gripper.close(width).await
        } else {
            self.gripper.open().await
        };
        checkpoint(cancel, phase)?;

        match result {
            Ok(outcome) if outcome.is_success() => {
                debug!(%phase, gripper = self.gripper.id(), "gripper command succeeded");
            }
            Ok(outcome) => {
                warn!(%phase, gripper = self.gripper.id(), ?outcome, "gripper command failed");
                self.summary.gripper_failures += 1;
                let details = match outcome {
                    GripperOutcome::Failed { exit_code, details } => {
                        format!("{details} (exit code {exit_code:?})")
                    }
                    GripperOutcome::Succeeded => String::new(),
                };
                let err = HarvestError::Gripper {
                    component: self.gripper.id().to_string(),
                    details,
                };
                self.publish_fault(phase, &err);
            }
            Err(e) => {
                warn!(%phase, gripper = self.gripper.id(), error = %e, "gripper command failed");
                self.summary.gripper_failures += 1;
                self.publish_fault(phase, &e);
            }
        }
        Ok(())
    }

    fn show_plan(&self, target: MotionTarget) {
        match target {
            MotionTarget::Joints(_) => {
                self.visualizer.delete_all_markers();
                self.visualizer.publish_text("Joint Space Goal");
            }
            MotionTarget::Pose(pose) => {
                self.visualizer.publish_axis_labeled(&pose, "pose1");
                self.visualizer.publish_text("Pose Goal");
            }
        }
        self.visualizer.publish_trajectory_line(&self.last_plan);
        self.visualizer.trigger();
    }

    /// Only cancellation ends the wait with an error; a broken prompt is
    /// reported and the motion goes ahead.
    async fn prompt_operator(
        &self,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<(), HarvestError> {
        let active = match self.config.prompt {
            PromptMode::Never => false,
            PromptMode::FirstCycle => self.cycle == 0,
            PromptMode::Always => true,
        };
        if !active {
            return Ok(());
        }
        let answer = tokio::select! {
            _ = cancel.cancelled() => Err(HarvestError::Cancelled("cancelled at prompt".to_string())),
            answer = self.prompt.wait_for_next(PROMPT_TEXT) => answer,
        };
        match answer {
            Ok(()) => Ok(()),
            Err(HarvestError::Cancelled(reason)) => Err(HarvestError::Cancelled(reason)),
            Err(e) => {
                warn!(%phase, error = %e, "operator prompt failed; continuing");
                self.publish_fault(phase, &e);
                Ok(())
            }
        }
    }

    // Status traffic is best-effort: no subscriber is not an error.
    fn publish_phase(&self, phase: Phase) {
        if let Some(bus) = &self.status {
            let event = Event::new(
                "harvest-runtime::orchestrator",
                EventPayload::PhaseChanged {
                    cycle: self.cycle,
                    phase: phase.to_string(),
                },
            );
            let _ = bus.publish_to(Topic::Status, event);
        }
    }

    fn publish_fault(&self, phase: Phase, err: &HarvestError) {
        if let Some(bus) = &self.status {
            let event = Event::new(
                "harvest-runtime::orchestrator",
                EventPayload::Fault {
                    component: phase.to_string(),
                    message: err.to_string(),
                },
            );
            let _ = bus.publish_to(Topic::Status, event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use harvest_hal::sim::{CountingPrompt, MoveGroupCall, RecordingVisualizer, SimGripper, SimMoveGroup};
    use harvest_types::{GripperGoal, MarkerEvent, Point3};

    struct Rig {
        orchestrator: PickPlaceOrchestrator,
        journal: harvest_hal::sim::MoveGroupJournal,
        gripper: SimGripper,
        visualizer: RecordingVisualizer,
        listener: PerceptionListener,
    }

    fn rig(config: OrchestratorConfig, arm: SimMoveGroup, gripper: SimGripper) -> Rig {
        let listener = PerceptionListener::new();
        let journal = arm.journal();
        let visualizer = RecordingVisualizer::new();
        let orchestrator = PickPlaceOrchestrator::new(
            config,
            listener.clone(),
            Box::new(arm),
            Arc::new(gripper.clone()),
        )
        .with_visualizer(Arc::new(visualizer.clone()));
        Rig {
            orchestrator,
            journal,
            gripper,
            visualizer,
            listener,
        }
    }

    fn quiet() -> OrchestratorConfig {
        OrchestratorConfig {
            prompt: PromptMode::Never,
            ..OrchestratorConfig::default()
        }
    }

    fn feed_scenario(listener: &PerceptionListener) {
        listener.on_target_position(Point3::new(0.30, 0.40, 0.50));
        listener.on_fruit_width(0.045);
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ── Pure helpers ──────────────────────────────────────────────────────────

    #[test]
    fn scenario_waypoints() {
        let listener = PerceptionListener::new();
        feed_scenario(&listener);
        let approach = approach_waypoint(&listener.target_pose());
        assert!(close(approach.position.x, 0.30));
        assert!(close(approach.position.y, 0.30));
        assert!(close(approach.position.z, 0.49));

        let retract = retract_waypoint(&approach);
        assert!(close(retract.position.y, 0.365));
        assert!(close(retract.position.z, 0.49));
        assert_eq!(retract.orientation, approach.orientation);
    }

    #[test]
    fn wrist_reset_zeroes_only_last_joint() {
        let current = JointConfiguration([0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(
            wrist_reset(current),
            JointConfiguration([0.1, 0.2, 0.3, 0.4, 0.5, 0.0])
        );
    }

    #[test]
    fn home_matches_constant() {
        assert_eq!(home_joints().positions(), &HOME_JOINTS);
    }

    #[test]
    fn policy_and_prompt_parse_from_config_strings() {
        assert_eq!("skip_execution".parse::<PlanFailurePolicy>().unwrap(), PlanFailurePolicy::SkipExecution);
        assert_eq!(" execute_anyway ".parse::<PlanFailurePolicy>().unwrap(), PlanFailurePolicy::ExecuteAnyway);
        assert!(matches!("retry".parse::<PlanFailurePolicy>(), Err(HarvestError::Config(_))));
        assert_eq!("always".parse::<PromptMode>().unwrap(), PromptMode::Always);
        assert!("sometimes".parse::<PromptMode>().is_err());
    }

    #[test]
    fn phase_labels_are_snake_case() {
        let labels: Vec<_> = Phase::CYCLE.iter().map(Phase::as_str).collect();
        assert_eq!(labels[2], "grasp_offset_1");
        assert_eq!(Phase::ReturnHome.to_string(), "return_home");
    }

    // ── Cycle behaviour ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn full_cycle_follows_choreography() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));
        feed_scenario(&rig.listener);

        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        let targets = rig.journal.targets();
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[0], MotionTarget::Joints(home_joints()));
        match targets[1] {
            MotionTarget::Pose(p) => {
                assert!(close(p.position.y, 0.30) && close(p.position.z, 0.49));
            }
            other => panic!("expected pose target, got {other:?}"),
        }
        match targets[2] {
            MotionTarget::Pose(p) => assert!(close(p.position.y, 0.365)),
            other => panic!("expected pose target, got {other:?}"),
        }
        assert_eq!(targets[3], MotionTarget::Joints(wrist_reset(home_joints())));
        assert_eq!(targets[4], MotionTarget::Joints(home_joints()));

        let scalings: Vec<f64> = rig.journal.scalings().iter().map(|s| s.velocity).collect();
        assert_eq!(scalings, vec![0.5, 0.2, 0.05, 0.5, 0.5]);
        assert_eq!(rig.journal.executions(), 5);

        assert_eq!(
            rig.gripper.goals(),
            vec![GripperGoal::close(0.045), GripperGoal::open()]
        );
        assert_eq!(rig.orchestrator.summary().cycles_completed, 1);
    }

    #[tokio::test]
    async fn start_state_reset_precedes_first_grasp_waypoint() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        let calls = rig.journal.calls();
        let reset = calls
            .iter()
            .position(|c| *c == MoveGroupCall::SetStartStateToCurrent)
            .unwrap();
        assert!(matches!(
            calls[reset + 1],
            MoveGroupCall::SetTarget { target: MotionTarget::Pose(_), .. }
        ));
    }

    #[tokio::test]
    async fn close_uses_width_read_at_close_time() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.listener.on_fruit_width(0.01);
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();
        rig.listener.on_fruit_width(0.052);
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        let goals = rig.gripper.goals();
        assert_eq!(goals[0].position, 0.01);
        assert_eq!(goals[2].position, 0.052);
        // Opening ignores the sensed width.
        assert_eq!(goals[1], GripperGoal::open());
        assert_eq!(goals[3], GripperGoal::open());
    }

    #[tokio::test]
    async fn execute_anyway_still_executes_failed_plans() {
        let mut rig = rig(quiet(), SimMoveGroup::new().failing_all_plans(), SimGripper::new("robotiq"));
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(rig.journal.plans(), 5);
        assert_eq!(rig.journal.executions(), 5);
        let summary = rig.orchestrator.summary();
        assert_eq!(summary.planning_failures, 5);
        assert_eq!(summary.cycles_completed, 1);
    }

    #[tokio::test]
    async fn skip_execution_holds_the_arm_after_failed_plans() {
        let config = OrchestratorConfig {
            on_plan_failure: PlanFailurePolicy::SkipExecution,
            ..quiet()
        };
        // Only the first grasp waypoint (second plan) fails.
        let mut rig = rig(config, SimMoveGroup::new().failing_plan_calls([1]), SimGripper::new("robotiq"));
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(rig.journal.plans(), 5);
        assert_eq!(rig.journal.executions(), 4);
        // The gripper still runs: planning failure never stops the cycle.
        assert_eq!(rig.gripper.goals().len(), 2);
        assert_eq!(rig.orchestrator.summary().planning_failures, 1);
    }

    #[tokio::test]
    async fn gripper_failures_are_counted_not_fatal() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq").failing());
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();
        let summary = rig.orchestrator.summary();
        assert_eq!(summary.gripper_failures, 2);
        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(rig.journal.executions(), 5);
    }

    #[tokio::test]
    async fn retract_is_skipped_without_joint_state() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::Status);
        let mut rig = rig(
            quiet(),
            SimMoveGroup::new().failing_joint_state(),
            SimGripper::new("robotiq"),
        );
        rig.orchestrator = rig.orchestrator.with_bus(bus);

        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(rig.journal.plans(), 4);
        assert_eq!(rig.journal.executions(), 4);
        assert_eq!(rig.gripper.goals(), vec![GripperGoal::close(0.0), GripperGoal::open()]);
        assert_eq!(rig.orchestrator.summary().cycles_completed, 1);
        assert_eq!(fault_components(&mut status), vec!["retract".to_string()]);
    }

    #[tokio::test]
    async fn execution_failures_are_counted_not_fatal() {
        let mut rig = rig(
            quiet(),
            SimMoveGroup::new().failing_executions(),
            SimGripper::new("robotiq"),
        );
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        let summary = rig.orchestrator.summary();
        assert_eq!(summary.execution_failures, 5);
        assert_eq!(summary.planning_failures, 0);
        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(rig.gripper.goals().len(), 2);
    }

    #[tokio::test]
    async fn out_of_limit_retract_target_still_executes() {
        let out_of_range = JointConfiguration([7.0, 0.0, 4.0, 0.0, 0.0, 1.2]);
        let mut rig = rig(
            quiet(),
            SimMoveGroup::new().with_joints(out_of_range),
            SimGripper::new("robotiq"),
        );
        let current = rig.orchestrator.move_group.current_joints().await.unwrap();
        rig.orchestrator
            .move_to(
                Phase::Retract,
                MotionTarget::Joints(wrist_reset(current)),
                RETRACT_SCALING,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let calls = rig.journal.calls();
        assert_eq!(
            calls.first(),
            Some(&MoveGroupCall::SetTarget {
                target: MotionTarget::Joints(JointConfiguration([7.0, 0.0, 4.0, 0.0, 0.0, 0.0])),
                within_bounds: false,
            })
        );
        assert_eq!(calls.last(), Some(&MoveGroupCall::Execute));
        assert_eq!(rig.journal.executions(), 1);
    }

    #[tokio::test]
    async fn markers_follow_goal_kind() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            rig.visualizer.texts(),
            vec!["Joint Space Goal", "Pose Goal", "Pose Goal", "Joint Space Goal", "Joint Space Goal"]
        );
        let markers = rig.visualizer.markers();
        assert_eq!(markers.first(), Some(&MarkerEvent::DeleteAll));
        let axes = markers
            .iter()
            .filter(|m| matches!(m, MarkerEvent::AxisLabeled { label, .. } if label == "pose1"))
            .count();
        assert_eq!(axes, 2);
    }

    // ── Startup ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn prepare_attaches_tools_homes_and_constrains() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator.prepare(&CancellationToken::new()).await.unwrap();

        let calls = rig.journal.calls();
        assert_eq!(
            calls[..4],
            [
                MoveGroupCall::ApplyCollisionObject(scene::CYLINDER_ID.to_string()),
                MoveGroupCall::AttachObject {
                    object: scene::CYLINDER_ID.to_string(),
                    link: "tool0".to_string()
                },
                MoveGroupCall::ApplyCollisionObject(scene::BOX_ID.to_string()),
                MoveGroupCall::AttachObject {
                    object: scene::BOX_ID.to_string(),
                    link: "wrist_2_link".to_string()
                },
            ]
        );
        assert_eq!(calls.last(), Some(&MoveGroupCall::SetPathConstraint("wrist_2_link".to_string())));
        assert_eq!(rig.journal.scalings(), vec![STARTUP_SCALING]);
        assert_eq!(rig.gripper.goals(), vec![GripperGoal::open()]);
        assert_eq!(
            rig.visualizer.texts(),
            vec![TITLE, ATTACHED_TEXT, ATTACHED_TEXT, "Joint Space Goal"]
        );
    }

    // ── Prompts ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_cycle_prompts_stop_after_first_cycle() {
        let prompt = CountingPrompt::new();
        let config = OrchestratorConfig {
            prompt: PromptMode::FirstCycle,
            ..OrchestratorConfig::default()
        };
        let mut rig = rig(config, SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator = rig.orchestrator.with_prompt(Arc::new(prompt.clone()));
        let cancel = CancellationToken::new();

        rig.orchestrator.run_cycle(&cancel).await.unwrap();
        assert_eq!(prompt.count(), 5);
        rig.orchestrator.run_cycle(&cancel).await.unwrap();
        assert_eq!(prompt.count(), 5);
    }

    #[tokio::test]
    async fn always_prompts_every_motion() {
        let prompt = CountingPrompt::new();
        let config = OrchestratorConfig {
            prompt: PromptMode::Always,
            ..OrchestratorConfig::default()
        };
        let mut rig = rig(config, SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator = rig.orchestrator.with_prompt(Arc::new(prompt.clone()));
        let cancel = CancellationToken::new();
        rig.orchestrator.run_cycle(&cancel).await.unwrap();
        rig.orchestrator.run_cycle(&cancel).await.unwrap();
        assert_eq!(prompt.count(), 10);
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancelled_before_first_cycle_issues_no_motion() {
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = rig.orchestrator.run(cancel).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(rig.journal.calls().is_empty());
        assert!(rig.gripper.goals().is_empty());
    }

    /// Cancels the token the first time it is asked to continue.
    struct CancelOnPrompt(CancellationToken);

    #[async_trait]
    impl OperatorPrompt for CancelOnPrompt {
        async fn wait_for_next(&self, _message: &str) -> Result<(), HarvestError> {
            self.0.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_mid_phase_stops_before_execution() {
        let cancel = CancellationToken::new();
        let config = OrchestratorConfig {
            prompt: PromptMode::Always,
            ..OrchestratorConfig::default()
        };
        let mut rig = rig(config, SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator = rig
            .orchestrator
            .with_prompt(Arc::new(CancelOnPrompt(cancel.clone())));

        let summary = rig.orchestrator.run(cancel).await.unwrap();
        assert_eq!(summary.cycles_completed, 0);
        assert_eq!(rig.journal.plans(), 1);
        assert_eq!(rig.journal.executions(), 0);
        assert!(rig.gripper.goals().is_empty());
    }

    /// Cancels the token on the `n`-th prompt.
    struct CancelAfter {
        n: usize,
        seen: std::sync::Mutex<usize>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl OperatorPrompt for CancelAfter {
        async fn wait_for_next(&self, _message: &str) -> Result<(), HarvestError> {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            if *seen == self.n {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    /// Fails every prompt with a transport error; cancels on the `n`-th.
    struct BrokenPrompt {
        n: usize,
        seen: std::sync::Mutex<usize>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl OperatorPrompt for BrokenPrompt {
        async fn wait_for_next(&self, _message: &str) -> Result<(), HarvestError> {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            if *seen == self.n {
                self.cancel.cancel();
            }
            Err(HarvestError::Transport("stdin: broken pipe".to_string()))
        }
    }

    #[tokio::test]
    async fn broken_prompt_does_not_stop_the_loop() {
        let cancel = CancellationToken::new();
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::Status);
        let config = OrchestratorConfig {
            prompt: PromptMode::Always,
            ..OrchestratorConfig::default()
        };
        let mut rig = rig(config, SimMoveGroup::new(), SimGripper::new("robotiq"));
        rig.orchestrator = rig.orchestrator.with_bus(bus).with_prompt(Arc::new(BrokenPrompt {
            n: 12,
            seen: std::sync::Mutex::new(0),
            cancel: cancel.clone(),
        }));

        let summary = rig.orchestrator.run(cancel).await.unwrap();

        assert_eq!(summary.cycles_completed, 2);
        // Two full cycles plus the third cycle's home move.
        assert_eq!(rig.journal.executions(), 11);
        let faults = fault_components(&mut status);
        assert!(faults.len() >= 11, "every failed prompt is reported: {faults:?}");
        assert!(faults.contains(&"grasp_offset_1".to_string()));
    }

    #[tokio::test]
    async fn cancelled_during_startup_names_the_attach_step() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq"));

        let err = rig.orchestrator.prepare(&cancel).await.unwrap_err();

        assert_eq!(err, HarvestError::Cancelled("stopped at tool attachment".to_string()));
        assert!(rig.journal.calls().is_empty());
    }

    #[tokio::test]
    async fn run_keeps_cycling_until_cancelled() {
        let cancel = CancellationToken::new();
        let config = OrchestratorConfig {
            prompt: PromptMode::Always,
            ..OrchestratorConfig::default()
        };
        let mut rig = rig(config, SimMoveGroup::new(), SimGripper::new("robotiq"));
        // Five prompts per cycle: the 12th falls inside the third cycle.
        rig.orchestrator = rig.orchestrator.with_prompt(Arc::new(CancelAfter {
            n: 12,
            seen: std::sync::Mutex::new(0),
            cancel: cancel.clone(),
        }));

        let summary = rig.orchestrator.run(cancel).await.unwrap();
        assert_eq!(summary.cycles_completed, 2);
        assert_eq!(rig.gripper.goals().len(), 4);
    }

    // ── Status ────────────────────────────────────────────────────────────────

    fn fault_components(status: &mut harvest_middleware::TopicReceiver) -> Vec<String> {
        let mut faults = Vec::new();
        while let Ok(event) = status.try_recv() {
            if let EventPayload::Fault { component, .. } = event.payload {
                faults.push(component);
            }
        }
        faults
    }

    #[tokio::test]
    async fn failed_gripper_outcomes_are_published_as_faults() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::Status);
        let mut rig = rig(quiet(), SimMoveGroup::new(), SimGripper::new("robotiq").failing());
        rig.orchestrator = rig.orchestrator.with_bus(bus);

        rig.orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            fault_components(&mut status),
            vec!["gripper_close".to_string(), "gripper_open".to_string()]
        );
    }

    #[tokio::test]
    async fn phases_and_faults_are_published_on_status_topic() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::Status);
        let arm = SimMoveGroup::new().failing_plan_calls([0]);
        let mut orchestrator = PickPlaceOrchestrator::new(
            quiet(),
            PerceptionListener::new(),
            Box::new(arm),
            Arc::new(SimGripper::new("robotiq")),
        )
        .with_bus(bus);
        orchestrator.run_cycle(&CancellationToken::new()).await.unwrap();

        let mut phases = Vec::new();
        let mut faults = Vec::new();
        while let Ok(event) = status.try_recv() {
            match event.payload {
                EventPayload::PhaseChanged { cycle, phase } => {
                    assert_eq!(cycle, 0);
                    phases.push(phase);
                }
                EventPayload::Fault { component, .. } => faults.push(component),
                other => panic!("unexpected payload: {other:?}"),
            }
        }
        let expected: Vec<String> = Phase::CYCLE.iter().map(|p| p.to_string()).collect();
        assert_eq!(phases, expected);
        assert_eq!(faults, vec!["home".to_string()]);
    }
}
