//! `harvest-runtime` – the pick-and-place loop and its process plumbing.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`PickPlaceOrchestrator`][orchestrator::PickPlaceOrchestrator]:
//!   startup (tool geometry, home, gripper open, wrist constraint) and the
//!   repeating HOME → APPROACH → GRASP → CLOSE → RETRACT → HOME → OPEN cycle,
//!   with a [`PlanFailurePolicy`][orchestrator::PlanFailurePolicy] deciding
//!   whether failed plans are still executed.
//! - [`scene`] – the collision objects attached to the arm and the wrist
//!   orientation constraint.
//! - [`failure_streak`] – [`FailureStreak`][failure_streak::FailureStreak]:
//!   flags a phase that keeps failing to plan.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod failure_streak;
pub mod orchestrator;
pub mod scene;
pub mod telemetry;

pub use failure_streak::FailureStreak;
pub use orchestrator::{
    OrchestratorConfig, Phase, PickPlaceOrchestrator, PlanFailurePolicy, PromptMode, RunSummary,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
