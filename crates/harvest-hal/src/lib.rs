//! `harvest-hal` – seams between the pick-place loop and the machinery it
//! drives.
//!
//! # Modules
//!
//! - [`move_group`] – [`MoveGroup`][move_group::MoveGroup]: the motion
//!   planner and trajectory executor (IK, collision checking and execution
//!   all live behind it).
//! - [`gripper`] – [`Gripper`][gripper::Gripper] capability with an explicit
//!   [`GripperOutcome`][gripper::GripperOutcome].
//! - [`command_line`] – [`CommandLineGripper`][command_line::CommandLineGripper]:
//!   drives the Robotiq action server through the `ros2` CLI with a bounded
//!   timeout.
//! - [`visualizer`] – operator-feedback markers and the "press next" prompt.
//! - [`sim`] – in-process stand-ins for every seam, for headless runs and
//!   tests.

pub mod command_line;
pub mod gripper;
pub mod move_group;
pub mod sim;
pub mod visualizer;

pub use command_line::CommandLineGripper;
pub use gripper::{Gripper, GripperOutcome};
pub use move_group::{MoveGroup, Plan};
pub use visualizer::{AutoContinue, BusVisualizer, OperatorPrompt, Visualizer};
