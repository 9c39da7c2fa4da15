//! Gripper driver that shells out to the `ros2` CLI.
//!
//! Each goal becomes one invocation of
//!
//! ```text
//! ros2 action send_goal -f /robotiq_2f_urcap_adapter/gripper_command \
//!     robotiq_2f_urcap_adapter/GripperCommand \
//!     '{ command: { position: 0.045, max_effort: 40, max_speed: 0.05 }}'
//! ```
//!
//! The process is spawned directly (no shell), so the goal document is passed
//! as a single argument without quoting.  The call is bounded by a timeout;
//! a child still running when it expires is killed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use harvest_types::{GripperGoal, HarvestError};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::gripper::{Gripper, GripperOutcome};

pub const DEFAULT_PROGRAM: &str = "ros2";
pub const DEFAULT_ACTION: &str = "/robotiq_2f_urcap_adapter/gripper_command";
pub const DEFAULT_ACTION_TYPE: &str = "robotiq_2f_urcap_adapter/GripperCommand";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Render a goal in the YAML flow syntax accepted by `ros2 action send_goal`.
///
/// Values use Rust's shortest round-trip formatting, so a fruit width of
/// `0.045` appears as `0.045` and an effort of `40.0` as `40`.
pub fn format_goal(goal: &GripperGoal) -> String {
    format!(
        "{{ command: {{ position: {}, max_effort: {}, max_speed: {} }}}}",
        goal.position, goal.max_effort, goal.max_speed
    )
}

#[derive(Debug, Clone)]
pub struct CommandLineGripper {
    id: String,
    program: String,
    leading_args: Vec<String>,
    action: String,
    action_type: String,
    timeout: Duration,
}

impl CommandLineGripper {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: DEFAULT_PROGRAM.to_string(),
            leading_args: Vec::new(),
            action: DEFAULT_ACTION.to_string(),
            action_type: DEFAULT_ACTION_TYPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments placed before `action send_goal …`, e.g. to run the CLI
    /// through a wrapper.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = action_type.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full argument vector (without the program) for `goal`.
    pub fn command_args(&self, goal: &GripperGoal) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "action".to_string(),
            "send_goal".to_string(),
            "-f".to_string(),
            self.action.clone(),
            self.action_type.clone(),
            format_goal(goal),
        ]);
        args
    }

    /// The invocation as a human-readable command line, for logs.
    pub fn command_line(&self, goal: &GripperGoal) -> String {
        let mut line = self.program.clone();
        for arg in self.command_args(goal) {
            line.push(' ');
            if arg.contains(' ') {
                line.push('\'');
                line.push_str(&arg);
                line.push('\'');
            } else {
                line.push_str(&arg);
            }
        }
        line
    }
}

#[async_trait]
impl Gripper for CommandLineGripper {
    fn id(&self) -> &str {
        &self.id
    }

    async fn command(&self, goal: GripperGoal) -> Result<GripperOutcome, HarvestError> {
        debug!(gripper = %self.id, command = %self.command_line(&goal), "sending gripper goal");

        let child = Command::new(&self.program)
            .args(self.command_args(&goal))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarvestError::Gripper {
                component: self.id.clone(),
                details: format!("failed to spawn '{}': {e}", self.program),
            })?;

        // Dropping the wait future on expiry drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| HarvestError::Gripper {
                component: self.id.clone(),
                details: format!("failed to wait for '{}': {e}", self.program),
            })?,
            Err(_) => {
                warn!(gripper = %self.id, timeout_s = self.timeout.as_secs_f64(), "gripper command timed out; child killed");
                return Err(HarvestError::Timeout {
                    operation: format!("gripper command on {}", self.id),
                    seconds: self.timeout.as_secs_f64(),
                });
            }
        };

        if output.status.success() {
            info!(gripper = %self.id, position = goal.position, "Command executed successfully.");
            Ok(GripperOutcome::Succeeded)
        } else {
            let details = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(gripper = %self.id, status = %output.status, %details, "Command execution failed.");
            Ok(GripperOutcome::Failed {
                exit_code: output.status.code(),
                details,
            })
        }
    }
}
