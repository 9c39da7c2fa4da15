//! Configuration vault – reads/writes `~/.harvest/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use harvest_hal::command_line::{DEFAULT_ACTION, DEFAULT_PROGRAM};
use harvest_runtime::{OrchestratorConfig, PlanFailurePolicy, PromptMode};
use harvest_types::HarvestError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which gripper client the binary drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperDriver {
    /// Shell out to the action command-line client once per command.
    #[default]
    CommandLine,
    /// In-process stand-in that always succeeds.
    Sim,
}

impl FromStr for GripperDriver {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "command_line" => Ok(Self::CommandLine),
            "sim" => Ok(Self::Sim),
            other => Err(HarvestError::Config(format!(
                "unknown gripper driver '{other}' (expected command_line or sim)"
            ))),
        }
    }
}

/// Persisted operator configuration stored in `~/.harvest/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// rosbridge WebSocket URL, e.g. `ws://localhost:9090`.  Without it no
    /// perception arrives and every cycle uses the default target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rosbridge_url: Option<String>,

    #[serde(default = "default_planning_group")]
    pub planning_group: String,

    #[serde(default)]
    pub gripper_driver: GripperDriver,

    /// Program that sends gripper action goals.
    #[serde(default = "default_gripper_program")]
    pub gripper_program: String,

    #[serde(default = "default_gripper_action")]
    pub gripper_action: String,

    #[serde(default = "default_gripper_timeout_secs")]
    pub gripper_timeout_secs: u64,

    #[serde(default)]
    pub prompt: PromptMode,

    #[serde(default)]
    pub on_plan_failure: PlanFailurePolicy,

    #[serde(default = "default_failure_streak_threshold")]
    pub failure_streak_threshold: usize,
}

fn default_planning_group() -> String {
    "ur_manipulator".to_string()
}
fn default_gripper_program() -> String {
    DEFAULT_PROGRAM.to_string()
}
fn default_gripper_action() -> String {
    DEFAULT_ACTION.to_string()
}
fn default_gripper_timeout_secs() -> u64 {
    30
}
fn default_failure_streak_threshold() -> usize {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rosbridge_url: None,
            planning_group: default_planning_group(),
            gripper_driver: GripperDriver::default(),
            gripper_program: default_gripper_program(),
            gripper_action: default_gripper_action(),
            gripper_timeout_secs: default_gripper_timeout_secs(),
            prompt: PromptMode::default(),
            on_plan_failure: PlanFailurePolicy::default(),
            failure_streak_threshold: default_failure_streak_threshold(),
        }
    }
}

impl Config {
    pub fn gripper_timeout(&self) -> Duration {
        Duration::from_secs(self.gripper_timeout_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            on_plan_failure: self.on_plan_failure,
            prompt: self.prompt,
            failure_streak_threshold: self.failure_streak_threshold,
        }
    }
}

/// Return the path to `~/.harvest/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".harvest").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, HarvestError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, HarvestError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        HarvestError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| HarvestError::Config(format!("failed to parse config: {e}")))?;
    if cfg.gripper_timeout_secs == 0 {
        return Err(HarvestError::Config(
            "gripper_timeout_secs must be at least 1".to_string(),
        ));
    }
    Ok(Some(cfg))
}

/// Apply `HARVEST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HARVEST_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `HARVEST_GRIPPER_DRIVER` | `gripper_driver` |
/// | `HARVEST_PROMPT` | `prompt` |
/// | `HARVEST_ON_PLAN_FAILURE` | `on_plan_failure` |
/// | `HARVEST_GRIPPER_TIMEOUT_SECS` | `gripper_timeout_secs` |
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("HARVEST_ROSBRIDGE_URL") {
        cfg.rosbridge_url = if v.trim().is_empty() { None } else { Some(v) };
    }
    if let Some(v) = lookup("HARVEST_GRIPPER_DRIVER") {
        match v.parse() {
            Ok(driver) => cfg.gripper_driver = driver,
            Err(e) => warn!(error = %e, "ignoring HARVEST_GRIPPER_DRIVER"),
        }
    }
    if let Some(v) = lookup("HARVEST_PROMPT") {
        match v.parse() {
            Ok(mode) => cfg.prompt = mode,
            Err(e) => warn!(error = %e, "ignoring HARVEST_PROMPT"),
        }
    }
    if let Some(v) = lookup("HARVEST_ON_PLAN_FAILURE") {
        match v.parse() {
            Ok(policy) => cfg.on_plan_failure = policy,
            Err(e) => warn!(error = %e, "ignoring HARVEST_ON_PLAN_FAILURE"),
        }
    }
    if let Some(v) = lookup("HARVEST_GRIPPER_TIMEOUT_SECS") {
        match parse_timeout_secs(&v) {
            Ok(secs) => cfg.gripper_timeout_secs = secs,
            Err(e) => warn!(error = %e, "ignoring HARVEST_GRIPPER_TIMEOUT_SECS"),
        }
    }
}

/// A gripper timeout must be a whole number of seconds, at least 1.
fn parse_timeout_secs(raw: &str) -> Result<u64, HarvestError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(HarvestError::Config(
            "gripper_timeout_secs must be at least 1".to_string(),
        )),
        Ok(secs) => Ok(secs),
        Err(e) => Err(HarvestError::Config(format!(
            "invalid gripper_timeout_secs '{}': {e}",
            raw.trim()
        ))),
    }
}

/// Save the config to disk, creating `~/.harvest/` if necessary.
pub fn save(cfg: &Config) -> Result<(), HarvestError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            HarvestError::Config(format!("failed to create config directory: {e}"))
        })?;
        // rwx------
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                HarvestError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| HarvestError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| HarvestError::Config(format!("failed to write config at {}: {e}", path.display()));
    // rw-------
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
