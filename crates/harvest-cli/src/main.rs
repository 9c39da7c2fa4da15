//! `harvest` – pick-and-place harvesting loop.
//!
//! 1. Loads `~/.harvest/config.toml`, writing the defaults on first run, and
//!    applies `HARVEST_*` overrides.
//! 2. Starts the perception listener and, when `rosbridge_url` is set, the
//!    rosbridge client that feeds it and forwards markers and status.
//! 3. Runs the startup pass and then the pick-place loop until **Ctrl-C**
//!    (or the operator typing `q` at a prompt).

mod config;
mod prompt;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use harvest_hal::sim::{SimGripper, SimMoveGroup};
use harvest_hal::{CommandLineGripper, Gripper};
use harvest_middleware::{EventBus, RosbridgeClient};
use harvest_perception::PerceptionListener;
use harvest_runtime::{PickPlaceOrchestrator, RunSummary, init_tracing};
use harvest_types::HarvestError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, GripperDriver};
use crate::prompt::StdinPrompt;

/// How long one simulated arm motion takes.
const SIM_MOTION_TIME: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let telemetry = init_tracing("harvest");
    if telemetry.is_exporting() {
        info!("exporting spans over OTLP");
    }

    print_banner();

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the arm loop …".yellow().bold());
        ctrlc_cancel.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the loop with 'q' at a prompt");
    }

    let cfg = load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cfg, cancel));
    // A prompt may still be blocked reading stdin.
    runtime.shutdown_timeout(Duration::from_millis(500));

    match result {
        Ok(summary) => {
            print_summary(&summary);
            println!("{}", "  ✓ Exiting harvest.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "harvest stopped");
            println!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Config {
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg
}

async fn run(cfg: Config, cancel: CancellationToken) -> Result<RunSummary, HarvestError> {
    let bus = EventBus::default();
    let listener = PerceptionListener::new();
    let spin = listener.attach(&bus, cancel.clone());

    let bridge = match &cfg.rosbridge_url {
        Some(url) => {
            let client = RosbridgeClient::new(url.clone(), bus.clone());
            let bridge_cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = client.run(bridge_cancel).await {
                    error!(error = %e, "rosbridge client stopped; perception is frozen at its last value");
                }
            }))
        }
        None => {
            warn!("no rosbridge_url configured; cycles will use the default target");
            None
        }
    };

    let gripper: Arc<dyn Gripper> = match cfg.gripper_driver {
        GripperDriver::CommandLine => {
            let driver = CommandLineGripper::new("robotiq")
                .with_program(cfg.gripper_program.clone())
                .with_action(cfg.gripper_action.clone())
                .with_timeout(cfg.gripper_timeout());
            info!(
                program = %cfg.gripper_program,
                action = %cfg.gripper_action,
                timeout_secs = driver.timeout().as_secs(),
                "command-line gripper driver"
            );
            Arc::new(driver)
        }
        GripperDriver::Sim => Arc::new(SimGripper::new("robotiq-sim")),
    };

    warn!(group = %cfg.planning_group, "using the in-process planning group; the arm is simulated");
    let move_group = SimMoveGroup::new()
        .with_planning_group(cfg.planning_group.clone())
        .with_motion_time(SIM_MOTION_TIME);

    let mut orchestrator = PickPlaceOrchestrator::new(
        cfg.orchestrator_config(),
        listener,
        Box::new(move_group),
        gripper,
    )
    .with_bus(bus)
    .with_prompt(Arc::new(StdinPrompt::new()));

    let result = match orchestrator.prepare(&cancel).await {
        Ok(()) => orchestrator.run(cancel.clone()).await,
        Err(HarvestError::Cancelled(reason)) => {
            info!(%reason, "stopped during startup");
            Ok(orchestrator.summary())
        }
        Err(e) => Err(e),
    };

    cancel.cancel();
    if let Ok(samples) = spin.await {
        info!(samples, "perception listener stopped");
    }
    if let Some(bridge) = bridge {
        let _ = bridge.await;
    }
    result
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  {}", "Run summary".bold());
    println!("    cycles completed   {}", summary.cycles_completed);
    println!("    planning failures  {}", summary.planning_failures);
    println!("    execution failures {}", summary.execution_failures);
    println!("    gripper failures   {}", summary.gripper_failures);
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().green());
    println!("{}", "  ║        H  A  R  V  E  S  T           ║".bold().green());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().green());
    println!();
    println!(
        "  {} {}",
        "harvest".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  UR arm + Robotiq gripper pick-and-place");
    println!();
}
