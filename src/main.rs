//! CLI Entry Point for refl-daq
//!
//! - `run`: execute a measurement script against the simulated beamline
//!   (or estimate it with `--dry-run`)
//! - `plan`: print the dry-run plan, optionally as JSON
//! - `check`: validate configuration and script without running anything
//!
//! # Usage
//!
//! ```bash
//! refl-daq run demos/quartz.toml --config config/refl_daq.toml
//! refl-daq plan demos/quartz.toml --json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use refl_daq::config::ScriptConfig;
use refl_daq::console::{SharedConsole, StdConsole};
use refl_daq::experiment::{
    Beamline, DryRunActions, FootprintGapCalculator, LiveActions, ScriptSession,
};
use refl_daq::hardware::MockBeamline;
use refl_daq::interrupt::InterruptSignal;
use refl_daq::script::ScriptFile;
use refl_daq::tracing_config::{self, OutputFormat, TracingConfig};

#[derive(Parser)]
#[command(name = "refl-daq")]
#[command(about = "Reflectometry measurement scripts with dry-run estimates", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/refl_daq.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a measurement script
    Run {
        /// Path to the script TOML file
        script: PathBuf,

        /// Only estimate durations; nothing moves
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the dry-run plan of a script
    Plan {
        script: PathBuf,

        /// Emit the plan as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and script
    Check { script: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScriptConfig::load_from(cli.config.as_ref()).context("loading configuration")?;
    config.validate()?;

    let level = tracing_config::parse_log_level(&config.application.log_level)
        .map_err(anyhow::Error::msg)?;
    tracing_config::init(TracingConfig::new(level).with_format(cli.log_format))
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run { script, dry_run } => run_script(&config, script, dry_run).await,
        Commands::Plan { script, json } => plan_script(&config, script, json).await,
        Commands::Check { script } => check_script(&config, script),
    }
}

fn load_script(path: &Path) -> Result<ScriptFile> {
    ScriptFile::load(path).with_context(|| format!("loading script {}", path.display()))
}

async fn run_script(config: &ScriptConfig, path: PathBuf, dry_run: bool) -> Result<()> {
    let script = load_script(&path)?;
    let console: SharedConsole = Arc::new(StdConsole::new());
    let dry = DryRunActions::new(config.estimator, console.clone());

    let mut session = if dry_run {
        ScriptSession::dry(dry)
    } else {
        info!(instrument = %config.constants.instrument, "Using simulated beamline");
        let interrupt = InterruptSignal::new();
        let _ctrl_c = interrupt.install_ctrl_c();

        let mock = Arc::new(MockBeamline::new().with_laser("KEYENCE", "HEIGHT", 0.0));
        let beamline = Beamline::new(mock.clone(), mock, console.clone(), interrupt);
        let live = LiveActions::new(
            beamline,
            config.constants_provider(),
            Arc::new(FootprintGapCalculator),
        )
        .with_decision_delay(config.recovery.decision_delay());
        ScriptSession::live(live, dry)
    };

    match script.run(&mut session).await {
        Ok(outcomes) => {
            info!(actions = outcomes.len(), "Script completed");
            if session.is_dry_run() {
                let total = session.estimator().total_minutes() as u64;
                console.status(&format!(
                    "Estimated total: {:02}:{:02} hh:mm",
                    total / 60,
                    total % 60
                ));
            }
            Ok(())
        }
        Err(e) if e.is_interrupt() => {
            error!("Script stopped by operator");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Script failed");
            Err(e.into())
        }
    }
}

async fn plan_script(config: &ScriptConfig, path: PathBuf, json: bool) -> Result<()> {
    if !json {
        return run_script(config, path, true).await;
    }
    let script = load_script(&path)?;

    let quiet: SharedConsole = Arc::new(refl_daq::console::ScriptedConsole::default());
    let mut session = ScriptSession::dry(DryRunActions::new(config.estimator, quiet));
    let entries: Vec<_> = script
        .run(&mut session)
        .await?
        .into_iter()
        .filter_map(|outcome| outcome.plan_entry().cloned())
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn check_script(config: &ScriptConfig, path: PathBuf) -> Result<()> {
    let script = load_script(&path)?;
    let requests = script.requests()?;
    println!(
        "OK: {} samples, {} actions, instrument {}",
        script.samples.len(),
        requests.len(),
        config.constants.instrument
    );
    Ok(())
}
