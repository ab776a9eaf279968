//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Keeps the non-blocking file writer alive for the life of the process.
pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "flowdose",
    version,
    about = "Volumetric batch-dosing controller"
)]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/flowdose.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dosing engine until Ctrl-C or a fatal watchdog trip
    Run {
        /// Override the boot batch target, in liters
        #[arg(long, value_name = "LITERS")]
        target: Option<f64>,

        /// Use simulated hardware even in a hardware-enabled build
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,

        /// Steady-state flow of the simulated sensor, in L/min
        #[arg(long, value_name = "LPM", default_value_t = 60.0)]
        sim_flow: f64,
    },
    /// Validate the config file and exit
    CheckConfig,
}
