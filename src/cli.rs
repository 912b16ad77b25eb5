use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hydromux",
    version,
    about = "Hardware I/O aggregation core for hydronic heating controllers"
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the hardware online and run the control-step pump.
    Run,
    /// Validate the configuration and print a summary, without touching
    /// hardware.
    Check,
}

/// Default config location: `$XDG_CONFIG_HOME/hydromux/config.yaml`, with
/// a relative fallback for containerized deployments.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("hydromux/config.yaml"))
        .unwrap_or_else(|| PathBuf::from("config/hydromux.yaml"))
}
