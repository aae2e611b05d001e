//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming marker-free tilt-series alignment", long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "TSALIGN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write daily rolling log files to this directory
    #[arg(long, global = true, env = "TSALIGN_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Align every tilt series of a streaming input collection
    Run(RunArgs),
    /// Print the merged configuration as TOML
    ShowConfig,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Input collection (JSON document, re-read while its stream is open)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory receiving the output collections
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Root of the per-item work directories
    #[arg(short, long, env = "TSALIGN_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Pause between polls of the input, in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval: Option<u64>,

    /// Maximum concurrent steps
    #[arg(long)]
    pub workers: Option<usize>,
}

impl Args {
    /// Overlay the global flags onto `config`.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if self.json_logs {
            config.logging.json = true;
        }
        if let Some(dir) = &self.log_dir {
            config.logging.dir = Some(dir.clone());
        }
        if let Command::Run(run) = &self.command {
            run.apply_to(config);
        }
    }
}

impl RunArgs {
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(ms) = self.poll_interval {
            config.scheduler.poll_interval_ms = ms;
        }
        if let Some(workers) = self.workers {
            config.scheduler.max_workers = workers;
        }
    }
}
