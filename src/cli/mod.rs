pub mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::parse_duration;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "Polls feeds and delivers new items", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/tributary/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Concurrent source checks per destination (overrides config)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Tick cadence (e.g., "30s", "1m")
        #[arg(short, long, value_parser = parse_duration)]
        tick: Option<Duration>,
    },
    /// Check destinations once, ignoring their intervals
    Check {
        /// Only this destination (1-based, as listed by `status`)
        #[arg(short, long)]
        destination: Option<usize>,
    },
    /// Show cache contents per destination and source
    Status,
    /// List parsers in the order they are tried
    Parsers,
}
