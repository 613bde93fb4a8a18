use clap::Parser;
use std::path::PathBuf;

/// Streams toothbrush telemetry from BlueZ as JSON lines.
#[derive(Debug, PartialEq, Parser)]
#[command(name = "bluetooth-devices", version)]
pub struct Opts {
    /// JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs to a file instead of stderr.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Opts {
    pub fn from_env() -> Self {
        Opts::parse()
    }

    pub fn level_filter(&self, debug_logs: bool) -> log::LevelFilter {
        if self.verbose || debug_logs {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}
