//! CLI argument parsing for pipeline components
//!
//! # Design Principles (KISS)
//! - clap derive macros for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Each binary has its own Args struct that embeds CommonArgs
//!
//! Exit code convention for all binaries: 0 success, 1 configuration error,
//! 2 runtime fatal.

use clap::Parser;

/// Common arguments shared across all components
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,

    /// Enable LZ4 compression of outgoing batches
    #[arg(long)]
    pub compress: bool,
}

/// Arguments for the emulator source
#[derive(Parser, Debug, Clone)]
pub struct SourceArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source ID (0-indexed module number)
    #[arg(long = "source-id")]
    pub source_id: Option<u32>,

    /// Data bind address (e.g., tcp://*:5555)
    #[arg(long)]
    pub address: Option<String>,

    /// Events per batch
    #[arg(short, long)]
    pub events: Option<usize>,

    /// Batch interval in milliseconds (0 = full speed)
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Channels per module
    #[arg(long)]
    pub channels: Option<u8>,
}

/// Arguments for the merger (supports multiple upstream sources)
#[derive(Parser, Debug, Clone)]
pub struct MergerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Upstream address to connect to (can be given multiple times)
    #[arg(short = 's', long = "sub", action = clap::ArgAction::Append)]
    pub sub_addresses: Vec<String>,

    /// Downstream bind address
    #[arg(short = 'p', long = "pub")]
    pub pub_address: Option<String>,
}

/// Arguments for the recorder (file writer)
#[derive(Parser, Debug, Clone)]
pub struct RecorderArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Upstream address to connect to
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// Output directory for data files
    #[arg(short = 'o', long = "output")]
    pub output_dir: Option<String>,

    /// Data file name prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

/// Arguments for the monitor (console statistics)
#[derive(Parser, Debug, Clone)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Upstream address to connect to
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,
}

/// Arguments for the operator (fleet coordinator)
#[derive(Parser, Debug, Clone)]
pub struct OperatorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Run number for the acquisition cycle
    #[arg(long, default_value = "1")]
    pub run_number: u32,
}

/// Arguments for the controller (one-shot CLI control client)
#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Target component's control address (e.g., tcp://localhost:5560)
    #[arg(short, long)]
    pub address: String,

    /// Command to send (GetStatus, Configure, Arm, Start, Stop, Reset)
    #[arg(short, long)]
    pub command: String,

    /// Run number (required for Start)
    #[arg(long)]
    pub run_number: Option<u32>,

    /// Emergency stop (drop in-flight data instead of flushing)
    #[arg(long)]
    pub emergency: bool,
}
