//! Monitor binary - console statistics for the merged stream
//!
//! Usage:
//!   cargo run --bin monitor -- --config config.toml
//!   cargo run --bin monitor -- -a tcp://localhost:5557

use clap::Parser;
use delila2_rs::common::cli::MonitorArgs;
use delila2_rs::common::shutdown::setup_shutdown;
use delila2_rs::config::Config;
use delila2_rs::monitor::{Monitor, MonitorConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("delila2_rs=info".parse()?))
        .init();

    let args = MonitorArgs::parse();

    let config_path = &args.common.config_file;
    let monitor_config = if std::path::Path::new(config_path).exists() {
        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                std::process::exit(1);
            }
        };
        info!(config_file = %config_path, "Loaded configuration");

        let file_monitor = config.network.monitor.clone();
        MonitorConfig {
            subscribe_address: args
                .address
                .clone()
                .or_else(|| file_monitor.as_ref().map(|m| m.subscribe.clone()))
                .unwrap_or_else(|| "tcp://localhost:5557".to_string()),
            command_address: file_monitor
                .as_ref()
                .map(|m| m.command.clone())
                .unwrap_or_else(|| "tcp://*:5590".to_string()),
            stats_interval_secs: file_monitor.map(|m| m.stats_interval_secs).unwrap_or(1),
            expected_sources: config.source_module_ids(),
            heartbeat_timeout_ms: config.heartbeat.timeout_ms,
        }
    } else {
        MonitorConfig {
            subscribe_address: args
                .address
                .clone()
                .unwrap_or_else(|| "tcp://localhost:5557".to_string()),
            ..Default::default()
        }
    };

    println!("Monitor running. Watching {}", monitor_config.subscribe_address);
    println!("Press Ctrl+C to stop.");

    let mut monitor = match Monitor::new(monitor_config) {
        Ok(monitor) => monitor,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let (_shutdown_tx, shutdown_rx) = setup_shutdown();
    if let Err(e) = monitor.run(shutdown_rx).await {
        eprintln!("Monitor failed: {e}");
        std::process::exit(2);
    }

    println!("Monitor stopped.");
    Ok(())
}
