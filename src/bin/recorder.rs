//! Recorder binary - writes raw data frames to run files
//!
//! Usage:
//!   cargo run --bin recorder -- --config config.toml
//!   cargo run --bin recorder -- -a tcp://localhost:5557 -o ./data --prefix run

use std::path::PathBuf;

use clap::Parser;
use delila2_rs::common::cli::RecorderArgs;
use delila2_rs::common::shutdown::setup_shutdown;
use delila2_rs::config::Config;
use delila2_rs::recorder::{Recorder, RecorderConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("delila2_rs=info".parse()?))
        .init();

    let args = RecorderArgs::parse();

    let config_path = &args.common.config_file;
    let recorder_config = if std::path::Path::new(config_path).exists() {
        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                std::process::exit(1);
            }
        };
        info!(config_file = %config_path, "Loaded configuration");

        let file_recorder = config.network.recorder.clone();
        RecorderConfig {
            subscribe_address: args
                .address
                .clone()
                .or_else(|| file_recorder.as_ref().map(|r| r.subscribe.clone()))
                .unwrap_or_else(|| "tcp://localhost:5557".to_string()),
            command_address: file_recorder
                .as_ref()
                .map(|r| r.command.clone())
                .unwrap_or_else(|| "tcp://*:5580".to_string()),
            output_dir: PathBuf::from(
                args.output_dir
                    .clone()
                    .or_else(|| file_recorder.as_ref().map(|r| r.output_dir.clone()))
                    .unwrap_or_else(|| "./data".to_string()),
            ),
            file_prefix: args
                .prefix
                .clone()
                .or_else(|| file_recorder.as_ref().map(|r| r.file_prefix.clone()))
                .unwrap_or_else(|| "run".to_string()),
            max_file_size: file_recorder
                .as_ref()
                .map(|r| r.max_file_size)
                .unwrap_or(1024 * 1024 * 1024),
            max_file_duration_secs: file_recorder
                .map(|r| r.max_file_duration_secs)
                .unwrap_or(600),
            expected_sources: config.source_module_ids(),
            heartbeat_timeout_ms: config.heartbeat.timeout_ms,
            ..Default::default()
        }
    } else {
        RecorderConfig {
            subscribe_address: args
                .address
                .clone()
                .unwrap_or_else(|| "tcp://localhost:5557".to_string()),
            output_dir: PathBuf::from(args.output_dir.clone().unwrap_or_else(|| "./data".into())),
            file_prefix: args.prefix.clone().unwrap_or_else(|| "run".to_string()),
            ..Default::default()
        }
    };

    println!(
        "Recorder running. {} -> {}",
        recorder_config.subscribe_address,
        recorder_config.output_dir.display()
    );
    println!("Press Ctrl+C to stop.");

    let mut recorder = match Recorder::new(recorder_config) {
        Ok(recorder) => recorder,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let (_shutdown_tx, shutdown_rx) = setup_shutdown();
    if let Err(e) = recorder.run(shutdown_rx).await {
        eprintln!("Recorder failed: {e}");
        std::process::exit(2);
    }

    println!("Recorder stopped.");
    Ok(())
}
