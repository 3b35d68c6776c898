//! Merger binary - concatenates upstream streams onto one PUB socket
//!
//! Usage:
//!   cargo run --bin merger -- --config config.toml
//!   cargo run --bin merger -- -s tcp://localhost:5555 -s tcp://localhost:5556 -p "tcp://*:5557"

use clap::Parser;
use delila2_rs::common::cli::MergerArgs;
use delila2_rs::common::shutdown::setup_shutdown;
use delila2_rs::config::Config;
use delila2_rs::merger::{Merger, MergerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("delila2_rs=info".parse()?))
        .init();

    let args = MergerArgs::parse();

    let config_path = &args.common.config_file;
    let merger_config = if std::path::Path::new(config_path).exists() {
        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                std::process::exit(1);
            }
        };
        info!(config_file = %config_path, "Loaded configuration");

        let file_merger = config.network.merger.clone();
        let sub_addresses = if !args.sub_addresses.is_empty() {
            args.sub_addresses.clone()
        } else if let Some(merger) = &file_merger {
            if merger.sub.is_empty() {
                config
                    .network
                    .sources
                    .iter()
                    .map(|s| s.connect_address())
                    .collect()
            } else {
                merger.sub.clone()
            }
        } else {
            Vec::new()
        };

        MergerConfig {
            sub_addresses,
            pub_address: args
                .pub_address
                .clone()
                .or_else(|| file_merger.as_ref().map(|m| m.pub_address.clone()))
                .unwrap_or_else(|| "tcp://*:5557".to_string()),
            command_address: file_merger
                .map(|m| m.command)
                .unwrap_or_else(|| "tcp://*:5570".to_string()),
            expected_sources: config.source_module_ids(),
            heartbeat_timeout_ms: config.heartbeat.timeout_ms,
        }
    } else {
        MergerConfig {
            sub_addresses: args.sub_addresses.clone(),
            pub_address: args
                .pub_address
                .clone()
                .unwrap_or_else(|| "tcp://*:5557".to_string()),
            ..Default::default()
        }
    };

    if merger_config.sub_addresses.is_empty() {
        eprintln!("Configuration error: no upstream addresses (use -s or a config file)");
        std::process::exit(1);
    }

    println!(
        "Merger running. {} upstream(s) -> {}",
        merger_config.sub_addresses.len(),
        merger_config.pub_address
    );
    println!("Press Ctrl+C to stop.");

    let (_shutdown_tx, shutdown_rx) = setup_shutdown();
    let mut merger = Merger::new(merger_config);
    if let Err(e) = merger.run(shutdown_rx).await {
        eprintln!("Merger failed: {e}");
        std::process::exit(2);
    }

    println!("Merger stopped.");
    Ok(())
}
