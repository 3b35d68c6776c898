//! Emulator binary - publishes dummy event data via ZeroMQ
//!
//! Usage:
//!   cargo run --bin emulator                           # Use defaults
//!   cargo run --bin emulator -- --config config.toml   # Use config file
//!   cargo run --bin emulator -- --batches 10           # Run for 10 batches
//!   cargo run --bin emulator -- --source-id 1          # Use specific source

use clap::Parser;
use delila2_rs::common::cli::SourceArgs;
use delila2_rs::common::shutdown::setup_shutdown;
use delila2_rs::config::Config;
use delila2_rs::emulator::{Emulator, EmulatorConfig};
use delila2_rs::serializer::SerializerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Emulator - publishes dummy event data via ZeroMQ
#[derive(Parser, Debug)]
#[command(name = "emulator", about = "DELILA2 data source emulator")]
struct Args {
    #[command(flatten)]
    source: SourceArgs,

    /// Run for N batches then send EOS and exit
    #[arg(short, long)]
    batches: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("delila2_rs=info".parse()?))
        .init();

    let args = Args::parse();
    let sid = args.source.source_id.unwrap_or(0);

    let config_path = &args.source.common.config_file;
    let emulator_config = if std::path::Path::new(config_path).exists() {
        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                std::process::exit(1);
            }
        };
        info!(config_file = %config_path, source_id = sid, "Loaded configuration");

        let source = config.get_source(sid);
        let mut serializer = config.serializer_config();
        if args.source.common.compress {
            serializer.compression_enabled = true;
        }

        EmulatorConfig {
            address: args
                .source
                .address
                .clone()
                .or_else(|| source.map(|s| s.bind.clone()))
                .unwrap_or_else(|| format!("tcp://*:{}", 5555 + sid as u16)),
            command_address: source
                .map(|s| s.command_address())
                .unwrap_or_else(|| format!("tcp://*:{}", 5560 + sid as u16)),
            status_address: source.and_then(|s| s.status.clone()),
            source_id: sid,
            events_per_batch: args
                .source
                .events
                .or_else(|| source.map(|s| s.events_per_batch))
                .unwrap_or(100),
            batch_interval_ms: args
                .source
                .interval
                .or_else(|| source.map(|s| s.batch_interval_ms))
                .unwrap_or(100),
            heartbeat_interval_ms: config.heartbeat.interval_ms,
            channels_per_module: args
                .source
                .channels
                .or_else(|| source.map(|s| s.channels_per_module))
                .unwrap_or(16),
            enable_waveform: source.map(|s| s.enable_waveform).unwrap_or(false),
            waveform_samples: source.map(|s| s.waveform_samples).unwrap_or(0),
            serializer,
        }
    } else {
        EmulatorConfig {
            address: args
                .source
                .address
                .clone()
                .unwrap_or_else(|| format!("tcp://*:{}", 5555 + sid as u16)),
            command_address: format!("tcp://*:{}", 5560 + sid as u16),
            source_id: sid,
            events_per_batch: args.source.events.unwrap_or(100),
            batch_interval_ms: args.source.interval.unwrap_or(100),
            channels_per_module: args.source.channels.unwrap_or(16),
            serializer: SerializerConfig {
                compression_enabled: args.source.common.compress,
                compression_level: 1,
            },
            ..Default::default()
        }
    };

    let mut emulator = match Emulator::new(emulator_config.clone()) {
        Ok(emulator) => emulator,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "Emulator running. source_id={}, publishing to {}",
        emulator_config.source_id, emulator_config.address
    );

    let result = if let Some(count) = args.batches {
        println!("Will send {count} batches then EOS.");
        emulator.run_batches(count).await
    } else {
        println!("Press Ctrl+C to stop.");
        let (_shutdown_tx, shutdown_rx) = setup_shutdown();
        emulator.run(shutdown_rx).await
    };

    if let Err(e) = result {
        eprintln!("Emulator failed: {e}");
        std::process::exit(2);
    }

    println!("Emulator stopped.");
    Ok(())
}
