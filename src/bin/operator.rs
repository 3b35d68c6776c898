//! Operator binary - drives a full acquisition cycle across the fleet
//!
//! Configures, arms and starts every component listed in the config file,
//! then stops the run gracefully on Ctrl+C.
//!
//! Usage:
//!   cargo run --bin operator -- --config config.toml --run-number 42

use std::time::Duration;

use clap::Parser;
use delila2_rs::common::cli::OperatorArgs;
use delila2_rs::common::ComponentState;
use delila2_rs::config::Config;
use delila2_rs::operator::{JobStatus, Operator};
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn wait_for_job(operator: &Operator, job_id: &str, what: &str) -> Result<(), String> {
    loop {
        match operator.job_status(job_id) {
            Some(JobStatus::Completed) => return Ok(()),
            Some(JobStatus::Failed(reason)) => return Err(format!("{what} failed: {reason}")),
            Some(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            None => return Err(format!("{what}: unknown job {job_id}")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("delila2_rs=info".parse()?))
        .init();

    let args = OperatorArgs::parse();

    let config = match Config::load(&args.common.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    let operator_config = config.operator_config();
    if operator_config.components.is_empty() {
        eprintln!("Configuration error: no components in fleet");
        std::process::exit(1);
    }

    info!(
        components = operator_config.components.len(),
        run_number = args.run_number,
        "Operator starting acquisition cycle"
    );
    let operator = Operator::new(operator_config);

    println!("Fleet: {:?}", operator.component_ids());

    let cycle = async {
        let job = operator.configure_all_async();
        wait_for_job(&operator, &job, "configure").await?;
        println!("Fleet configured.");

        let job = operator.arm_all_async();
        wait_for_job(&operator, &job, "arm").await?;
        println!("Fleet armed.");

        let job = operator.start_all_async(args.run_number);
        wait_for_job(&operator, &job, "start").await?;
        println!("Run {} started. Press Ctrl+C to stop.", args.run_number);
        Ok::<(), String>(())
    };

    if let Err(e) = cycle.await {
        eprintln!("{e}");
        // Leave the fleet in a defined state before giving up
        let job = operator.reset_all_async();
        let _ = wait_for_job(&operator, &job, "reset").await;
        std::process::exit(2);
    }

    tokio::signal::ctrl_c().await?;
    println!("\nStopping run {}...", args.run_number);

    let job = operator.stop_all_async(true);
    if let Err(e) = wait_for_job(&operator, &job, "stop").await {
        eprintln!("{e}");
        std::process::exit(2);
    }

    if operator.is_all_in_state(ComponentState::Configured).await {
        println!("Run {} stopped, fleet back in Configured.", args.run_number);
    } else {
        for status in operator.all_component_status().await {
            println!(
                "  {}: {} (online={}, errors={})",
                status.id, status.state, status.online, status.error_counter
            );
        }
    }

    Ok(())
}
