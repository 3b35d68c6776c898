//! Controller binary - one-shot control client for a single component
//!
//! Usage:
//!   cargo run --bin controller -- -a tcp://localhost:5560 -c GetStatus
//!   cargo run --bin controller -- -a tcp://localhost:5560 -c Configure
//!   cargo run --bin controller -- -a tcp://localhost:5560 -c Start --run-number 42
//!   cargo run --bin controller -- -a tcp://localhost:5560 -c Stop --emergency

use clap::Parser;
use delila2_rs::common::cli::ControllerArgs;
use delila2_rs::common::{ComponentState, ControlReply, ControlRequest, StateChangeCommand};
use delila2_rs::operator::ControlClient;
use tracing_subscriber::EnvFilter;

fn build_request(args: &ControllerArgs) -> Result<ControlRequest, String> {
    let command = args.command.to_ascii_lowercase();
    let request = match command.as_str() {
        "getstatus" | "status" => ControlRequest::GetStatus,
        "configure" => ControlRequest::StateChange(StateChangeCommand::new(
            "controller",
            ComponentState::Configured,
            0,
        )),
        "arm" => ControlRequest::StateChange(StateChangeCommand::new(
            "controller",
            ComponentState::Armed,
            0,
        )),
        "start" => {
            let run_number = args
                .run_number
                .ok_or_else(|| "Start requires --run-number".to_string())?;
            ControlRequest::StateChange(
                StateChangeCommand::new("controller", ComponentState::Running, 0)
                    .with_run_number(run_number),
            )
        }
        "stop" => ControlRequest::StateChange(
            StateChangeCommand::new("controller", ComponentState::Configured, 0)
                .with_graceful(!args.emergency),
        ),
        "reset" => ControlRequest::StateChange(StateChangeCommand::new(
            "controller",
            ComponentState::Idle,
            0,
        )),
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(request)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("delila2_rs=warn".parse()?))
        .init();

    let args = ControllerArgs::parse();

    let request = match build_request(&args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let client = ControlClient::new();
    match client.send_request(&args.address, &request).await {
        Ok(ControlReply::StateChange(response)) => {
            println!(
                "{}: success={} state={}",
                response.module_id, response.success, response.current_state
            );
            if !response.error_message.is_empty() {
                println!("  error: {}", response.error_message);
            }
            if !response.success {
                std::process::exit(2);
            }
        }
        Ok(ControlReply::Status(report)) => {
            println!("{}: state={}", report.module_id, report.state);
            if let Some(run) = report.run_number {
                println!("  run_number: {run}");
            }
            println!("  data_rate: {:.2} MB/s", report.data_rate_mbps);
            println!("  errors: {}", report.error_counter);
            println!("  processed: {} bytes", report.processed_bytes);
            if !report.error_message.is_empty() {
                println!("  error: {}", report.error_message);
            }
        }
        Err(e) => {
            eprintln!("Request failed: {e}");
            std::process::exit(2);
        }
    }

    Ok(())
}
