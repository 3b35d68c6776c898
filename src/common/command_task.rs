//! Control-channel listener for ZMQ REP sockets
//!
//! Every data component spawns this task. It:
//! - Binds a ZMQ REP socket on the component's control address
//! - Deserializes incoming JSON `ControlRequest`s
//! - Drives the component FSM (state changes) or builds a status report
//! - Serializes and sends the `ControlReply`
//! - Observes the shutdown broadcast

use std::sync::Arc;

use tmq::{request_reply, Context};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use super::command::{ControlReply, ControlRequest, StateChangeResponse};
use super::fsm::{ComponentFsm, ComponentHooks};

/// Run the control listener for a component
///
/// The hooks live behind a tokio `Mutex` because state-change hooks need
/// mutable access while the run loop may also be querying metrics. The FSM
/// itself serializes transitions internally.
pub async fn run_control_task<H>(
    command_address: String,
    fsm: Arc<ComponentFsm>,
    hooks: Arc<Mutex<H>>,
    mut shutdown: broadcast::Receiver<()>,
) where
    H: ComponentHooks + Send + 'static,
{
    let context = Context::new();

    let receiver = match request_reply::reply(&context).bind(&command_address) {
        Ok(r) => r,
        Err(e) => {
            warn!(
                module = %fsm.module_id(),
                error = %e,
                address = %command_address,
                "Failed to bind control socket"
            );
            fsm.fault(format!("control bind failed on {command_address}: {e}"));
            return;
        }
    };

    info!(
        module = %fsm.module_id(),
        address = %command_address,
        "Control task started"
    );

    let mut current_receiver = receiver;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!(module = %fsm.module_id(), "Control task received shutdown signal");
                break;
            }

            recv_result = current_receiver.recv() => {
                match recv_result {
                    Ok((mut multipart, sender)) => {
                        let reply = if let Some(frame) = multipart.pop_front() {
                            match ControlRequest::from_json(&frame) {
                                Ok(ControlRequest::StateChange(cmd)) => {
                                    info!(
                                        module = %fsm.module_id(),
                                        command = %cmd,
                                        "Received state change command"
                                    );
                                    let mut hooks = hooks.lock().await;
                                    ControlReply::StateChange(
                                        fsm.handle_command(&cmd, &mut *hooks),
                                    )
                                }
                                Ok(ControlRequest::GetStatus) => {
                                    let hooks = hooks.lock().await;
                                    ControlReply::Status(fsm.status_report(&*hooks))
                                }
                                Err(e) => {
                                    warn!(
                                        module = %fsm.module_id(),
                                        error = %e,
                                        "Invalid control request"
                                    );
                                    ControlReply::StateChange(StateChangeResponse::error(
                                        fsm.module_id(),
                                        fsm.state(),
                                        format!("Invalid request: {e}"),
                                    ))
                                }
                            }
                        } else {
                            ControlReply::StateChange(StateChangeResponse::error(
                                fsm.module_id(),
                                fsm.state(),
                                "Empty message",
                            ))
                        };

                        let reply_bytes = match reply.to_json() {
                            Ok(b) => b,
                            Err(e) => {
                                warn!(
                                    module = %fsm.module_id(),
                                    error = %e,
                                    "Failed to serialize reply"
                                );
                                break;
                            }
                        };

                        let reply_msg: tmq::Multipart =
                            vec![tmq::Message::from(reply_bytes.as_slice())].into();

                        match sender.send(reply_msg).await {
                            Ok(next_receiver) => {
                                current_receiver = next_receiver;
                            }
                            Err(e) => {
                                warn!(
                                    module = %fsm.module_id(),
                                    error = %e,
                                    "Failed to send reply"
                                );
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            module = %fsm.module_id(),
                            error = %e,
                            "Control receive error"
                        );
                        break;
                    }
                }
            }
        }
    }

    info!(module = %fsm.module_id(), "Control task stopped");
}
