//! ZeroMQ client for talking to component control sockets

use std::time::Duration;

use tmq::{request_reply, Context};
use tokio::time::timeout;

use crate::common::{
    ComponentState, ControlReply, ControlRequest, StateChangeCommand, StateChangeResponse,
    StatusReport,
};

use super::{ComponentEntry, ComponentStatus};

/// Default timeout for one request/reply exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// REQ/REP client used by the operator and the controller CLI
pub struct ControlClient {
    context: Context,
    request_timeout: Duration,
}

impl Default for ControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlClient {
    /// Create a client with the default request timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self {
            context: Context::new(),
            request_timeout,
        }
    }

    /// One request/reply exchange with a component
    ///
    /// A fresh REQ socket per request keeps the strict send/recv alternation
    /// intact even after timeouts.
    pub async fn send_request(
        &self,
        address: &str,
        request: &ControlRequest,
    ) -> Result<ControlReply, String> {
        let requester = request_reply::request(&self.context)
            .connect(address)
            .map_err(|e| format!("Failed to connect to {address}: {e}"))?;

        let request_bytes = request
            .to_json()
            .map_err(|e| format!("Failed to serialize request: {e}"))?;

        let msg: tmq::Multipart = vec![tmq::Message::from(request_bytes.as_slice())].into();
        let responder = timeout(self.request_timeout, requester.send(msg))
            .await
            .map_err(|_| format!("Timeout sending to {address}"))?
            .map_err(|e| format!("Failed to send to {address}: {e}"))?;

        let (mut reply_msg, _) = timeout(self.request_timeout, responder.recv())
            .await
            .map_err(|_| format!("Timeout receiving from {address}"))?
            .map_err(|e| format!("Failed to receive from {address}: {e}"))?;

        if let Some(frame) = reply_msg.pop_front() {
            ControlReply::from_json(&frame).map_err(|e| format!("Failed to parse reply: {e}"))
        } else {
            Err("Empty reply received".to_string())
        }
    }

    /// Send a state change command and return the component's response
    pub async fn state_change(
        &self,
        address: &str,
        command: StateChangeCommand,
    ) -> Result<StateChangeResponse, String> {
        match self
            .send_request(address, &ControlRequest::StateChange(command))
            .await?
        {
            ControlReply::StateChange(response) => Ok(response),
            ControlReply::Status(_) => Err("Unexpected status reply".to_string()),
        }
    }

    /// Query a component's status report
    pub async fn status_report(&self, address: &str) -> Result<StatusReport, String> {
        match self
            .send_request(address, &ControlRequest::GetStatus)
            .await?
        {
            ControlReply::Status(report) => Ok(report),
            ControlReply::StateChange(_) => Err("Unexpected state change reply".to_string()),
        }
    }

    /// Status of one fleet component, marking unreachable ones offline
    pub async fn component_status(&self, entry: &ComponentEntry) -> ComponentStatus {
        match self.status_report(&entry.control_address).await {
            Ok(report) => ComponentStatus {
                id: entry.id.clone(),
                control_address: entry.control_address.clone(),
                state: report.state,
                run_number: report.run_number,
                data_rate_mbps: report.data_rate_mbps,
                error_counter: report.error_counter,
                processed_bytes: report.processed_bytes,
                error: (!report.error_message.is_empty()).then_some(report.error_message),
                online: true,
            },
            Err(e) => ComponentStatus {
                id: entry.id.clone(),
                control_address: entry.control_address.clone(),
                state: ComponentState::Idle,
                run_number: None,
                data_rate_mbps: 0.0,
                error_counter: 0,
                processed_bytes: 0,
                error: Some(e),
                online: false,
            },
        }
    }
}
