//! Control protocol for component lifecycle management
//!
//! Components expose a REQ/REP control socket. The operator (or the
//! controller CLI) sends a `StateChangeCommand` naming the target state and
//! receives a `StateChangeResponse`; `GetStatus` is answered with a
//! `StatusReport`. Messages are JSON-encoded over ZMQ.
//!
//! ## State Machine
//! ```text
//!   ┌──────┐      ┌─────────────┐      ┌────────────┐      ┌────────┐
//!   │ Idle │ ───► │ Configuring │ ───► │ Configured │ ───► │ Arming │
//!   └──────┘      └─────────────┘      └────────────┘      └────────┘
//!       ▲                                    ▲                  │
//!       │ Reset (from any state)             │                  ▼
//!       │                              ┌──────────┐        ┌────────┐
//!       │                              │ Stopping │        │ Armed  │
//!       │                              └──────────┘        └────────┘
//!       │                                    ▲                  │
//!       │                                    │                  ▼
//!       │                              ┌──────────┐       ┌──────────┐
//!       │                              │ Running  │ ◄──── │ Starting │
//!       │                              └──────────┘       └──────────┘
//!       │
//!       └── Error reachable from any state (fault)
//! ```

use serde::{Deserialize, Serialize};

/// Component lifecycle state (nine-state machine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ComponentState {
    /// Initial state, no configuration loaded
    #[default]
    Idle,
    /// Configuration is being applied
    Configuring,
    /// Configuration loaded and validated
    Configured,
    /// Hardware/resources are being prepared
    Arming,
    /// Resources prepared, ready to start
    Armed,
    /// Acquisition is starting
    Starting,
    /// Actively acquiring/processing data
    Running,
    /// Draining in-flight data before returning to Configured
    Stopping,
    /// Fault occurred; Reset required to return to Idle
    Error,
}

impl ComponentState {
    /// Check if a transition to `target` is valid
    ///
    /// The accepted edge set is exactly the lifecycle chain plus
    /// `Stopping → Configured`, reset (`any → Idle`) and fault
    /// (`any → Error`). Same-state transitions and skipped intermediate
    /// states are rejected.
    pub fn can_transition_to(&self, target: ComponentState) -> bool {
        use ComponentState::*;

        if *self == target {
            return false;
        }
        // Reset and fault are reachable from everywhere else
        if target == Idle || target == Error {
            return true;
        }

        matches!(
            (self, target),
            (Idle, Configuring)
                | (Configuring, Configured)
                | (Configured, Arming)
                | (Arming, Armed)
                | (Armed, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Configured)
        )
    }

    /// Whether this is one of the short-lived in-between states
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ComponentState::Configuring
                | ComponentState::Arming
                | ComponentState::Starting
                | ComponentState::Stopping
        )
    }

    /// Get valid commands for the current state
    pub fn valid_commands(&self) -> &'static [&'static str] {
        use ComponentState::*;
        match self {
            Idle => &["Configure", "GetStatus"],
            Configured => &["Arm", "Reset", "GetStatus"],
            Armed => &["Start", "Reset", "GetStatus"],
            Running => &["Stop", "Reset", "GetStatus"],
            Error => &["Reset", "GetStatus"],
            _ => &["GetStatus"],
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComponentState::Idle => "Idle",
            ComponentState::Configuring => "Configuring",
            ComponentState::Configured => "Configured",
            ComponentState::Arming => "Arming",
            ComponentState::Armed => "Armed",
            ComponentState::Starting => "Starting",
            ComponentState::Running => "Running",
            ComponentState::Stopping => "Stopping",
            ComponentState::Error => "Error",
        };
        write!(f, "{name}")
    }
}

/// State change request sent from the operator to a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeCommand {
    /// Target component identifier
    pub module_id: String,
    /// Settled state the component should end up in
    pub target_state: ComponentState,
    /// Caller-assigned id for correlating replies and retries
    pub command_id: u64,
    /// Sender clock, nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    /// Run number (Start only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_number: Option<u32>,
    /// Graceful flag (Stop only); false drops in-flight data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graceful: Option<bool>,
}

impl StateChangeCommand {
    /// Build a command with the current timestamp
    pub fn new(module_id: impl Into<String>, target_state: ComponentState, command_id: u64) -> Self {
        Self {
            module_id: module_id.into(),
            target_state,
            command_id,
            timestamp_ns: now_ns(),
            run_number: None,
            graceful: None,
        }
    }

    /// Attach a run number (Start)
    pub fn with_run_number(mut self, run_number: u32) -> Self {
        self.run_number = Some(run_number);
        self
    }

    /// Attach the graceful flag (Stop)
    pub fn with_graceful(mut self, graceful: bool) -> Self {
        self.graceful = Some(graceful);
        self
    }
}

impl std::fmt::Display for StateChangeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.run_number, self.graceful) {
            (Some(run), _) => write!(f, "{}#{}(run={})", self.target_state, self.command_id, run),
            (_, Some(g)) => write!(
                f,
                "{}#{}(graceful={})",
                self.target_state, self.command_id, g
            ),
            _ => write!(f, "{}#{}", self.target_state, self.command_id),
        }
    }
}

/// Reply to a `StateChangeCommand`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeResponse {
    /// Responding component identifier
    pub module_id: String,
    /// Whether the transition succeeded
    pub success: bool,
    /// State after handling the command
    pub current_state: ComponentState,
    /// Failure description; empty on success
    #[serde(default)]
    pub error_message: String,
}

impl StateChangeResponse {
    /// Create a success response
    pub fn ok(module_id: impl Into<String>, state: ComponentState) -> Self {
        Self {
            module_id: module_id.into(),
            success: true,
            current_state: state,
            error_message: String::new(),
        }
    }

    /// Create an error response
    pub fn error(
        module_id: impl Into<String>,
        state: ComponentState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            success: false,
            current_state: state,
            error_message: message.into(),
        }
    }
}

/// Liveness message published on the status channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Component identifier
    pub module_id: String,
    /// Current lifecycle state
    pub status: ComponentState,
}

/// Status summary answered to `GetStatus`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Component identifier
    pub module_id: String,
    /// Current lifecycle state
    pub state: ComponentState,
    /// Run number of the current/last run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_number: Option<u32>,
    /// Recent payload throughput
    pub data_rate_mbps: f64,
    /// Total dropped/errored frames
    pub error_counter: u64,
    /// Total payload bytes handled
    pub processed_bytes: u64,
    /// Last error message (non-empty iff in Error state)
    #[serde(default)]
    pub error_message: String,
}

/// Requests accepted on the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Drive the component to a new state
    StateChange(StateChangeCommand),
    /// Query current status
    GetStatus,
}

impl ControlRequest {
    /// Serialize to JSON bytes (for ZMQ)
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Replies produced by the control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlReply {
    /// Outcome of a state change
    StateChange(StateChangeResponse),
    /// Status snapshot
    Status(StatusReport),
}

impl ControlReply {
    /// Serialize to JSON bytes (for ZMQ)
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Nanoseconds since the Unix epoch from the sender clock
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
