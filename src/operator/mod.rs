//! Operator - fleet-level coordination of pipeline components
//!
//! The operator knows every component's control address, type tag and
//! `start_order`. Fleet commands run asynchronously: callers get a job id
//! immediately and poll [`Operator::job_status`].
//!
//! Fleet algorithm: group components by `start_order`, walk the groups in
//! ascending order (descending for Stop, so sinks outlive their sources),
//! command every member of a group in parallel, retry failed commands up to
//! the configured count, and fail the job with an aggregate error if any
//! command never succeeds.

mod client;

pub use client::{ControlClient, DEFAULT_REQUEST_TIMEOUT};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::common::{ComponentState, StateChangeCommand};

/// One component known to the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentEntry {
    /// Unique component id (matches the component's module_id)
    pub id: String,
    /// Type tag (emulator, merger, recorder, monitor)
    pub component_type: String,
    /// REQ/REP control address
    pub control_address: String,
    /// Status channel address (informational)
    #[serde(default)]
    pub status_address: String,
    /// Lower starts first; Stop walks groups in reverse
    pub start_order: u32,
}

/// Per-phase timeouts and retry policy
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub components: Vec<ComponentEntry>,
    pub configure_timeout_ms: u64,
    pub arm_timeout_ms: u64,
    pub start_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub command_retry_count: u32,
    pub command_retry_interval_ms: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            configure_timeout_ms: 10_000,
            arm_timeout_ms: 10_000,
            start_timeout_ms: 30_000,
            stop_timeout_ms: 30_000,
            command_retry_count: 2,
            command_retry_interval_ms: 500,
        }
    }
}

/// Lifecycle of an asynchronous fleet command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
}

/// Status of one fleet component as last observed
#[derive(Debug, Clone)]
pub struct ComponentStatus {
    pub id: String,
    pub control_address: String,
    pub state: ComponentState,
    pub run_number: Option<u32>,
    pub data_rate_mbps: f64,
    pub error_counter: u64,
    pub processed_bytes: u64,
    pub error: Option<String>,
    pub online: bool,
}

/// The fleet phase a job drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FleetPhase {
    Configure,
    Arm,
    Start { run_number: u32 },
    Stop { graceful: bool },
    Reset,
}

impl FleetPhase {
    fn target_state(&self) -> ComponentState {
        match self {
            FleetPhase::Configure => ComponentState::Configured,
            FleetPhase::Arm => ComponentState::Armed,
            FleetPhase::Start { .. } => ComponentState::Running,
            FleetPhase::Stop { .. } => ComponentState::Configured,
            FleetPhase::Reset => ComponentState::Idle,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FleetPhase::Configure => "configure",
            FleetPhase::Arm => "arm",
            FleetPhase::Start { .. } => "start",
            FleetPhase::Stop { .. } => "stop",
            FleetPhase::Reset => "reset",
        }
    }

    /// Stop walks the start-order groups in reverse
    fn descending(&self) -> bool {
        matches!(self, FleetPhase::Stop { .. })
    }
}

/// Fleet coordinator
pub struct Operator {
    config: Arc<OperatorConfig>,
    client: Arc<ControlClient>,
    jobs: Arc<DashMap<String, JobStatus>>,
    job_counter: AtomicU64,
    command_counter: Arc<AtomicU64>,
}

impl Operator {
    /// Create an operator for the given fleet
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: Arc::new(ControlClient::new()),
            jobs: Arc::new(DashMap::new()),
            job_counter: AtomicU64::new(0),
            command_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Ids of all known components
    pub fn component_ids(&self) -> Vec<String> {
        self.config.components.iter().map(|c| c.id.clone()).collect()
    }

    /// Status of one asynchronous job
    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|s| s.clone())
    }

    /// Configure every component (ascending start order)
    pub fn configure_all_async(&self) -> String {
        self.spawn_fleet_job(FleetPhase::Configure)
    }

    /// Arm every component
    pub fn arm_all_async(&self) -> String {
        self.spawn_fleet_job(FleetPhase::Arm)
    }

    /// Start every component with the given run number
    pub fn start_all_async(&self, run_number: u32) -> String {
        self.spawn_fleet_job(FleetPhase::Start { run_number })
    }

    /// Stop every component (descending start order)
    pub fn stop_all_async(&self, graceful: bool) -> String {
        self.spawn_fleet_job(FleetPhase::Stop { graceful })
    }

    /// Reset every component to Idle
    pub fn reset_all_async(&self) -> String {
        self.spawn_fleet_job(FleetPhase::Reset)
    }

    /// Status of one component by id
    pub async fn component_status(&self, component_id: &str) -> Option<ComponentStatus> {
        let entry = self
            .config
            .components
            .iter()
            .find(|c| c.id == component_id)?;
        Some(self.client.component_status(entry).await)
    }

    /// Status of the whole fleet
    pub async fn all_component_status(&self) -> Vec<ComponentStatus> {
        let futures: Vec<_> = self
            .config
            .components
            .iter()
            .map(|entry| self.client.component_status(entry))
            .collect();
        join_all(futures).await
    }

    /// True iff every component is online and in `state`
    pub async fn is_all_in_state(&self, state: ComponentState) -> bool {
        self.all_component_status()
            .await
            .iter()
            .all(|status| status.online && status.state == state)
    }

    fn spawn_fleet_job(&self, phase: FleetPhase) -> String {
        let job_id = format!("job_{:04}", self.job_counter.fetch_add(1, Ordering::Relaxed));
        self.jobs.insert(job_id.clone(), JobStatus::Pending);

        let jobs = self.jobs.clone();
        let config = self.config.clone();
        let client = self.client.clone();
        let command_counter = self.command_counter.clone();
        let id = job_id.clone();

        tokio::spawn(async move {
            jobs.insert(id.clone(), JobStatus::Running);
            info!(job = %id, phase = phase.name(), "Fleet job started");

            let result = run_fleet_phase(&config, &client, &command_counter, phase).await;
            match result {
                Ok(()) => {
                    info!(job = %id, phase = phase.name(), "Fleet job completed");
                    jobs.insert(id, JobStatus::Completed);
                }
                Err(reason) => {
                    warn!(job = %id, phase = phase.name(), error = %reason, "Fleet job failed");
                    jobs.insert(id, JobStatus::Failed(reason));
                }
            }
        });

        job_id
    }
}

/// Group components by start_order; ascending unless the phase reverses
fn order_groups(
    components: &[ComponentEntry],
    descending: bool,
) -> Vec<(u32, Vec<ComponentEntry>)> {
    let mut groups: BTreeMap<u32, Vec<ComponentEntry>> = BTreeMap::new();
    for component in components {
        groups
            .entry(component.start_order)
            .or_default()
            .push(component.clone());
    }
    let mut result: Vec<_> = groups.into_iter().collect();
    if descending {
        result.reverse();
    }
    result
}

async fn run_fleet_phase(
    config: &OperatorConfig,
    client: &ControlClient,
    command_counter: &AtomicU64,
    phase: FleetPhase,
) -> Result<(), String> {
    let phase_timeout = Duration::from_millis(match phase {
        FleetPhase::Configure => config.configure_timeout_ms,
        FleetPhase::Arm => config.arm_timeout_ms,
        FleetPhase::Start { .. } => config.start_timeout_ms,
        FleetPhase::Stop { .. } => config.stop_timeout_ms,
        FleetPhase::Reset => config.configure_timeout_ms,
    });

    let groups = order_groups(&config.components, phase.descending());
    info!(
        phase = phase.name(),
        groups = ?groups
            .iter()
            .map(|(order, members)| (
                *order,
                members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
            ))
            .collect::<Vec<_>>(),
        "Fleet command order"
    );

    let mut failures = Vec::new();

    for (order, members) in groups {
        let futures: Vec<_> = members
            .iter()
            .map(|entry| {
                command_with_retry(config, client, command_counter, entry, phase, phase_timeout)
            })
            .collect();

        for (entry, result) in members.iter().zip(join_all(futures).await) {
            if let Err(reason) = result {
                failures.push(format!("{}: {}", entry.id, reason));
            }
        }

        if !failures.is_empty() {
            // Later groups are not commanded once a group failed
            return Err(format!(
                "group order={order} failed: {}",
                failures.join("; ")
            ));
        }
        info!(phase = phase.name(), order, "Fleet group done");
    }

    Ok(())
}

async fn command_with_retry(
    config: &OperatorConfig,
    client: &ControlClient,
    command_counter: &AtomicU64,
    entry: &ComponentEntry,
    phase: FleetPhase,
    phase_timeout: Duration,
) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 0..=config.command_retry_count {
        if attempt > 0 {
            sleep(Duration::from_millis(config.command_retry_interval_ms)).await;
            info!(component = %entry.id, attempt, "Retrying fleet command");
        }

        let command_id = command_counter.fetch_add(1, Ordering::Relaxed);
        let mut command = StateChangeCommand::new(&entry.id, phase.target_state(), command_id);
        match phase {
            FleetPhase::Start { run_number } => command = command.with_run_number(run_number),
            FleetPhase::Stop { graceful } => command = command.with_graceful(graceful),
            _ => {}
        }

        match timeout(
            phase_timeout,
            client.state_change(&entry.control_address, command),
        )
        .await
        {
            Ok(Ok(response)) if response.success => return Ok(()),
            Ok(Ok(response)) => {
                last_error = format!(
                    "rejected in state {}: {}",
                    response.current_state, response.error_message
                );
            }
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = format!("no reply within {phase_timeout:?}"),
        }
    }

    Err(last_error)
}
