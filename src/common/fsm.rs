//! Component state machine and lifecycle hooks
//!
//! Every pipeline component owns a [`ComponentFsm`] and implements
//! [`ComponentHooks`]. The FSM validates the requested transition, enters the
//! transient state (Configuring/Arming/Starting/Stopping), runs the matching
//! hook, and commits the settled state only if the hook succeeds. A failing
//! hook records its message and faults the component to Error.
//!
//! Reads are lock-free (watch channel); transitions serialize under a mutex.
//! Lock order is FSM before transport, never the reverse.

use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use super::command::{ComponentState, StateChangeCommand, StateChangeResponse, StatusReport};
use super::metrics::StatusMetrics;

/// Component-specific behavior attached to state transitions
///
/// The default implementations do nothing, so components override only the
/// hooks they need. Hooks run with the FSM transition lock held; they must
/// not call back into the FSM.
pub trait ComponentHooks {
    /// Component name for logging
    fn component_name(&self) -> &'static str;

    /// Idle → Configured
    fn on_configure(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Configured → Armed
    fn on_arm(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Armed → Running; the run number is bound at start time so runs can
    /// cycle without re-configuring
    fn on_start(&mut self, _run_number: u32) -> Result<(), String> {
        Ok(())
    }

    /// Running → Configured; graceful stops flush in-flight data, emergency
    /// stops drop it and return immediately
    fn on_stop(&mut self, _graceful: bool) -> Result<(), String> {
        Ok(())
    }

    /// Any state → Idle
    fn on_reset(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Throughput/error numbers for GetStatus
    fn status_metrics(&self) -> StatusMetrics {
        StatusMetrics::default()
    }
}

/// Point-in-time view of the FSM state
#[derive(Debug, Clone)]
pub struct FsmSnapshot {
    pub state: ComponentState,
    pub run_number: Option<u32>,
    pub error_message: String,
    pub heartbeat_counter: u64,
    pub inflight_commands: Vec<u64>,
}

struct FsmInner {
    state: ComponentState,
    run_number: Option<u32>,
    error_message: String,
    heartbeat_counter: u64,
    inflight_commands: HashSet<u64>,
}

/// Nine-state lifecycle machine owned by every data component
pub struct ComponentFsm {
    module_id: String,
    inner: Mutex<FsmInner>,
    state_tx: watch::Sender<ComponentState>,
    state_rx: watch::Receiver<ComponentState>,
}

impl ComponentFsm {
    /// Create a new FSM in Idle
    pub fn new(module_id: impl Into<String>) -> Self {
        let (state_tx, state_rx) = watch::channel(ComponentState::Idle);
        Self {
            module_id: module_id.into(),
            inner: Mutex::new(FsmInner {
                state: ComponentState::Idle,
                run_number: None,
                error_message: String::new(),
                heartbeat_counter: 0,
                inflight_commands: HashSet::new(),
            }),
            state_tx,
            state_rx,
        }
    }

    /// Component identifier used in control replies
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Current state (lock-free read)
    pub fn state(&self) -> ComponentState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for run loops reacting to state changes
    pub fn subscribe(&self) -> watch::Receiver<ComponentState> {
        self.state_rx.clone()
    }

    /// Run number of the current/last run
    pub fn run_number(&self) -> Option<u32> {
        self.inner.lock().run_number
    }

    /// Bump and return the heartbeat counter
    pub fn next_heartbeat(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.heartbeat_counter += 1;
        inner.heartbeat_counter
    }

    /// Snapshot of the full FSM state
    pub fn snapshot(&self) -> FsmSnapshot {
        let inner = self.inner.lock();
        FsmSnapshot {
            state: inner.state,
            run_number: inner.run_number,
            error_message: inner.error_message.clone(),
            heartbeat_counter: inner.heartbeat_counter,
            inflight_commands: inner.inflight_commands.iter().copied().collect(),
        }
    }

    /// Fault the component from any state, recording the message
    pub fn fault(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        let message = message.into();
        warn!(
            module = %self.module_id,
            from = %inner.state,
            error = %message,
            "Component fault"
        );
        inner.state = ComponentState::Error;
        inner.error_message = message;
        let _ = self.state_tx.send(ComponentState::Error);
    }

    /// Enter Stopping from Running (EOS-driven drain start)
    ///
    /// Called by run loops once every registered source has sent EOS. The
    /// later Stop command (or drain completion) finishes Stopping →
    /// Configured.
    pub fn request_stopping(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ComponentState::Running {
            info!(module = %self.module_id, "All EOS received, entering Stopping");
            self.enter(&mut inner, ComponentState::Stopping);
            true
        } else {
            false
        }
    }

    /// Complete Stopping → Configured after the drain finished
    pub fn complete_stopping(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ComponentState::Stopping {
            self.enter(&mut inner, ComponentState::Configured);
            true
        } else {
            false
        }
    }

    /// Drive the FSM with a state change command
    ///
    /// Validates the edge, enters the transient state, runs the hook and
    /// commits the target on success. A failing hook faults to Error.
    pub fn handle_command<H: ComponentHooks>(
        &self,
        cmd: &StateChangeCommand,
        hooks: &mut H,
    ) -> StateChangeResponse {
        let mut inner = self.inner.lock();
        inner.inflight_commands.insert(cmd.command_id);
        let response = self.apply(&mut inner, cmd, hooks);
        inner.inflight_commands.remove(&cmd.command_id);
        response
    }

    fn apply<H: ComponentHooks>(
        &self,
        inner: &mut FsmInner,
        cmd: &StateChangeCommand,
        hooks: &mut H,
    ) -> StateChangeResponse {
        use ComponentState::*;

        let current = inner.state;
        let (transient, hook_result) = match cmd.target_state {
            // A Stop (graceful flag present) that finds the component already
            // Configured acknowledges as a no-op; EOS-driven drains finish
            // runs before the operator's Stop arrives.
            Configured if current == Configured && cmd.graceful.is_some() => {
                return StateChangeResponse::ok(&self.module_id, Configured);
            }
            Configured if current == Running || current == Stopping => {
                // Stop path: Running → Stopping → Configured. A component
                // already in Stopping (EOS-driven drain) completes the same
                // way.
                if current == Running {
                    self.enter(inner, Stopping);
                }
                let graceful = cmd.graceful.unwrap_or(true);
                (Stopping, hooks.on_stop(graceful))
            }
            Configured => {
                if !current.can_transition_to(Configuring) {
                    return self.reject(inner, cmd);
                }
                self.enter(inner, Configuring);
                (Configuring, hooks.on_configure())
            }
            Armed => {
                if !current.can_transition_to(Arming) {
                    return self.reject(inner, cmd);
                }
                self.enter(inner, Arming);
                (Arming, hooks.on_arm())
            }
            Running => {
                if !current.can_transition_to(Starting) {
                    return self.reject(inner, cmd);
                }
                let Some(run_number) = cmd.run_number else {
                    return StateChangeResponse::error(
                        &self.module_id,
                        current,
                        "Start requires a run number",
                    );
                };
                self.enter(inner, Starting);
                inner.run_number = Some(run_number);
                (Starting, hooks.on_start(run_number))
            }
            Idle => {
                // Reset is idempotent: already-Idle components acknowledge
                // without re-running the hook
                if current == Idle {
                    inner.run_number = None;
                    inner.error_message.clear();
                    inner.heartbeat_counter = 0;
                    return StateChangeResponse::ok(&self.module_id, Idle);
                }
                (current, hooks.on_reset())
            }
            other => {
                return StateChangeResponse::error(
                    &self.module_id,
                    current,
                    format!("{other} is not a commandable target state"),
                );
            }
        };

        match hook_result {
            Ok(()) => {
                let settled = if cmd.target_state == Idle {
                    inner.run_number = None;
                    inner.error_message.clear();
                    inner.heartbeat_counter = 0;
                    Idle
                } else {
                    cmd.target_state
                };
                self.enter(inner, settled);
                info!(
                    module = %self.module_id,
                    from = %current,
                    to = %settled,
                    command_id = cmd.command_id,
                    "State changed"
                );
                StateChangeResponse::ok(&self.module_id, settled)
            }
            Err(message) => {
                warn!(
                    module = %self.module_id,
                    from = %transient,
                    command_id = cmd.command_id,
                    error = %message,
                    "Transition hook failed"
                );
                inner.error_message = message.clone();
                self.enter(inner, Error);
                StateChangeResponse::error(&self.module_id, Error, message)
            }
        }
    }

    fn reject(&self, inner: &FsmInner, cmd: &StateChangeCommand) -> StateChangeResponse {
        StateChangeResponse::error(
            &self.module_id,
            inner.state,
            format!("Cannot reach {} from {}", cmd.target_state, inner.state),
        )
    }

    fn enter(&self, inner: &mut FsmInner, state: ComponentState) {
        inner.state = state;
        let _ = self.state_tx.send(state);
    }

    /// Build a status report from the FSM state and component metrics
    pub fn status_report<H: ComponentHooks>(&self, hooks: &H) -> StatusReport {
        let snapshot = self.snapshot();
        let metrics = hooks.status_metrics();
        StatusReport {
            module_id: self.module_id.clone(),
            state: snapshot.state,
            run_number: snapshot.run_number,
            data_rate_mbps: metrics.data_rate_mbps,
            error_counter: metrics.error_counter,
            processed_bytes: metrics.processed_bytes,
            error_message: snapshot.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestHooks {
        configure_calls: u32,
        arm_calls: u32,
        start_runs: Vec<u32>,
        stop_graceful: Vec<bool>,
        reset_calls: u32,
        fail_next: bool,
    }

    impl TestHooks {
        fn new() -> Self {
            Self {
                configure_calls: 0,
                arm_calls: 0,
                start_runs: Vec::new(),
                stop_graceful: Vec::new(),
                reset_calls: 0,
                fail_next: false,
            }
        }
    }

    impl ComponentHooks for TestHooks {
        fn component_name(&self) -> &'static str {
            "TestComponent"
        }

        fn on_configure(&mut self) -> Result<(), String> {
            self.configure_calls += 1;
            if self.fail_next {
                return Err("configure failed".to_string());
            }
            Ok(())
        }

        fn on_arm(&mut self) -> Result<(), String> {
            self.arm_calls += 1;
            Ok(())
        }

        fn on_start(&mut self, run_number: u32) -> Result<(), String> {
            self.start_runs.push(run_number);
            Ok(())
        }

        fn on_stop(&mut self, graceful: bool) -> Result<(), String> {
            self.stop_graceful.push(graceful);
            Ok(())
        }

        fn on_reset(&mut self) -> Result<(), String> {
            self.reset_calls += 1;
            Ok(())
        }
    }

    fn cmd(target: ComponentState, id: u64) -> StateChangeCommand {
        StateChangeCommand::new("test", target, id)
    }

    #[test]
    fn full_lifecycle() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        let resp = fsm.handle_command(&cmd(ComponentState::Configured, 1), &mut hooks);
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Configured);
        assert_eq!(hooks.configure_calls, 1);

        let resp = fsm.handle_command(&cmd(ComponentState::Armed, 2), &mut hooks);
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Armed);

        let resp = fsm.handle_command(
            &cmd(ComponentState::Running, 3).with_run_number(7),
            &mut hooks,
        );
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Running);
        assert_eq!(fsm.run_number(), Some(7));
        assert_eq!(hooks.start_runs, vec![7]);

        let resp = fsm.handle_command(
            &cmd(ComponentState::Configured, 4).with_graceful(true),
            &mut hooks,
        );
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Configured);
        assert_eq!(hooks.stop_graceful, vec![true]);
    }

    #[test]
    fn multi_run_without_reconfigure() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        assert!(
            fsm.handle_command(&cmd(ComponentState::Configured, 1), &mut hooks)
                .success
        );
        for run in [7u32, 8] {
            assert!(fsm.handle_command(&cmd(ComponentState::Armed, 2), &mut hooks).success);
            let resp = fsm.handle_command(
                &cmd(ComponentState::Running, 3).with_run_number(run),
                &mut hooks,
            );
            assert!(resp.success);
            assert_eq!(fsm.run_number(), Some(run));
            assert!(
                fsm.handle_command(&cmd(ComponentState::Configured, 4), &mut hooks)
                    .success
            );
        }
        assert_eq!(hooks.configure_calls, 1);
        assert_eq!(hooks.start_runs, vec![7, 8]);
    }

    #[test]
    fn invalid_transitions_rejected() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        // Arm from Idle
        let resp = fsm.handle_command(&cmd(ComponentState::Armed, 1), &mut hooks);
        assert!(!resp.success);
        assert_eq!(fsm.state(), ComponentState::Idle);
        assert_eq!(hooks.arm_calls, 0);

        // Start from Configured
        assert!(
            fsm.handle_command(&cmd(ComponentState::Configured, 2), &mut hooks)
                .success
        );
        let resp = fsm.handle_command(
            &cmd(ComponentState::Running, 3).with_run_number(1),
            &mut hooks,
        );
        assert!(!resp.success);
        assert_eq!(fsm.state(), ComponentState::Configured);
    }

    #[test]
    fn start_without_run_number_rejected() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        assert!(
            fsm.handle_command(&cmd(ComponentState::Configured, 1), &mut hooks)
                .success
        );
        assert!(fsm.handle_command(&cmd(ComponentState::Armed, 2), &mut hooks).success);

        let resp = fsm.handle_command(&cmd(ComponentState::Running, 3), &mut hooks);
        assert!(!resp.success);
        assert_eq!(fsm.state(), ComponentState::Armed);
    }

    #[test]
    fn hook_failure_faults_to_error() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();
        hooks.fail_next = true;

        let resp = fsm.handle_command(&cmd(ComponentState::Configured, 1), &mut hooks);
        assert!(!resp.success);
        assert_eq!(fsm.state(), ComponentState::Error);
        assert_eq!(resp.error_message, "configure failed");
        assert_eq!(fsm.snapshot().error_message, "configure failed");
    }

    #[test]
    fn reset_clears_error() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        fsm.fault("socket died");
        assert_eq!(fsm.state(), ComponentState::Error);

        let resp = fsm.handle_command(&cmd(ComponentState::Idle, 1), &mut hooks);
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Idle);
        assert!(fsm.snapshot().error_message.is_empty());
        assert_eq!(fsm.run_number(), None);
        assert_eq!(hooks.reset_calls, 1);
    }

    #[test]
    fn error_not_commandable() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        let resp = fsm.handle_command(&cmd(ComponentState::Error, 1), &mut hooks);
        assert!(!resp.success);
        assert_eq!(fsm.state(), ComponentState::Idle);
    }

    #[test]
    fn heartbeat_counter_resets_on_reset() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();

        assert_eq!(fsm.next_heartbeat(), 1);
        assert_eq!(fsm.next_heartbeat(), 2);

        fsm.handle_command(&cmd(ComponentState::Idle, 1), &mut hooks);
        assert_eq!(fsm.snapshot().heartbeat_counter, 0);
    }

    #[test]
    fn watch_subscribers_see_transitions() {
        let fsm = ComponentFsm::new("test");
        let mut hooks = TestHooks::new();
        let rx = fsm.subscribe();

        fsm.handle_command(&cmd(ComponentState::Configured, 1), &mut hooks);
        assert_eq!(*rx.borrow(), ComponentState::Configured);
    }
}
