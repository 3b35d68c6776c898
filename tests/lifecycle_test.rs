//! Lifecycle tests: FSM transitions, multi-run cycling, EOS-driven stop

use std::sync::Arc;

use delila2_rs::common::fsm::{ComponentFsm, ComponentHooks};
use delila2_rs::common::{ComponentState, StateChangeCommand};
use delila2_rs::transport::EosTracker;

struct RunLog {
    starts: Vec<u32>,
    stops: Vec<bool>,
}

struct Hooks {
    log: RunLog,
}

impl Hooks {
    fn new() -> Self {
        Self {
            log: RunLog {
                starts: Vec::new(),
                stops: Vec::new(),
            },
        }
    }
}

impl ComponentHooks for Hooks {
    fn component_name(&self) -> &'static str {
        "LifecycleTest"
    }

    fn on_start(&mut self, run_number: u32) -> Result<(), String> {
        self.log.starts.push(run_number);
        Ok(())
    }

    fn on_stop(&mut self, graceful: bool) -> Result<(), String> {
        self.log.stops.push(graceful);
        Ok(())
    }
}

fn command(target: ComponentState, id: u64) -> StateChangeCommand {
    StateChangeCommand::new("lifecycle", target, id)
}

/// Happy path with two runs and increasing run numbers, no re-configure
#[test]
fn happy_path_two_runs() {
    let fsm = ComponentFsm::new("lifecycle");
    let mut hooks = Hooks::new();

    assert!(
        fsm.handle_command(&command(ComponentState::Configured, 1), &mut hooks)
            .success
    );
    assert_eq!(fsm.state(), ComponentState::Configured);

    for (id, run) in [(2u64, 7u32), (10, 8)] {
        assert!(
            fsm.handle_command(&command(ComponentState::Armed, id), &mut hooks)
                .success
        );
        assert_eq!(fsm.state(), ComponentState::Armed);

        let resp = fsm.handle_command(
            &command(ComponentState::Running, id + 1).with_run_number(run),
            &mut hooks,
        );
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Running);
        assert_eq!(fsm.run_number(), Some(run));

        let resp = fsm.handle_command(
            &command(ComponentState::Configured, id + 2).with_graceful(true),
            &mut hooks,
        );
        assert!(resp.success);
        assert_eq!(fsm.state(), ComponentState::Configured);
    }

    assert_eq!(hooks.log.starts, vec![7, 8]);
    assert_eq!(hooks.log.stops, vec![true, true]);
}

/// Invalid transitions are rejected and leave the state untouched
#[test]
fn invalid_transitions_rejected() {
    let fsm = ComponentFsm::new("lifecycle");
    let mut hooks = Hooks::new();

    // Arm from Idle
    let resp = fsm.handle_command(&command(ComponentState::Armed, 1), &mut hooks);
    assert!(!resp.success);
    assert_eq!(fsm.state(), ComponentState::Idle);

    // Start from Configured
    assert!(
        fsm.handle_command(&command(ComponentState::Configured, 2), &mut hooks)
            .success
    );
    let resp = fsm.handle_command(
        &command(ComponentState::Running, 3).with_run_number(1),
        &mut hooks,
    );
    assert!(!resp.success);
    assert_eq!(fsm.state(), ComponentState::Configured);
    assert!(hooks.log.starts.is_empty());
}

/// The accepted (from, to) pairs are exactly the specified edge set
#[test]
fn transition_predicate_edge_set() {
    use ComponentState::*;
    let all = [
        Idle,
        Configuring,
        Configured,
        Arming,
        Armed,
        Starting,
        Running,
        Stopping,
        Error,
    ];

    let chain = [
        (Idle, Configuring),
        (Configuring, Configured),
        (Configured, Arming),
        (Arming, Armed),
        (Armed, Starting),
        (Starting, Running),
        (Running, Stopping),
        (Stopping, Configured),
    ];

    for from in all {
        for to in all {
            let expected = from != to
                && (to == Idle || to == Error || chain.contains(&(from, to)));
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "transition {from} -> {to}"
            );
        }
    }
}

/// Emergency stop reaches the hook with graceful = false
#[test]
fn emergency_stop_flag() {
    let fsm = ComponentFsm::new("lifecycle");
    let mut hooks = Hooks::new();

    fsm.handle_command(&command(ComponentState::Configured, 1), &mut hooks);
    fsm.handle_command(&command(ComponentState::Armed, 2), &mut hooks);
    fsm.handle_command(
        &command(ComponentState::Running, 3).with_run_number(1),
        &mut hooks,
    );

    let resp = fsm.handle_command(
        &command(ComponentState::Configured, 4).with_graceful(false),
        &mut hooks,
    );
    assert!(resp.success);
    assert_eq!(hooks.log.stops, vec![false]);
}

/// Graceful shutdown via EOS: the component leaves Running only after the
/// last registered source finished
#[test]
fn graceful_shutdown_via_eos() {
    let fsm = Arc::new(ComponentFsm::new("sink"));
    let mut hooks = Hooks::new();
    let eos = EosTracker::new();

    fsm.handle_command(&command(ComponentState::Configured, 1), &mut hooks);
    fsm.handle_command(&command(ComponentState::Armed, 2), &mut hooks);
    fsm.handle_command(
        &command(ComponentState::Running, 3).with_run_number(9),
        &mut hooks,
    );

    eos.register("A");
    eos.register("B");

    // EOS from A: still running, B pending
    eos.receive_eos("A");
    if eos.all_received() {
        fsm.request_stopping();
    }
    assert_eq!(fsm.state(), ComponentState::Running);
    assert_eq!(eos.pending_sources(), vec!["B"]);

    // EOS from B: Stopping within the same iteration
    eos.receive_eos("B");
    if eos.all_received() {
        fsm.request_stopping();
    }
    assert_eq!(fsm.state(), ComponentState::Stopping);

    // Drain finished
    assert!(fsm.complete_stopping());
    assert_eq!(fsm.state(), ComponentState::Configured);

    // The operator's trailing Stop is acknowledged as a no-op
    let resp = fsm.handle_command(
        &command(ComponentState::Configured, 4).with_graceful(true),
        &mut hooks,
    );
    assert!(resp.success);
    assert_eq!(fsm.state(), ComponentState::Configured);
}

/// Faults force Error from anywhere; only Reset leaves it
#[test]
fn fault_requires_reset() {
    let fsm = ComponentFsm::new("lifecycle");
    let mut hooks = Hooks::new();

    fsm.handle_command(&command(ComponentState::Configured, 1), &mut hooks);
    fsm.fault("socket closed unexpectedly");
    assert_eq!(fsm.state(), ComponentState::Error);
    assert_eq!(fsm.snapshot().error_message, "socket closed unexpectedly");

    // No forward command works from Error
    for target in [
        ComponentState::Configured,
        ComponentState::Armed,
        ComponentState::Running,
    ] {
        let resp = fsm.handle_command(&command(target, 10).with_run_number(1), &mut hooks);
        assert!(!resp.success, "{target} accepted from Error");
        assert_eq!(fsm.state(), ComponentState::Error);
    }

    let resp = fsm.handle_command(&command(ComponentState::Idle, 20), &mut hooks);
    assert!(resp.success);
    assert_eq!(fsm.state(), ComponentState::Idle);
    assert!(fsm.snapshot().error_message.is_empty());
}
