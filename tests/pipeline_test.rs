//! End-to-end data plane: PUB sender → SUB receiver over real sockets

use std::time::{Duration, Instant};

use delila2_rs::common::fsm::ComponentHooks;
use delila2_rs::common::{ComponentState, EventData, StateChangeCommand, WaveformSample};
use delila2_rs::component::{ComponentConfig, ComponentEvent, DataComponent};
use delila2_rs::serializer::SerializerConfig;
use delila2_rs::transport::{ChannelConfig, SequenceStatus, SocketPattern, TransportConfig};

struct NoHooks;
impl ComponentHooks for NoHooks {
    fn component_name(&self) -> &'static str {
        "PipelineTest"
    }
}

fn make_sender(port: u16, compression: bool) -> DataComponent {
    let mut config = ComponentConfig::new("pipeline-source", "tcp://*:18601");
    config.output = Some(TransportConfig::data_only(ChannelConfig::new(
        format!("tcp://127.0.0.1:{port}"),
        true,
        SocketPattern::Pub,
    )));
    config.serializer = SerializerConfig {
        compression_enabled: compression,
        compression_level: 1,
    };
    config.heartbeat_interval = Duration::from_millis(50);
    let mut sender = DataComponent::new(config).unwrap();
    sender.connect().unwrap();
    sender
}

fn make_receiver(port: u16, expected: &[&str]) -> DataComponent {
    let mut config = ComponentConfig::new("pipeline-sink", "tcp://*:18602");
    config.input = Some(TransportConfig::data_only(ChannelConfig::new(
        format!("tcp://127.0.0.1:{port}"),
        false,
        SocketPattern::Sub,
    )));
    config.expected_sources = expected.iter().map(|s| s.to_string()).collect();
    let mut receiver = DataComponent::new(config).unwrap();
    receiver.connect().unwrap();
    receiver
}

fn events(count: usize, waveform: usize) -> Vec<EventData> {
    (0..count)
        .map(|i| {
            let mut event =
                EventData::new(3, (i % 16) as u8, 1000 + i as u16, 750, i as f64 * 100.0, 0);
            event.waveform = (0..waveform)
                .map(|s| WaveformSample::new(s as u16, s as u64))
                .collect();
            event
        })
        .collect()
}

/// Publish until the slow-joining subscriber sees the first frame
fn warm_up(sender: &DataComponent, receiver: &DataComponent) -> ComponentEvent {
    let probe = events(1, 0);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        sender.send_batch(&probe).unwrap();
        if let Some(event) = receiver.poll() {
            return event;
        }
        assert!(Instant::now() < deadline, "subscription never propagated");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn recv_event(receiver: &DataComponent) -> ComponentEvent {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(event) = receiver.poll() {
            return event;
        }
        assert!(Instant::now() < deadline, "no frame before deadline");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn batches_survive_the_wire_intact() {
    let receiver = make_receiver(18611, &[]);
    let sender = make_sender(18611, false);
    warm_up(&sender, &receiver);

    let batch = events(25, 8);
    assert!(sender.send_batch(&batch).unwrap());

    loop {
        match recv_event(&receiver) {
            ComponentEvent::Batch { batch: decoded, raw } => {
                // Warm-up probes may still be queued ahead of our batch
                if decoded.events.len() == 1 {
                    continue;
                }
                assert_eq!(decoded.events, batch);
                assert_eq!(raw.len(), decoded.header.frame_size());
                assert!(matches!(
                    decoded.sequence,
                    SequenceStatus::Ok | SequenceStatus::Gap { .. }
                ));
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[test]
fn compressed_batches_roundtrip() {
    let receiver = make_receiver(18612, &[]);
    let sender = make_sender(18612, true);
    warm_up(&sender, &receiver);

    // Repetitive 200-sample waveforms push the payload over the
    // compression threshold
    let batch = events(60, 200);
    assert!(sender.send_batch(&batch).unwrap());

    loop {
        match recv_event(&receiver) {
            ComponentEvent::Batch { batch: decoded, .. } => {
                if decoded.events.len() == 1 {
                    continue;
                }
                assert!(decoded.header.is_compressed());
                assert_eq!(decoded.events, batch);
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[test]
fn eos_over_the_wire_stops_the_receiver() {
    let receiver = make_receiver(18613, &["pipeline-source"]);
    let sender = make_sender(18613, false);
    warm_up(&sender, &receiver);

    // Drive the receiver FSM to Running so the EOS can trigger Stopping
    let fsm = receiver.fsm();
    let mut hooks = NoHooks;
    fsm.handle_command(
        &StateChangeCommand::new("pipeline-sink", ComponentState::Configured, 1),
        &mut hooks,
    );
    fsm.handle_command(
        &StateChangeCommand::new("pipeline-sink", ComponentState::Armed, 2),
        &mut hooks,
    );
    fsm.handle_command(
        &StateChangeCommand::new("pipeline-sink", ComponentState::Running, 3).with_run_number(11),
        &mut hooks,
    );
    receiver.register_run_sources();

    assert!(sender.send_eos(11));

    loop {
        match recv_event(&receiver) {
            ComponentEvent::Eos {
                source_id,
                run_number,
                all_received,
            } => {
                assert_eq!(source_id, "pipeline-source");
                assert_eq!(run_number, 11);
                assert!(all_received);
                break;
            }
            ComponentEvent::Batch { .. } => continue, // leftover warm-up
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // The EOS moved the FSM into Stopping within the poll that saw it
    assert_eq!(fsm.state(), ComponentState::Stopping);
}
