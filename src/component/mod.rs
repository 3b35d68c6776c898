//! Shared chassis for pipeline components
//!
//! A [`DataComponent`] bundles what every Emulator/Merger/Recorder/Monitor
//! owns: the lifecycle FSM, an input transport (possibly multi-upstream), an
//! output transport, the heartbeat manager (sender role), the heartbeat
//! monitor and EOS tracker (receiver role), and the data processor. The
//! concrete components drive it from a single run-loop task; the control
//! listener (`run_control_task`) runs beside it and talks to the same FSM.
//!
//! Run-loop contract while Running:
//! - sender side: encode into a pooled buffer, `send_batch`, which marks the
//!   heartbeat timer on success; `send_heartbeat_if_due` fills quiet gaps
//! - receiver side: `poll` classifies frames; Data is decoded and sequence
//!   checked, Heartbeat refreshes the monitor, EOS feeds the tracker and the
//!   FSM enters Stopping once every registered source has finished

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::common::fsm::ComponentFsm;
use crate::common::{EventData, HeartbeatMessage, PipelineError, PipelineResult};
use crate::processor::{DataProcessor, DecodedBatch};
use crate::serializer::SerializerConfig;
use crate::transport::heartbeat::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT,
};
use crate::transport::{
    encode_eos_body, encode_heartbeat_body, parse_eos_body, parse_heartbeat_body, EosTracker,
    HeartbeatManager, HeartbeatMonitor, MessageType, TransportConfig, ZmqTransport,
};

/// Construction parameters shared by all components
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// Component identifier used on the control plane and in EOS frames
    pub module_id: String,
    /// Input transport (receiver side), if the component consumes data
    pub input: Option<TransportConfig>,
    /// Output transport (sender side), if the component produces data
    pub output: Option<TransportConfig>,
    /// Control channel bind address (REQ/REP)
    pub command_address: String,
    /// Serializer settings for the data plane
    pub serializer: SerializerConfig,
    /// Idle-sender heartbeat interval
    pub heartbeat_interval: Duration,
    /// Receiver-side source timeout
    pub heartbeat_timeout: Duration,
    /// Upstream sources expected to send EOS each run
    pub expected_sources: Vec<String>,
}

impl ComponentConfig {
    /// Minimal config with just an id and control address
    pub fn new(module_id: impl Into<String>, command_address: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            input: None,
            output: None,
            command_address: command_address.into(),
            serializer: SerializerConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            expected_sources: Vec::new(),
        }
    }
}

/// What `poll` saw on the input transport
#[derive(Debug)]
pub enum ComponentEvent {
    /// A decoded data batch plus its raw frame (for pass-through writers)
    Batch {
        batch: DecodedBatch,
        raw: bytes::Bytes,
    },
    /// Keep-alive from a source
    Heartbeat { source_id: String },
    /// End of stream from a source
    Eos {
        source_id: String,
        run_number: u32,
        /// True once every registered source has sent EOS
        all_received: bool,
    },
}

/// FSM + transports + trackers owned by one run-loop task
pub struct DataComponent {
    config: ComponentConfig,
    fsm: Arc<ComponentFsm>,
    processor: Arc<DataProcessor>,
    heartbeat: Mutex<HeartbeatManager>,
    monitor: Arc<HeartbeatMonitor>,
    eos: Arc<EosTracker>,
    input: Option<ZmqTransport>,
    output: Option<ZmqTransport>,
}

impl DataComponent {
    /// Validate the transport configuration and build the component
    ///
    /// Sockets are not opened yet; call [`DataComponent::connect`] (usually
    /// from the Arm hook path) once the component is configured.
    pub fn new(config: ComponentConfig) -> PipelineResult<Self> {
        let mut input = None;
        if let Some(cfg) = &config.input {
            let mut transport = ZmqTransport::new();
            transport.configure(cfg.clone())?;
            input = Some(transport);
        }
        let mut output = None;
        if let Some(cfg) = &config.output {
            let mut transport = ZmqTransport::new();
            transport.configure(cfg.clone())?;
            output = Some(transport);
        }

        Ok(Self {
            fsm: Arc::new(ComponentFsm::new(config.module_id.clone())),
            processor: Arc::new(DataProcessor::new(config.serializer)),
            heartbeat: Mutex::new(HeartbeatManager::new(config.heartbeat_interval)),
            monitor: Arc::new(HeartbeatMonitor::new(config.heartbeat_timeout)),
            eos: Arc::new(EosTracker::new()),
            input,
            output,
            config,
        })
    }

    /// Component identifier
    pub fn module_id(&self) -> &str {
        &self.config.module_id
    }

    /// Control channel address for the listener task
    pub fn command_address(&self) -> &str {
        &self.config.command_address
    }

    /// The lifecycle FSM (shared with the control task)
    pub fn fsm(&self) -> Arc<ComponentFsm> {
        self.fsm.clone()
    }

    /// The data processor (shared counters, sequence stats)
    pub fn processor(&self) -> Arc<DataProcessor> {
        self.processor.clone()
    }

    /// Receiver-side liveness monitor
    pub fn monitor(&self) -> Arc<HeartbeatMonitor> {
        self.monitor.clone()
    }

    /// EOS tracker
    pub fn eos_tracker(&self) -> Arc<EosTracker> {
        self.eos.clone()
    }

    /// Open the transports
    ///
    /// A socket-level failure is fatal and faults the FSM; the component
    /// needs a Reset before it can be configured again.
    pub fn connect(&mut self) -> PipelineResult<()> {
        let result = (|| {
            if let Some(input) = &mut self.input {
                input.connect()?;
            }
            if let Some(output) = &mut self.output {
                output.connect()?;
            }
            Ok(())
        })();

        if let Err(e) = &result {
            self.fsm.fault(format!("transport connect failed: {e}"));
        }
        result
    }

    /// Close both transports (idempotent)
    pub fn disconnect(&mut self) {
        if let Some(input) = &mut self.input {
            input.disconnect();
        }
        if let Some(output) = &mut self.output {
            output.disconnect();
        }
    }

    /// Register the expected sources for the coming run
    pub fn register_run_sources(&self) {
        self.eos.reset();
        for source in &self.config.expected_sources {
            self.eos.register(source);
        }
        if !self.config.expected_sources.is_empty() {
            info!(
                module = %self.config.module_id,
                sources = self.config.expected_sources.len(),
                "Registered EOS sources"
            );
        }
    }

    /// Encode and send one batch on the output transport
    ///
    /// The frame is built in a pooled buffer that returns to the pool after
    /// the send. Returns Ok(false) when the socket buffer was full (caller
    /// may retry); a successful send feeds the heartbeat timer.
    pub fn send_batch(&self, events: &[EventData]) -> PipelineResult<bool> {
        let Some(output) = &self.output else {
            return Err(PipelineError::config("component has no output transport"));
        };

        let pool = output.pool();
        let mut buf = pool.acquire();
        let result = self.processor.encode_into(events, &mut buf);
        let sent = match &result {
            Ok(()) => output.send(&buf, MessageType::Data),
            Err(_) => false,
        };
        pool.release(buf);
        result?;

        if sent {
            self.heartbeat.lock().mark_sent();
            debug!(
                module = %self.config.module_id,
                events = events.len(),
                "Batch sent"
            );
        }
        Ok(sent)
    }

    /// Emit a heartbeat frame if the sender has been quiet long enough
    pub fn send_heartbeat_if_due(&self) -> bool {
        let Some(output) = &self.output else {
            return false;
        };
        let mut heartbeat = self.heartbeat.lock();
        if !heartbeat.is_due() {
            return false;
        }
        let body = encode_heartbeat_body(&self.config.module_id);
        if output.send(&body, MessageType::Heartbeat) {
            heartbeat.mark_sent();
            self.fsm.next_heartbeat();
            debug!(module = %self.config.module_id, "Heartbeat sent");
            true
        } else {
            false
        }
    }

    /// Emit the EOS marker closing `run_number`
    ///
    /// EOS is the last frame this component sends within the run.
    pub fn send_eos(&self, run_number: u32) -> bool {
        let Some(output) = &self.output else {
            return false;
        };
        let body = encode_eos_body(&self.config.module_id, run_number);
        let sent = output.send(&body, MessageType::EndOfStream);
        if sent {
            self.heartbeat.lock().mark_sent();
            info!(
                module = %self.config.module_id,
                run_number,
                "EOS sent"
            );
        }
        sent
    }

    /// Nonblocking poll of the input transport
    ///
    /// Returns None when no frame is ready or the frame was dropped
    /// (decode failure counts in the processor metrics).
    pub fn poll(&self) -> Option<ComponentEvent> {
        let input = self.input.as_ref()?;
        let (body, tag) = input.receive()?;

        match tag {
            MessageType::Data => {
                let source = self
                    .config
                    .input
                    .as_ref()
                    .map(|c| c.data.address.as_str())
                    .unwrap_or("upstream");
                match self.processor.decode(&body, source) {
                    Ok(batch) => Some(ComponentEvent::Batch {
                        batch,
                        raw: bytes::Bytes::from(body),
                    }),
                    Err(e) => {
                        warn!(module = %self.config.module_id, error = %e, "Dropped frame");
                        None
                    }
                }
            }
            MessageType::Heartbeat => {
                let source_id = parse_heartbeat_body(&body)?;
                self.monitor.update(&source_id);
                debug!(module = %self.config.module_id, source = %source_id, "Heartbeat");
                Some(ComponentEvent::Heartbeat { source_id })
            }
            MessageType::EndOfStream => {
                let (source_id, run_number) = parse_eos_body(&body)?;
                self.monitor.update(&source_id);
                self.eos.receive_eos(&source_id);
                let all_received = self.eos.all_received();
                info!(
                    module = %self.config.module_id,
                    source = %source_id,
                    run_number,
                    all_received,
                    "EOS received"
                );
                if all_received {
                    // Graceful run termination: drain starts now
                    self.fsm.request_stopping();
                }
                Some(ComponentEvent::Eos {
                    source_id,
                    run_number,
                    all_received,
                })
            }
        }
    }

    /// Flag silent sources; a timeout is CRITICAL for this component
    ///
    /// Returns the timed-out sources (already logged).
    pub fn check_source_timeouts(&self) -> Vec<String> {
        let timed_out = self.monitor.timed_out_sources();
        for source in &timed_out {
            warn!(
                module = %self.config.module_id,
                source = %source,
                timeout_ms = self.monitor.timeout().as_millis() as u64,
                "Source heartbeat timeout (CRITICAL)"
            );
        }
        timed_out
    }

    /// Publish a liveness message on the status channel, if one exists
    pub fn publish_status(&self) -> bool {
        let message = HeartbeatMessage {
            module_id: self.config.module_id.clone(),
            status: self.fsm.state(),
        };
        let Ok(payload) = serde_json::to_vec(&message) else {
            return false;
        };
        let transport = self.output.as_ref().or(self.input.as_ref());
        transport.is_some_and(|t| t.send_status(&payload))
    }

    /// Clear run-scoped state (sequence trackers, EOS sets, liveness map)
    pub fn reset_run_state(&self) {
        self.processor.reset();
        self.eos.reset();
        self.monitor.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelConfig, SocketPattern};
    use std::time::Instant;

    fn sender_config(port: u16) -> ComponentConfig {
        let mut config = ComponentConfig::new("sender-0", "tcp://*:19000");
        config.output = Some(TransportConfig::data_only(ChannelConfig::new(
            format!("tcp://127.0.0.1:{port}"),
            true,
            SocketPattern::Push,
        )));
        config.heartbeat_interval = Duration::from_millis(20);
        config
    }

    fn receiver_config(port: u16, expected: &[&str]) -> ComponentConfig {
        let mut config = ComponentConfig::new("receiver-0", "tcp://*:19001");
        config.input = Some(TransportConfig::data_only(ChannelConfig::new(
            format!("tcp://127.0.0.1:{port}"),
            false,
            SocketPattern::Pull,
        )));
        config.expected_sources = expected.iter().map(|s| s.to_string()).collect();
        config
    }

    fn poll_until(receiver: &DataComponent) -> Option<ComponentEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(event) = receiver.poll() {
                return Some(event);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    fn events(n: usize) -> Vec<EventData> {
        (0..n)
            .map(|i| EventData::new(1, i as u8, 500, 400, i as f64, 0))
            .collect()
    }

    #[test]
    fn batch_flows_sender_to_receiver() {
        let mut receiver = DataComponent::new(receiver_config(19102, &[])).unwrap();
        receiver.connect().unwrap();
        let mut sender = DataComponent::new(sender_config(19102)).unwrap();
        sender.connect().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let batch = events(5);
        assert!(sender.send_batch(&batch).unwrap());

        match poll_until(&receiver) {
            Some(ComponentEvent::Batch { batch: decoded, raw }) => {
                assert_eq!(decoded.events, batch);
                assert_eq!(decoded.header.sequence_number, 0);
                assert_eq!(raw.len(), decoded.header.frame_size());
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_updates_receiver_monitor() {
        let mut receiver = DataComponent::new(receiver_config(19103, &[])).unwrap();
        receiver.connect().unwrap();
        let mut sender = DataComponent::new(sender_config(19103)).unwrap();
        sender.connect().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        // Quiet sender: heartbeat comes due after the interval
        std::thread::sleep(Duration::from_millis(30));
        assert!(sender.send_heartbeat_if_due());

        match poll_until(&receiver) {
            Some(ComponentEvent::Heartbeat { source_id }) => {
                assert_eq!(source_id, "sender-0");
                assert!(!receiver.monitor().is_timed_out("sender-0"));
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn send_marks_heartbeat_not_due() {
        let mut receiver = DataComponent::new(receiver_config(19104, &[])).unwrap();
        receiver.connect().unwrap();
        let mut sender = DataComponent::new(sender_config(19104)).unwrap();
        sender.connect().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        std::thread::sleep(Duration::from_millis(30));
        // Real traffic resets the heartbeat timer
        assert!(sender.send_batch(&events(1)).unwrap());
        assert!(!sender.send_heartbeat_if_due());
    }

    #[test]
    fn eos_from_all_sources_enters_stopping() {
        use crate::common::fsm::ComponentHooks;
        use crate::common::{ComponentState, StateChangeCommand};

        struct NoHooks;
        impl ComponentHooks for NoHooks {
            fn component_name(&self) -> &'static str {
                "receiver"
            }
        }

        let mut receiver =
            DataComponent::new(receiver_config(19105, &["sender-0", "other-src"])).unwrap();
        receiver.connect().unwrap();
        let mut sender = DataComponent::new(sender_config(19105)).unwrap();
        sender.connect().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        // Drive the receiver FSM into Running
        let fsm = receiver.fsm();
        let mut hooks = NoHooks;
        fsm.handle_command(
            &StateChangeCommand::new("receiver-0", ComponentState::Configured, 1),
            &mut hooks,
        );
        fsm.handle_command(
            &StateChangeCommand::new("receiver-0", ComponentState::Armed, 2),
            &mut hooks,
        );
        fsm.handle_command(
            &StateChangeCommand::new("receiver-0", ComponentState::Running, 3).with_run_number(5),
            &mut hooks,
        );
        assert_eq!(fsm.state(), ComponentState::Running);
        receiver.register_run_sources();

        // First EOS: still one source pending, component keeps running
        assert!(sender.send_eos(5));
        match poll_until(&receiver) {
            Some(ComponentEvent::Eos {
                source_id,
                run_number,
                all_received,
            }) => {
                assert_eq!(source_id, "sender-0");
                assert_eq!(run_number, 5);
                assert!(!all_received);
            }
            other => panic!("expected EOS, got {other:?}"),
        }
        assert_eq!(fsm.state(), ComponentState::Running);
        assert_eq!(receiver.eos_tracker().pending_sources(), vec!["other-src"]);

        // Second EOS arrives via the tracker directly (source on another
        // socket in a real deployment)
        receiver.eos_tracker().receive_eos("other-src");
        assert!(receiver.eos_tracker().all_received());
        fsm.request_stopping();
        assert_eq!(fsm.state(), ComponentState::Stopping);

        fsm.complete_stopping();
        assert_eq!(fsm.state(), ComponentState::Configured);
    }

    #[test]
    fn reset_run_state_clears_trackers() {
        let receiver = DataComponent::new(receiver_config(19106, &["a"])).unwrap();
        receiver.register_run_sources();
        receiver.eos_tracker().receive_eos("a");
        receiver.monitor().update("a");

        receiver.reset_run_state();
        assert_eq!(receiver.eos_tracker().expected_count(), 0);
        assert_eq!(receiver.monitor().source_count(), 0);
    }

    #[test]
    fn send_batch_without_output_is_config_error() {
        let receiver = DataComponent::new(receiver_config(19107, &[])).unwrap();
        let err = receiver.send_batch(&events(1)).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationError(_)));
    }
}
