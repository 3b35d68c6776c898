//! Merger - receives from multiple upstream sources and forwards downstream
//!
//! Architecture (zero-copy):
//! - One receiver task per upstream: SUB socket → mpsc channel (raw bytes,
//!   header-only peek, no decode on the hot path)
//! - Sender task: mpsc channel → PUB socket (direct byte forwarding)
//! - Control task: REP socket driving the nine-state FSM
//!
//! The merger concatenates streams; it never re-orders or re-stamps frames.
//! Heartbeat and EOS frames pass through unchanged so sinks can track the
//! original sources; the merger's own EOS tracker drives its Stopping
//! transition once every registered source has finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::common::fsm::{ComponentFsm, ComponentHooks};
use crate::common::metrics::{AtomicCounters, RateProbe, StatusMetrics};
use crate::common::{run_control_task, ComponentState, PipelineError, PipelineResult};
use crate::serializer::peek_header;
use crate::transport::sequence::{SequenceStats, SequenceTracker};
use crate::transport::{
    parse_eos_body, parse_heartbeat_body, ChannelConfig, EosTracker, HeartbeatMonitor,
    MessageType, SocketPattern, TransportConfig, ZmqTransport,
};

/// How many frames one poll tick may drain before yielding
const DRAIN_BURST: usize = 256;

/// Merger configuration
#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Upstream addresses to subscribe to
    pub sub_addresses: Vec<String>,
    /// Downstream bind address
    pub pub_address: String,
    /// ZMQ bind address for commands (e.g., "tcp://*:5570")
    pub command_address: String,
    /// Source ids expected to send EOS each run
    pub expected_sources: Vec<String>,
    /// Source silence tolerated before the CRITICAL timeout warning
    pub heartbeat_timeout_ms: u64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            sub_addresses: vec!["tcp://localhost:5555".to_string()],
            pub_address: "tcp://*:5557".to_string(),
            command_address: "tcp://*:5570".to_string(),
            expected_sources: Vec::new(),
            heartbeat_timeout_ms: 6000,
        }
    }
}

struct MergerHooks {
    counters: Arc<AtomicCounters>,
    rate: RateProbe,
    queue_depth: Arc<AtomicUsize>,
    trackers: Arc<DashMap<String, SequenceStats>>,
    eos: Arc<EosTracker>,
    monitor: Arc<HeartbeatMonitor>,
}

impl ComponentHooks for MergerHooks {
    fn component_name(&self) -> &'static str {
        "Merger"
    }

    fn on_stop(&mut self, graceful: bool) -> Result<(), String> {
        if !graceful {
            return Ok(());
        }
        // Graceful stop drains the forward queue before acknowledging
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while self.queue_depth.load(Ordering::Acquire) > 0 {
            if std::time::Instant::now() >= deadline {
                return Err(format!(
                    "{} frames still queued after drain timeout",
                    self.queue_depth.load(Ordering::Acquire)
                ));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn on_reset(&mut self) -> Result<(), String> {
        self.trackers.clear();
        self.counters.reset();
        self.eos.reset();
        self.monitor.clear();
        Ok(())
    }

    fn status_metrics(&self) -> StatusMetrics {
        self.rate.sample(&self.counters.snapshot())
    }
}

/// Merger component
pub struct Merger {
    config: MergerConfig,
    fsm: Arc<ComponentFsm>,
    counters: Arc<AtomicCounters>,
    trackers: Arc<DashMap<String, SequenceStats>>,
    eos: Arc<EosTracker>,
    monitor: Arc<HeartbeatMonitor>,
    queue_depth: Arc<AtomicUsize>,
}

impl Merger {
    /// Create a merger with the given configuration
    pub fn new(config: MergerConfig) -> Self {
        Self {
            fsm: Arc::new(ComponentFsm::new("merger")),
            counters: Arc::new(AtomicCounters::new()),
            trackers: Arc::new(DashMap::new()),
            eos: Arc::new(EosTracker::new()),
            monitor: Arc::new(HeartbeatMonitor::new(Duration::from_millis(
                config.heartbeat_timeout_ms,
            ))),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ComponentState {
        self.fsm.state()
    }

    /// Per-upstream sequence statistics
    pub fn sequence_stats(&self) -> Vec<(String, SequenceStats)> {
        let mut stats: Vec<_> = self
            .trackers
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Run the merger
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> PipelineResult<()> {
        if self.config.sub_addresses.is_empty() {
            return Err(PipelineError::config("no upstream addresses configured"));
        }

        for source in &self.config.expected_sources {
            self.eos.register(source);
        }

        // Downstream PUB transport, owned by the sender task
        let mut output = ZmqTransport::new();
        output.configure(TransportConfig::data_only(ChannelConfig::new(
            &self.config.pub_address,
            true,
            SocketPattern::Pub,
        )))?;
        output.connect()?;
        info!(address = %self.config.pub_address, "Merger publishing to downstream");

        let (tx, rx) = mpsc::unbounded_channel::<(Bytes, MessageType)>();

        // Control task
        let hooks = Arc::new(Mutex::new(MergerHooks {
            counters: self.counters.clone(),
            rate: RateProbe::new(),
            queue_depth: self.queue_depth.clone(),
            trackers: self.trackers.clone(),
            eos: self.eos.clone(),
            monitor: self.monitor.clone(),
        }));
        let cmd_handle = tokio::spawn(run_control_task(
            self.config.command_address.clone(),
            self.fsm.clone(),
            hooks,
            shutdown.resubscribe(),
        ));

        // One receiver task per upstream address, each with its own SUB
        // socket and its own sequence tracker (one upstream = one sender)
        let mut receiver_handles = Vec::new();
        for address in &self.config.sub_addresses {
            let mut input = ZmqTransport::new();
            input.configure(TransportConfig::data_only(ChannelConfig::new(
                address,
                false,
                SocketPattern::Sub,
            )))?;
            input.connect()?;
            info!(address = %address, "Merger subscribed to upstream");

            receiver_handles.push(tokio::spawn(Self::receiver_task(
                address.clone(),
                input,
                tx.clone(),
                shutdown.resubscribe(),
                self.fsm.subscribe(),
                self.fsm.clone(),
                self.counters.clone(),
                self.trackers.clone(),
                self.eos.clone(),
                self.monitor.clone(),
                self.queue_depth.clone(),
            )));
        }
        drop(tx);

        let sender_handle = tokio::spawn(Self::sender_task(
            rx,
            output,
            self.counters.clone(),
            self.queue_depth.clone(),
        ));

        info!(
            state = %self.state(),
            upstreams = self.config.sub_addresses.len(),
            "Merger ready, waiting for commands"
        );

        let _ = shutdown.recv().await;
        info!("Merger received shutdown signal");

        for handle in receiver_handles {
            let _ = handle.await;
        }
        let _ = sender_handle.await;
        let _ = cmd_handle.await;

        let snap = self.counters.snapshot();
        info!(
            received = snap.received,
            forwarded = snap.processed,
            dropped = snap.dropped,
            "Merger stopped"
        );
        Ok(())
    }

    /// Receiver task: one upstream SUB → channel (zero-copy)
    #[allow(clippy::too_many_arguments)]
    async fn receiver_task(
        address: String,
        input: ZmqTransport,
        tx: mpsc::UnboundedSender<(Bytes, MessageType)>,
        mut shutdown: broadcast::Receiver<()>,
        mut state_rx: watch::Receiver<ComponentState>,
        fsm: Arc<ComponentFsm>,
        counters: Arc<AtomicCounters>,
        trackers: Arc<DashMap<String, SequenceStats>>,
        eos: Arc<EosTracker>,
        monitor: Arc<HeartbeatMonitor>,
        queue_depth: Arc<AtomicUsize>,
    ) {
        let mut tracker = SequenceTracker::new();
        let mut poll = interval(Duration::from_millis(1));
        let mut last_timeout_check = std::time::Instant::now();

        loop {
            let running = matches!(
                *state_rx.borrow(),
                ComponentState::Running | ComponentState::Stopping
            );

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!(address = %address, "Receiver task shutting down");
                    break;
                }

                _ = state_rx.changed() => {
                    let current = *state_rx.borrow();
                    debug!(address = %address, state = %current, "Receiver state changed");
                    if current == ComponentState::Idle {
                        tracker.reset();
                    }
                }

                _ = poll.tick(), if running => {
                    for _ in 0..DRAIN_BURST {
                        let Some((body, tag)) = input.receive() else { break };

                        match tag {
                            MessageType::Data => {
                                match peek_header(&body) {
                                    Ok(header) => {
                                        counters.inc_received();
                                        counters.add_events_received(header.event_count as u64);
                                        counters.add_bytes(body.len() as u64);
                                        let status = tracker.check(header.sequence_number);
                                        if let crate::transport::SequenceStatus::Gap { missing } = &status {
                                            counters.inc_errors();
                                            warn!(
                                                address = %address,
                                                missing = missing.end - missing.start,
                                                "Sequence gap from upstream"
                                            );
                                        }
                                        trackers.insert(address.clone(), tracker.stats());
                                    }
                                    Err(e) => {
                                        counters.inc_dropped();
                                        counters.inc_errors();
                                        warn!(address = %address, error = %e, "Dropped bad frame");
                                        continue;
                                    }
                                }
                            }
                            MessageType::Heartbeat => {
                                if let Some(source_id) = parse_heartbeat_body(&body) {
                                    monitor.update(&source_id);
                                    debug!(source = %source_id, "Heartbeat relayed");
                                }
                            }
                            MessageType::EndOfStream => {
                                if let Some((source_id, run_number)) = parse_eos_body(&body) {
                                    monitor.update(&source_id);
                                    eos.receive_eos(&source_id);
                                    info!(
                                        source = %source_id,
                                        run_number,
                                        pending = eos.pending_sources().len(),
                                        "EOS relayed"
                                    );
                                    if eos.all_received() {
                                        fsm.request_stopping();
                                    }
                                }
                            }
                        }

                        // Forward raw bytes downstream (unbounded channel
                        // never blocks the socket drain)
                        queue_depth.fetch_add(1, Ordering::AcqRel);
                        if tx.send((Bytes::from(body), tag)).is_err() {
                            queue_depth.fetch_sub(1, Ordering::AcqRel);
                            info!(address = %address, "Forward channel closed, receiver exiting");
                            return;
                        }
                    }

                    // CRITICAL condition, surfaced but not fatal by itself
                    if last_timeout_check.elapsed() >= Duration::from_secs(1) {
                        last_timeout_check = std::time::Instant::now();
                        for source in monitor.timed_out_sources() {
                            warn!(source = %source, "Source heartbeat timeout (CRITICAL)");
                        }
                    }
                }
            }
        }
    }

    /// Sender task: channel → PUB (direct byte forwarding)
    async fn sender_task(
        mut rx: mpsc::UnboundedReceiver<(Bytes, MessageType)>,
        output: ZmqTransport,
        counters: Arc<AtomicCounters>,
        queue_depth: Arc<AtomicUsize>,
    ) {
        while let Some((bytes, tag)) = rx.recv().await {
            if output.send(&bytes, tag) {
                counters.inc_processed();
            } else {
                counters.inc_dropped();
                warn!("Failed to forward frame downstream");
            }
            queue_depth.fetch_sub(1, Ordering::AcqRel);
        }

        info!("Sender task completed");
    }
}
