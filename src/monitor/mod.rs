//! Monitor component - decodes batches and reports pipeline statistics
//!
//! Subscribes to the merged stream, fully decodes every frame (checksum and
//! sequence verification included) and prints periodic rate reports to the
//! console. Serves as the online consistency check of the pipeline.
//!
//! Architecture:
//! - Run-loop task: polls the input transport, updates statistics
//! - Control task: REP socket driving the nine-state FSM

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, info};

use crate::common::fsm::ComponentHooks;
use crate::common::metrics::{AtomicCounters, CounterSnapshot, RateProbe, StatusMetrics};
use crate::common::{run_control_task, ComponentState, PipelineResult};
use crate::component::{ComponentConfig, ComponentEvent, DataComponent};
use crate::transport::{ChannelConfig, SocketPattern, TransportConfig};

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Upstream connect address (e.g., "tcp://localhost:5557")
    pub subscribe_address: String,
    /// ZMQ bind address for commands (e.g., "tcp://*:5590")
    pub command_address: String,
    /// Statistics output interval in seconds
    pub stats_interval_secs: u64,
    /// Source ids expected to send EOS each run
    pub expected_sources: Vec<String>,
    /// Source silence tolerated before the CRITICAL timeout warning (ms)
    pub heartbeat_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            subscribe_address: "tcp://localhost:5557".to_string(),
            command_address: "tcp://*:5590".to_string(),
            stats_interval_secs: 1,
            expected_sources: Vec::new(),
            heartbeat_timeout_ms: 6000,
        }
    }
}

struct MonitorHooks {
    counters: Arc<AtomicCounters>,
    rate: RateProbe,
}

impl ComponentHooks for MonitorHooks {
    fn component_name(&self) -> &'static str {
        "Monitor"
    }

    fn on_reset(&mut self) -> Result<(), String> {
        self.counters.reset();
        Ok(())
    }

    fn status_metrics(&self) -> StatusMetrics {
        self.rate.sample(&self.counters.snapshot())
    }
}

/// Monitor component
pub struct Monitor {
    config: MonitorConfig,
    component: DataComponent,
    eos_seen: u64,
}

impl Monitor {
    /// Create a monitor; sockets open on `run`
    pub fn new(config: MonitorConfig) -> PipelineResult<Self> {
        let mut component_config = ComponentConfig::new("monitor", &config.command_address);
        component_config.input = Some(TransportConfig::data_only(ChannelConfig::new(
            &config.subscribe_address,
            false,
            SocketPattern::Sub,
        )));
        component_config.heartbeat_timeout = Duration::from_millis(config.heartbeat_timeout_ms);
        component_config.expected_sources = config.expected_sources.clone();

        let component = DataComponent::new(component_config)?;
        Ok(Self {
            config,
            component,
            eos_seen: 0,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ComponentState {
        self.component.fsm().state()
    }

    /// Run the monitor
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> PipelineResult<()> {
        self.component.connect()?;

        let fsm = self.component.fsm();
        let counters = self.component.processor().counters();

        let hooks = Arc::new(Mutex::new(MonitorHooks {
            counters: counters.clone(),
            rate: RateProbe::new(),
        }));
        let cmd_handle = tokio::spawn(run_control_task(
            self.config.command_address.clone(),
            fsm.clone(),
            hooks,
            shutdown.resubscribe(),
        ));

        let mut state_rx = fsm.subscribe();
        let mut poll = interval(Duration::from_millis(1));
        let mut timeout_check = interval(Duration::from_secs(1));
        let mut report_ticker = interval(Duration::from_secs(self.config.stats_interval_secs.max(1)));
        let start_time = Instant::now();
        let mut last_report = CounterSnapshot::default();
        let mut last_report_time = Instant::now();

        info!(
            address = %self.config.subscribe_address,
            "Monitor ready, waiting for commands"
        );

        loop {
            let active = matches!(
                *state_rx.borrow(),
                ComponentState::Running | ComponentState::Stopping
            );

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Monitor received shutdown signal");
                    break;
                }

                _ = state_rx.changed() => {
                    let current = *state_rx.borrow();
                    info!(state = %current, "Monitor state changed");
                    match current {
                        ComponentState::Running => {
                            self.component.register_run_sources();
                        }
                        ComponentState::Stopping => {
                            // EOS-driven drain has nothing buffered here
                            fsm.complete_stopping();
                        }
                        ComponentState::Idle => {
                            self.component.reset_run_state();
                            self.eos_seen = 0;
                        }
                        _ => {}
                    }
                }

                _ = poll.tick(), if active => {
                    while let Some(event) = self.component.poll() {
                        match event {
                            ComponentEvent::Batch { batch, .. } => {
                                debug!(
                                    seq = batch.header.sequence_number,
                                    events = batch.events.len(),
                                    "Monitored batch"
                                );
                            }
                            ComponentEvent::Eos { source_id, .. } => {
                                self.eos_seen += 1;
                                info!(source = %source_id, "Monitor saw EOS");
                            }
                            ComponentEvent::Heartbeat { .. } => {}
                        }
                    }
                }

                _ = timeout_check.tick(), if active => {
                    self.component.check_source_timeouts();
                }

                _ = report_ticker.tick(), if active => {
                    let snap = counters.snapshot();
                    let elapsed = last_report_time.elapsed().as_secs_f64();
                    let rate = snap.rate_from(&last_report, elapsed);
                    println!(
                        "Events: {} total ({} current) | Batches: {} | {} | Errors: {}",
                        snap.events_received,
                        rate.format_events_rate(),
                        snap.received,
                        rate.format_bytes_rate(),
                        snap.errors,
                    );
                    last_report = snap;
                    last_report_time = Instant::now();
                }
            }
        }

        let _ = cmd_handle.await;
        self.component.disconnect();

        self.print_final_stats(start_time.elapsed().as_secs_f64());
        Ok(())
    }

    fn print_final_stats(&self, elapsed_secs: f64) {
        let snap = self.component.processor().counters().snapshot();
        let event_rate = if elapsed_secs > 0.0 {
            snap.events_received as f64 / elapsed_secs
        } else {
            0.0
        };

        println!();
        println!("========== Final Statistics ==========");
        println!("Duration:     {elapsed_secs:.2} s");
        println!("Total Events: {}", snap.events_received);
        println!("Total Batches: {}", snap.received);
        println!(
            "Event Rate:   {:.0} events/s ({:.2} MHz)",
            event_rate,
            event_rate / 1_000_000.0
        );
        println!("Dropped:      {}", snap.dropped);
        println!("Errors:       {}", snap.errors);
        println!("EOS frames:   {}", self.eos_seen);
        for source in self.component.processor().sources() {
            if let Some(stats) = self.component.processor().sequence_stats(&source) {
                println!(
                    "  {source}: {} frames, {} gaps ({} missing)",
                    stats.received, stats.gaps, stats.missing_total
                );
            }
        }
        println!("=======================================");
        info!("Monitor stopped");
    }
}
