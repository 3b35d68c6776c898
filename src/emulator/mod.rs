//! Emulator data source - generates dummy event data for testing
//!
//! Publishes serialized event batches on a PUB socket at a configurable
//! rate. Energies follow per-channel Gaussian peaks so downstream spectra
//! are easy to eyeball; timestamps are monotonic with random spacing.
//!
//! Architecture:
//! - Main task: generates batches while Running, emits EOS when the run ends
//! - Control task: REP socket driving the nine-state FSM

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::info;

use crate::common::fsm::ComponentHooks;
use crate::common::metrics::{RateProbe, StatusMetrics};
use crate::common::{
    flags, run_control_task, ComponentState, EventData, PipelineResult, WaveformSample,
};
use crate::component::{ComponentConfig, DataComponent};
use crate::serializer::SerializerConfig;
use crate::transport::{ChannelConfig, SocketPattern, TransportConfig};

/// Emulator configuration
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// ZMQ bind address for data (e.g., "tcp://*:5555")
    pub address: String,
    /// ZMQ bind address for commands (e.g., "tcp://*:5560")
    pub command_address: String,
    /// Optional ZMQ bind address for status publications
    pub status_address: Option<String>,
    /// Source ID; doubles as the module number in generated events
    pub source_id: u32,
    /// Number of events per batch
    pub events_per_batch: usize,
    /// Interval between batches in milliseconds (0 = maximum speed)
    pub batch_interval_ms: u64,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Number of channels per module
    pub channels_per_module: u8,
    /// Generate waveforms
    pub enable_waveform: bool,
    /// Samples per generated waveform
    pub waveform_samples: u32,
    /// Serializer settings (compression)
    pub serializer: SerializerConfig,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            address: "tcp://*:5555".to_string(),
            command_address: "tcp://*:5560".to_string(),
            status_address: None,
            source_id: 0,
            events_per_batch: 100,
            batch_interval_ms: 100,
            heartbeat_interval_ms: 100,
            channels_per_module: 16,
            enable_waveform: false,
            waveform_samples: 0,
            serializer: SerializerConfig::default(),
        }
    }
}

struct EmulatorHooks {
    counters: Arc<crate::common::metrics::AtomicCounters>,
    rate: RateProbe,
}

impl ComponentHooks for EmulatorHooks {
    fn component_name(&self) -> &'static str {
        "Emulator"
    }

    fn status_metrics(&self) -> StatusMetrics {
        self.rate.sample(&self.counters.snapshot())
    }
}

/// Emulator data source
///
/// Owns the sending half of a [`DataComponent`]; batches are framed by the
/// shared serializer so sequence numbers stay monotonic across runs.
pub struct Emulator {
    config: EmulatorConfig,
    component: DataComponent,
    timestamp_ns: f64,
}

impl Emulator {
    /// Create an emulator; sockets open on `run`
    pub fn new(config: EmulatorConfig) -> PipelineResult<Self> {
        let module_id = format!("emulator-{}", config.source_id);
        let mut component_config = ComponentConfig::new(&module_id, &config.command_address);
        let mut output = TransportConfig::data_only(ChannelConfig::new(
            &config.address,
            true,
            SocketPattern::Pub,
        ));
        if let Some(status) = &config.status_address {
            output.status = Some(ChannelConfig::new(status, true, SocketPattern::Pub));
        }
        component_config.output = Some(output);
        component_config.serializer = config.serializer;
        component_config.heartbeat_interval = Duration::from_millis(config.heartbeat_interval_ms);

        let component = DataComponent::new(component_config)?;
        Ok(Self {
            config,
            component,
            timestamp_ns: 0.0,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ComponentState {
        self.component.fsm().state()
    }

    /// Generate one batch with Gaussian per-channel energy peaks
    ///
    /// Energy mean = module * 1000 + channel * 50 + 500, sigma = 50, which
    /// puts a distinct peak on every channel. The short-gate energy sits at
    /// 70-80 % of the long gate.
    fn generate_batch(&mut self) -> Vec<EventData> {
        let mut rng = rand::thread_rng();
        let module = self.config.source_id as u8;
        let mut batch = Vec::with_capacity(self.config.events_per_batch);

        for _ in 0..self.config.events_per_batch {
            let channel = rng.gen_range(0..self.config.channels_per_module.max(1));

            let mean = (module as f64) * 1000.0 + (channel as f64) * 50.0 + 500.0;
            let normal = Normal::new(mean, 50.0).expect("valid sigma");
            let energy = normal.sample(&mut rng).clamp(0.0, 65535.0) as u16;

            let short_ratio = 0.75 + rng.gen_range(-0.05..0.05);
            let energy_short = ((energy as f64) * short_ratio).clamp(0.0, 65535.0) as u16;

            self.timestamp_ns += rng.gen_range(10.0..1000.0);

            let event_flags = if rng.gen_ratio(1, 100) {
                flags::FLAG_PILEUP
            } else if rng.gen_ratio(1, 1000) {
                flags::FLAG_OVER_RANGE
            } else {
                0
            };

            let mut event = EventData::new(
                module,
                channel,
                energy,
                energy_short,
                self.timestamp_ns,
                event_flags,
            );
            if self.config.enable_waveform {
                event.waveform = self.generate_waveform(energy);
            }
            batch.push(event);
        }

        batch
    }

    /// Exponential-decay pulse with baseline noise
    fn generate_waveform(&self, energy: u16) -> Vec<WaveformSample> {
        let mut rng = rand::thread_rng();
        let n = self.config.waveform_samples as usize;
        let baseline = 200.0;
        let amplitude = energy as f64 / 4.0;
        let t0 = self.timestamp_ns as u64;

        (0..n)
            .map(|i| {
                let decay = (-(i as f64) / (n.max(1) as f64 / 5.0)).exp();
                let noise = rng.gen_range(-3.0..3.0);
                let adc = (baseline + amplitude * decay + noise).clamp(0.0, 16383.0) as u16;
                WaveformSample::new(adc, t0 + i as u64 * 2)
            })
            .collect()
    }

    /// Run the emulator with command control
    ///
    /// Spawns the control task; the main task generates data while the FSM
    /// is Running and emits EOS when the run leaves Running.
    pub async fn run(
        &mut self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> PipelineResult<()> {
        self.component.connect()?;

        let fsm = self.component.fsm();
        let hooks = Arc::new(Mutex::new(EmulatorHooks {
            counters: self.component.processor().counters(),
            rate: RateProbe::new(),
        }));
        let cmd_handle = tokio::spawn(run_control_task(
            self.component.command_address().to_string(),
            fsm.clone(),
            hooks,
            shutdown.resubscribe(),
        ));

        let use_ticker = self.config.batch_interval_ms > 0;
        let mut ticker = interval(Duration::from_millis(self.config.batch_interval_ms.max(1)));
        let mut heartbeat_ticker =
            interval(Duration::from_millis(self.config.heartbeat_interval_ms.max(10)));
        let mut state_rx = fsm.subscribe();
        let mut was_running = false;

        info!(
            module = %self.component.module_id(),
            address = %self.config.address,
            batch_interval_ms = self.config.batch_interval_ms,
            "Emulator ready, waiting for commands"
        );

        loop {
            let running = *state_rx.borrow() == ComponentState::Running;

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Emulator received shutdown signal");
                    break;
                }

                _ = state_rx.changed() => {
                    let current = *state_rx.borrow();
                    info!(state = %current, "State changed");
                    if current == ComponentState::Running {
                        self.timestamp_ns = 0.0;
                        was_running = true;
                    } else if was_running {
                        // Leaving Running: EOS is the last frame of the run
                        let run = fsm.run_number().unwrap_or(0);
                        self.component.send_eos(run);
                        was_running = false;
                    }
                }

                _ = ticker.tick(), if running && use_ticker => {
                    let batch = self.generate_batch();
                    self.component.send_batch(&batch)?;
                }

                _ = heartbeat_ticker.tick(), if running => {
                    self.component.send_heartbeat_if_due();
                    self.component.publish_status();
                }

                _ = tokio::time::sleep(Duration::ZERO), if running && !use_ticker => {
                    // Full speed mode: back-to-back batches
                    let batch = self.generate_batch();
                    self.component.send_batch(&batch)?;
                }

                _ = tokio::time::sleep(Duration::from_millis(20)), if !running => {}
            }
        }

        if *state_rx.borrow() == ComponentState::Running {
            let run = fsm.run_number().unwrap_or(0);
            self.component.send_eos(run);
        }
        self.component.disconnect();

        let _ = cmd_handle.await;
        let sent = self.component.processor().counters().snapshot().processed;
        info!(total_batches = sent, "Emulator stopped");
        Ok(())
    }

    /// Publish a fixed number of batches then EOS (testing helper)
    ///
    /// Bypasses the command socket and starts generating immediately.
    pub async fn run_batches(&mut self, count: u64) -> PipelineResult<()> {
        self.component.connect()?;
        let mut ticker = interval(Duration::from_millis(self.config.batch_interval_ms.max(1)));

        for _ in 0..count {
            ticker.tick().await;
            let batch = self.generate_batch();
            self.component.send_batch(&batch)?;
        }

        self.component.send_eos(0);
        Ok(())
    }

    #[cfg(test)]
    fn batch_for_test(&mut self) -> Vec<EventData> {
        self.generate_batch()
    }
}
