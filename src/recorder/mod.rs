//! Recorder component - persists raw data frames to run files
//!
//! Architecture:
//! - Run-loop task: polls the input transport, validates each frame
//!   (decode + checksum + sequence check) and hands the raw bytes to the
//!   writer
//! - Writer task: owns the open file; files are named
//!   `<prefix><run number, zero-padded>.dat` and contain the concatenated
//!   raw frames with no additional index. When a file reaches the size or
//!   age limit it rotates to `<prefix><run>_<seq>.dat`
//! - Control task: REP socket driving the nine-state FSM
//!
//! Graceful stop flushes and fsyncs before the Stop reply returns; emergency
//! stop closes the file immediately and drops whatever was still queued.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::common::fsm::{ComponentFsm, ComponentHooks};
use crate::common::metrics::{AtomicCounters, RateProbe, StatusMetrics};
use crate::common::{run_control_task, ComponentState, PipelineError, PipelineResult};
use crate::component::{ComponentConfig, ComponentEvent, DataComponent};
use crate::serializer::{BinaryDataHeader, BATCH_HEADER_SIZE};
use crate::transport::{ChannelConfig, SocketPattern, TransportConfig};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Upstream connect address (e.g., "tcp://localhost:5557")
    pub subscribe_address: String,
    /// ZMQ bind address for commands (e.g., "tcp://*:5580")
    pub command_address: String,
    /// Output directory
    pub output_dir: PathBuf,
    /// Data file name prefix
    pub file_prefix: String,
    /// Width of the zero-padded run number in file names
    pub run_number_width: usize,
    /// Maximum file size in bytes before rotating (0 = unlimited)
    pub max_file_size: u64,
    /// Maximum file age in seconds before rotating (0 = unlimited)
    pub max_file_duration_secs: u64,
    /// Source ids expected to send EOS each run
    pub expected_sources: Vec<String>,
    /// Source silence tolerated before the CRITICAL timeout warning (ms)
    pub heartbeat_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            subscribe_address: "tcp://localhost:5557".to_string(),
            command_address: "tcp://*:5580".to_string(),
            output_dir: PathBuf::from("./data"),
            file_prefix: "run".to_string(),
            run_number_width: 4,
            max_file_size: 1024 * 1024 * 1024, // 1GB
            max_file_duration_secs: 600,       // 10 minutes
            expected_sources: Vec::new(),
            heartbeat_timeout_ms: 6000,
        }
    }
}

impl RecorderConfig {
    /// File path for a run and file sequence within the run
    ///
    /// The first file of a run is `<prefix><run>.dat`; rotation appends a
    /// zero-padded sequence, e.g. `run0042.dat`, `run0042_0001.dat`.
    pub fn run_file_path(&self, run_number: u32, file_seq: u32) -> PathBuf {
        let name = if file_seq == 0 {
            format!(
                "{}{:0width$}.dat",
                self.file_prefix,
                run_number,
                width = self.run_number_width
            )
        } else {
            format!(
                "{}{:0width$}_{file_seq:04}.dat",
                self.file_prefix,
                run_number,
                width = self.run_number_width
            )
        };
        self.output_dir.join(name)
    }
}

/// Lock-free statistics for the writer hot path
#[derive(Debug, Default)]
struct AtomicStats {
    written_frames: AtomicU64,
    written_bytes: AtomicU64,
    files_written: AtomicU64,
    dropped_frames: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> RecorderStats {
        RecorderStats {
            written_frames: self.written_frames.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed) as u32,
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.written_frames.store(0, Ordering::Relaxed);
        self.written_bytes.store(0, Ordering::Relaxed);
        self.files_written.store(0, Ordering::Relaxed);
        self.dropped_frames.store(0, Ordering::Relaxed);
    }
}

/// Statistics for the current recording session
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderStats {
    pub written_frames: u64,
    pub written_bytes: u64,
    pub files_written: u32,
    pub dropped_frames: u64,
}

type WriterAck = std::sync::mpsc::Sender<Result<(), String>>;

enum WriterMessage {
    /// Open the file for a new run; acked so Start can fail on I/O errors
    OpenRun { run_number: u32, ack: WriterAck },
    /// Append one raw frame
    Frame(Bytes),
    /// Close the current file; `flush` fsyncs first, `ack` is optional
    CloseRun { flush: bool, ack: Option<WriterAck> },
}

struct RecorderHooks {
    writer_tx: mpsc::UnboundedSender<WriterMessage>,
    counters: Arc<AtomicCounters>,
    writer_stats: Arc<AtomicStats>,
    rate: RateProbe,
}

impl RecorderHooks {
    fn writer_roundtrip<F>(&self, build: F, what: &str) -> Result<(), String>
    where
        F: FnOnce(WriterAck) -> WriterMessage,
    {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        self.writer_tx
            .send(build(ack_tx))
            .map_err(|_| "writer task is gone".to_string())?;
        match ack_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(result) => result,
            Err(_) => Err(format!("writer did not acknowledge {what}")),
        }
    }
}

impl ComponentHooks for RecorderHooks {
    fn component_name(&self) -> &'static str {
        "Recorder"
    }

    fn on_start(&mut self, run_number: u32) -> Result<(), String> {
        self.writer_roundtrip(
            |ack| WriterMessage::OpenRun { run_number, ack },
            "file open",
        )
    }

    fn on_stop(&mut self, graceful: bool) -> Result<(), String> {
        if graceful {
            self.writer_roundtrip(
                |ack| WriterMessage::CloseRun {
                    flush: true,
                    ack: Some(ack),
                },
                "flush",
            )
        } else {
            let _ = self.writer_tx.send(WriterMessage::CloseRun {
                flush: false,
                ack: None,
            });
            Ok(())
        }
    }

    fn on_reset(&mut self) -> Result<(), String> {
        let _ = self.writer_tx.send(WriterMessage::CloseRun {
            flush: false,
            ack: None,
        });
        self.counters.reset();
        self.writer_stats.reset();
        Ok(())
    }

    fn status_metrics(&self) -> StatusMetrics {
        let mut metrics = self.rate.sample(&self.counters.snapshot());
        // Report what actually reached disk, not just what was received
        metrics.processed_bytes = self.writer_stats.snapshot().written_bytes;
        metrics
    }
}

/// Recorder component
pub struct Recorder {
    config: RecorderConfig,
    component: DataComponent,
    stats: Arc<AtomicStats>,
}

impl Recorder {
    /// Create a recorder; sockets open on `run`
    pub fn new(config: RecorderConfig) -> PipelineResult<Self> {
        let mut component_config = ComponentConfig::new("recorder", &config.command_address);
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
            stats: Arc::new(AtomicStats::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ComponentState {
        self.component.fsm().state()
    }

    /// Writer statistics for the current session
    pub fn stats(&self) -> RecorderStats {
        self.stats.snapshot()
    }

    /// Run the recorder
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> PipelineResult<()> {
        fs::create_dir_all(&self.config.output_dir)?;
        self.component.connect()?;

        let fsm = self.component.fsm();
        let counters = self.component.processor().counters();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<WriterMessage>();
        let writer_handle = tokio::spawn(writer_task(
            writer_rx,
            self.config.clone(),
            self.stats.clone(),
            fsm.clone(),
        ));

        let hooks = Arc::new(Mutex::new(RecorderHooks {
            writer_tx: writer_tx.clone(),
            counters: counters.clone(),
            writer_stats: self.stats.clone(),
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
        let mut was_running = false;

        info!(
            address = %self.config.subscribe_address,
            output_dir = %self.config.output_dir.display(),
            max_file_size = self.config.max_file_size,
            "Recorder ready, waiting for commands"
        );

        loop {
            let active = matches!(
                *state_rx.borrow(),
                ComponentState::Running | ComponentState::Stopping
            );

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Recorder received shutdown signal");
                    break;
                }

                _ = state_rx.changed() => {
                    let current = *state_rx.borrow();
                    info!(state = %current, "Recorder state changed");
                    match current {
                        ComponentState::Running => {
                            self.component.register_run_sources();
                            was_running = true;
                        }
                        ComponentState::Idle => {
                            self.component.reset_run_state();
                            was_running = false;
                        }
                        _ => {}
                    }
                }

                _ = poll.tick(), if active => {
                    while let Some(event) = self.component.poll() {
                        match event {
                            ComponentEvent::Batch { batch, raw } => {
                                debug!(
                                    seq = batch.header.sequence_number,
                                    events = batch.events.len(),
                                    "Recording frame"
                                );
                                if writer_tx.send(WriterMessage::Frame(raw)).is_err() {
                                    warn!("Writer channel closed");
                                    break;
                                }
                            }
                            ComponentEvent::Eos { all_received: true, .. } if was_running => {
                                // Every source finished: flush, close, and
                                // complete the Stopping → Configured edge
                                let (ack_tx, ack_rx) = std::sync::mpsc::channel();
                                let _ = writer_tx.send(WriterMessage::CloseRun {
                                    flush: true,
                                    ack: Some(ack_tx),
                                });
                                match ack_rx.recv_timeout(Duration::from_secs(5)) {
                                    Ok(Ok(())) => {
                                        fsm.complete_stopping();
                                        was_running = false;
                                    }
                                    Ok(Err(e)) => fsm.fault(e),
                                    Err(_) => fsm.fault("writer flush timed out"),
                                }
                            }
                            _ => {}
                        }
                    }
                }

                _ = timeout_check.tick(), if active => {
                    self.component.check_source_timeouts();
                }
            }
        }

        drop(writer_tx);
        let _ = writer_handle.await;
        let _ = cmd_handle.await;
        self.component.disconnect();

        let decode = counters.snapshot();
        let written = self.stats.snapshot();
        info!(
            frames = decode.received,
            written_frames = written.written_frames,
            written_bytes = written.written_bytes,
            files = written.files_written,
            dropped = written.dropped_frames,
            "Recorder stopped"
        );
        Ok(())
    }
}

/// One open run file with its rotation bookkeeping
struct OpenFile {
    writer: BufWriter<File>,
    path: PathBuf,
    run_number: u32,
    file_seq: u32,
    bytes: u64,
    opened_at: Instant,
}

fn open_file(
    config: &RecorderConfig,
    run_number: u32,
    file_seq: u32,
    stats: &AtomicStats,
) -> Result<OpenFile, String> {
    let path = config.run_file_path(run_number, file_seq);
    let file =
        File::create(&path).map_err(|e| format!("cannot create {}: {e}", path.display()))?;
    stats.files_written.fetch_add(1, Ordering::Relaxed);
    info!(path = %path.display(), run_number, file_seq, "Run file opened");
    Ok(OpenFile {
        writer: BufWriter::new(file),
        path,
        run_number,
        file_seq,
        bytes: 0,
        opened_at: Instant::now(),
    })
}

fn close_file(mut file: OpenFile, flush: bool) -> Result<(), String> {
    let mut result = Ok(());
    if flush {
        result = file
            .writer
            .flush()
            .and_then(|_| file.writer.get_ref().sync_all())
            .map_err(|e| format!("flush {} failed: {e}", file.path.display()));
    }
    info!(
        path = %file.path.display(),
        bytes = file.bytes,
        flushed = flush,
        "Run file closed"
    );
    result
}

/// Whether writing `incoming` more bytes should go to a fresh file
fn needs_rotation(file: &OpenFile, incoming: usize, config: &RecorderConfig) -> bool {
    let size_hit = config.max_file_size > 0
        && file.bytes > 0
        && file.bytes + incoming as u64 > config.max_file_size;
    let age_hit = config.max_file_duration_secs > 0
        && file.opened_at.elapsed().as_secs() >= config.max_file_duration_secs;
    size_hit || age_hit
}

/// Writer task: owns the open run file and rotates it at the limits
async fn writer_task(
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    config: RecorderConfig,
    stats: Arc<AtomicStats>,
    fsm: Arc<ComponentFsm>,
) {
    let mut current: Option<OpenFile> = None;

    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMessage::OpenRun { run_number, ack } => {
                // Close a leftover file first; a new Start replaces it
                if let Some(file) = current.take() {
                    warn!(path = %file.path.display(), "Previous run file closed implicitly");
                    let _ = close_file(file, false);
                }

                let result = open_file(&config, run_number, 0, &stats).map(|file| {
                    current = Some(file);
                });
                let _ = ack.send(result);
            }
            WriterMessage::Frame(bytes) => {
                let rotate = current
                    .as_ref()
                    .is_some_and(|file| needs_rotation(file, bytes.len(), &config));
                if rotate {
                    if let Some(old) = current.take() {
                        let (run_number, file_seq) = (old.run_number, old.file_seq + 1);
                        if let Err(e) = close_file(old, true) {
                            warn!(error = %e, "Flush of rotated file failed");
                        }
                        match open_file(&config, run_number, file_seq, &stats) {
                            Ok(file) => current = Some(file),
                            Err(e) => {
                                fsm.fault(e);
                                continue;
                            }
                        }
                    }
                }

                let Some(file) = current.as_mut() else {
                    stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                if let Err(e) = file.writer.write_all(&bytes) {
                    // File I/O failure is fatal for the component
                    fsm.fault(format!("write to {} failed: {e}", file.path.display()));
                    current = None;
                } else {
                    file.bytes += bytes.len() as u64;
                    stats.written_frames.fetch_add(1, Ordering::Relaxed);
                    stats
                        .written_bytes
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
            }
            WriterMessage::CloseRun { flush, ack } => {
                let result = match current.take() {
                    Some(file) => close_file(file, flush),
                    None => Ok(()),
                };
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
        }
    }

    // Channel closed: make sure buffered data reaches disk
    if let Some(file) = current.take() {
        if let Err(e) = close_file(file, true) {
            warn!(error = %e, "Final flush failed");
        }
    }
    info!("Writer task completed");
}

/// Sequential reader for recorded run files
///
/// Yields the raw frames (header + on-wire payload) in file order; callers
/// decode them with the batch serializer.
pub struct DataFileReader<R> {
    reader: R,
}

impl<R: Read> DataFileReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next raw frame; None at a clean end of file
    pub fn next_frame(&mut self) -> PipelineResult<Option<Vec<u8>>> {
        let mut header_bytes = [0u8; BATCH_HEADER_SIZE];
        match self.reader.read_exact(&mut header_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let header = BinaryDataHeader::parse(&header_bytes)?;
        if header.magic_number != crate::serializer::MAGIC_NUMBER {
            return Err(PipelineError::invalid_format(
                "file frame has a bad magic number",
            ));
        }

        let mut frame = Vec::with_capacity(header.frame_size());
        frame.extend_from_slice(&header_bytes);
        frame.resize(header.frame_size(), 0);
        self.reader
            .read_exact(&mut frame[BATCH_HEADER_SIZE..])
            .map_err(|e| PipelineError::invalid_data(format!("truncated frame payload: {e}")))?;

        Ok(Some(frame))
    }
}

/// Open a recorded run file for reading
pub fn open_run_file(path: &Path) -> PipelineResult<DataFileReader<File>> {
    Ok(DataFileReader::new(File::open(path)?))
}
