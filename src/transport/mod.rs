//! Pattern-parameterized ZeroMQ transport
//!
//! One transport owns the data and status sockets of a component. The socket
//! role (PUSH/PULL/PUB/SUB/...) is fixed at configuration time; send and
//! receive are nonblocking best-effort with per-frame message-type tagging.
//!
//! Framing: every message is multipart. The first frame carries the 1-byte
//! [`MessageType`] tag, the second the body. PUB data sockets prepend a
//! `"DATA"` topic frame so SUB peers can subscribe by prefix; receive strips
//! it again. Data bodies are serialized batches (see `serializer`); heartbeat
//! bodies carry a NUL-terminated source id, EOS bodies a NUL-terminated
//! source id followed by the u32 run number.
//!
//! A transport is driven by a single owning task; the memory pool inside is
//! the only part shared across tasks (mutex-protected).

pub mod eos;
pub mod heartbeat;
pub mod pool;
pub mod sequence;

pub use eos::EosTracker;
pub use heartbeat::{HeartbeatManager, HeartbeatMonitor};
pub use pool::{MemoryPool, PoolStats};
pub use sequence::{SequenceStatus, SequenceTracker};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::common::{PipelineError, PipelineResult};

/// Topic prefix used on PUB/SUB data channels
pub const DATA_TOPIC: &[u8] = b"DATA";

/// Default receive buffer size (4 MiB)
pub const DEFAULT_RECV_BUFFER_SIZE: i32 = 4 * 1024 * 1024;

/// Default linger on close (1 s)
pub const DEFAULT_LINGER_MS: i32 = 1000;

/// Out-of-band frame discriminator carried with every transport message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Serialized event batch
    Data = 0,
    /// Keep-alive, no payload besides the source id
    Heartbeat = 1,
    /// Last frame a source sends within a run
    EndOfStream = 2,
}

impl MessageType {
    /// Parse the tag byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::EndOfStream),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Data => write!(f, "Data"),
            MessageType::Heartbeat => write!(f, "Heartbeat"),
            MessageType::EndOfStream => write!(f, "EndOfStream"),
        }
    }
}

/// Socket patterns the transport can be parameterized with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPattern {
    Push,
    Pull,
    Pub,
    Sub,
    Pair,
    Req,
    Rep,
    Dealer,
    Router,
}

impl SocketPattern {
    fn zmq_type(&self) -> zmq::SocketType {
        match self {
            SocketPattern::Push => zmq::PUSH,
            SocketPattern::Pull => zmq::PULL,
            SocketPattern::Pub => zmq::PUB,
            SocketPattern::Sub => zmq::SUB,
            SocketPattern::Pair => zmq::PAIR,
            SocketPattern::Req => zmq::REQ,
            SocketPattern::Rep => zmq::REP,
            SocketPattern::Dealer => zmq::DEALER,
            SocketPattern::Router => zmq::ROUTER,
        }
    }

    /// Parse a configuration string such as "PUB" or "pull"
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PUSH" => Some(Self::Push),
            "PULL" => Some(Self::Pull),
            "PUB" => Some(Self::Pub),
            "SUB" => Some(Self::Sub),
            "PAIR" => Some(Self::Pair),
            "REQ" => Some(Self::Req),
            "REP" => Some(Self::Rep),
            "DEALER" => Some(Self::Dealer),
            "ROUTER" => Some(Self::Router),
            _ => None,
        }
    }
}

/// One socket endpoint: where it lives, whether it binds, how it talks
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// URI of the form `tcp://host:port` or `inproc://name`
    pub address: String,
    /// Bind (true) or connect (false)
    pub bind: bool,
    /// Socket pattern for this channel
    pub pattern: SocketPattern,
}

impl ChannelConfig {
    pub fn new(address: impl Into<String>, bind: bool, pattern: SocketPattern) -> Self {
        Self {
            address: address.into(),
            bind,
            pattern,
        }
    }
}

/// Full transport configuration covering the three component channels
///
/// The command channel is listed here so one config names every endpoint of
/// a component, but its REQ/REP socket is owned by the control listener task
/// rather than by the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Data channel
    pub data: ChannelConfig,
    /// Additional connect addresses for the data channel (multi-upstream)
    pub extra_data_addresses: Vec<String>,
    /// Status channel (liveness/status publications)
    pub status: Option<ChannelConfig>,
    /// Command channel (REQ/REP, handled by the control task)
    pub command: Option<ChannelConfig>,
    /// Send high-water-mark; 0 = unlimited
    pub send_hwm: i32,
    /// Receive high-water-mark; 0 = unlimited
    pub recv_hwm: i32,
    /// Linger on close in milliseconds
    pub linger_ms: i32,
    /// Kernel receive buffer size in bytes
    pub recv_buffer_size: i32,
}

impl TransportConfig {
    /// Config with a single data channel and default tuning
    pub fn data_only(data: ChannelConfig) -> Self {
        Self {
            data,
            extra_data_addresses: Vec::new(),
            status: None,
            command: None,
            send_hwm: 0,
            recv_hwm: 0,
            linger_ms: DEFAULT_LINGER_MS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// Transfer counters exposed by the transport
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
}

#[derive(Debug, Default)]
struct TransportCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
}

/// ZeroMQ transport with pluggable socket pattern and pooled send buffers
pub struct ZmqTransport {
    config: Option<TransportConfig>,
    context: Option<zmq::Context>,
    data_socket: Option<zmq::Socket>,
    status_socket: Option<zmq::Socket>,
    connected: bool,
    pool: Arc<MemoryPool>,
    counters: TransportCounters,
}

impl Default for ZmqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ZmqTransport {
    /// Create an unconfigured transport
    pub fn new() -> Self {
        Self {
            config: None,
            context: None,
            data_socket: None,
            status_socket: None,
            connected: false,
            pool: Arc::new(MemoryPool::default()),
            counters: TransportCounters::default(),
        }
    }

    /// Validate and store the configuration without opening sockets
    pub fn configure(&mut self, config: TransportConfig) -> PipelineResult<()> {
        validate_address(&config.data.address)?;
        for addr in &config.extra_data_addresses {
            validate_address(addr)?;
            if config.data.bind {
                return Err(PipelineError::config(
                    "extra data addresses require a connecting data channel",
                ));
            }
        }
        if let Some(status) = &config.status {
            validate_address(&status.address)?;
        }
        if let Some(command) = &config.command {
            validate_address(&command.address)?;
        }
        self.config = Some(config);
        Ok(())
    }

    /// Open the sockets per the stored configuration
    ///
    /// A socket-level failure here is fatal: the transport stays in the
    /// not-connected state and the error is surfaced to the component.
    pub fn connect(&mut self) -> PipelineResult<()> {
        if self.connected {
            return Ok(());
        }
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| PipelineError::config("transport not configured"))?
            .clone();

        let context = zmq::Context::new();

        let data_socket = open_channel(&context, &config.data, &config, DATA_TOPIC)?;
        for addr in &config.extra_data_addresses {
            data_socket
                .connect(addr)
                .map_err(|e| PipelineError::system(format!("connect {addr}: {e}")))?;
            info!(address = %addr, "Data channel connected (extra upstream)");
        }

        // Status subscribers take everything; only the data channel uses the
        // topic filter
        let status_socket = match &config.status {
            Some(channel) => Some(open_channel(&context, channel, &config, b"")?),
            None => None,
        };

        self.context = Some(context);
        self.data_socket = Some(data_socket);
        self.status_socket = status_socket;
        self.connected = true;

        info!(
            address = %config.data.address,
            pattern = ?config.data.pattern,
            bind = config.data.bind,
            "Transport connected"
        );
        Ok(())
    }

    /// Whether connect() succeeded and the sockets are live
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The transport's buffer pool
    pub fn pool(&self) -> Arc<MemoryPool> {
        self.pool.clone()
    }

    fn data_pattern(&self) -> Option<SocketPattern> {
        self.config.as_ref().map(|c| c.data.pattern)
    }

    /// Nonblocking best-effort send of one tagged frame
    ///
    /// Returns false without blocking when the socket buffer is full or the
    /// transport is not connected; every failure increments the error
    /// counter and the caller decides whether to retry.
    pub fn send(&self, payload: &[u8], tag: MessageType) -> bool {
        let Some(socket) = &self.data_socket else {
            self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let result = (|| -> Result<(), zmq::Error> {
            if self.data_pattern() == Some(SocketPattern::Pub) {
                socket.send(DATA_TOPIC, zmq::SNDMORE | zmq::DONTWAIT)?;
            }
            socket.send(&[tag as u8][..], zmq::SNDMORE | zmq::DONTWAIT)?;
            socket.send(payload, zmq::DONTWAIT)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_sent
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                true
            }
            Err(e) => {
                if e != zmq::Error::EAGAIN {
                    warn!(error = %e, "Data send failed");
                }
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Nonblocking receive of one tagged frame
    ///
    /// Returns None when no complete frame is ready. SUB sockets strip the
    /// topic envelope. Frames with an unknown tag are dropped and counted.
    pub fn receive(&self) -> Option<(Vec<u8>, MessageType)> {
        let socket = self.data_socket.as_ref()?;

        let first = match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) => return None,
            Err(e) => {
                warn!(error = %e, "Data receive failed");
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        // Once the first part arrived the remaining parts of the multipart
        // message are available; recv without DONTWAIT is safe here.
        let tag_frame = if self.data_pattern() == Some(SocketPattern::Sub) {
            // `first` is the topic envelope
            match self.recv_rest(socket) {
                Some(frame) => frame,
                None => return None,
            }
        } else {
            first
        };

        let tag = match tag_frame.first().copied().and_then(MessageType::from_u8) {
            Some(tag) if tag_frame.len() == 1 => tag,
            _ => {
                warn!(len = tag_frame.len(), "Dropping frame with bad tag");
                self.drain_parts(socket);
                return None;
            }
        };

        let body = match self.recv_rest(socket) {
            Some(body) => body,
            None => return None,
        };
        self.drain_parts(socket);

        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        Some((body, tag))
    }

    fn recv_rest(&self, socket: &zmq::Socket) -> Option<Vec<u8>> {
        match socket.get_rcvmore() {
            Ok(true) => match socket.recv_bytes(0) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Multipart receive failed");
                    None
                }
            },
            _ => {
                warn!("Truncated multipart frame");
                None
            }
        }
    }

    fn drain_parts(&self, socket: &zmq::Socket) {
        while socket.get_rcvmore().unwrap_or(false) {
            if socket.recv_bytes(0).is_err() {
                break;
            }
        }
    }

    /// Publish one frame on the status channel
    pub fn send_status(&self, payload: &[u8]) -> bool {
        let Some(socket) = &self.status_socket else {
            return false;
        };
        match socket.send(payload, zmq::DONTWAIT) {
            Ok(()) => true,
            Err(e) => {
                if e != zmq::Error::EAGAIN {
                    warn!(error = %e, "Status send failed");
                }
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Nonblocking receive from the status channel
    pub fn receive_status(&self) -> Option<Vec<u8>> {
        let socket = self.status_socket.as_ref()?;
        match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => Some(bytes),
            Err(zmq::Error::EAGAIN) => None,
            Err(e) => {
                warn!(error = %e, "Status receive failed");
                None
            }
        }
    }

    /// Close sockets and drop the context; safe to call repeatedly
    pub fn disconnect(&mut self) {
        if self.data_socket.is_some() || self.status_socket.is_some() {
            info!("Transport disconnected");
        }
        self.data_socket = None;
        self.status_socket = None;
        self.context = None;
        self.connected = false;
    }

    /// Counter snapshot
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ZmqTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_channel(
    context: &zmq::Context,
    channel: &ChannelConfig,
    tuning: &TransportConfig,
    subscribe_prefix: &[u8],
) -> PipelineResult<zmq::Socket> {
    let socket = context
        .socket(channel.pattern.zmq_type())
        .map_err(|e| PipelineError::system(format!("socket create: {e}")))?;

    socket
        .set_sndhwm(tuning.send_hwm)
        .and_then(|_| socket.set_rcvhwm(tuning.recv_hwm))
        .and_then(|_| socket.set_linger(tuning.linger_ms))
        .and_then(|_| socket.set_rcvbuf(tuning.recv_buffer_size))
        .map_err(|e| PipelineError::system(format!("socket options: {e}")))?;

    if channel.pattern == SocketPattern::Sub {
        socket
            .set_subscribe(subscribe_prefix)
            .map_err(|e| PipelineError::system(format!("subscribe: {e}")))?;
    }

    if channel.bind {
        socket
            .bind(&channel.address)
            .map_err(|e| PipelineError::system(format!("bind {}: {e}", channel.address)))?;
    } else {
        socket
            .connect(&channel.address)
            .map_err(|e| PipelineError::system(format!("connect {}: {e}", channel.address)))?;
    }

    Ok(socket)
}

fn validate_address(address: &str) -> PipelineResult<()> {
    if let Some(rest) = address.strip_prefix("tcp://") {
        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !port.is_empty() => Ok(()),
            _ => Err(PipelineError::config(format!(
                "tcp address needs host:port: {address}"
            ))),
        }
    } else if let Some(name) = address.strip_prefix("inproc://") {
        if name.is_empty() {
            Err(PipelineError::config(format!(
                "inproc address needs a name: {address}"
            )))
        } else {
            Ok(())
        }
    } else {
        Err(PipelineError::config(format!(
            "unsupported address scheme: {address}"
        )))
    }
}

/// Build a heartbeat frame body: NUL-terminated source id
pub fn encode_heartbeat_body(source_id: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(source_id.len() + 1);
    body.extend_from_slice(source_id.as_bytes());
    body.push(0);
    body
}

/// Parse a heartbeat frame body
pub fn parse_heartbeat_body(body: &[u8]) -> Option<String> {
    let end = body.iter().position(|&b| b == 0)?;
    String::from_utf8(body[..end].to_vec()).ok()
}

/// Build an EOS frame body: NUL-terminated source id + u32 run number
pub fn encode_eos_body(source_id: &str, run_number: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(source_id.len() + 5);
    body.extend_from_slice(source_id.as_bytes());
    body.push(0);
    body.extend_from_slice(&run_number.to_le_bytes());
    body
}

/// Parse an EOS frame body into (source id, run number)
pub fn parse_eos_body(body: &[u8]) -> Option<(String, u32)> {
    let end = body.iter().position(|&b| b == 0)?;
    let source_id = String::from_utf8(body[..end].to_vec()).ok()?;
    let run_bytes = body.get(end + 1..end + 5)?;
    let run_number = u32::from_le_bytes(run_bytes.try_into().ok()?);
    Some((source_id, run_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn push_pull_pair(port: u16) -> (ZmqTransport, ZmqTransport) {
        let mut puller = ZmqTransport::new();
        puller
            .configure(TransportConfig::data_only(ChannelConfig::new(
                format!("tcp://127.0.0.1:{port}"),
                true,
                SocketPattern::Pull,
            )))
            .unwrap();
        puller.connect().unwrap();

        let mut pusher = ZmqTransport::new();
        pusher
            .configure(TransportConfig::data_only(ChannelConfig::new(
                format!("tcp://127.0.0.1:{port}"),
                false,
                SocketPattern::Push,
            )))
            .unwrap();
        pusher.connect().unwrap();

        (pusher, puller)
    }

    fn recv_with_deadline(transport: &ZmqTransport) -> Option<(Vec<u8>, MessageType)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(frame) = transport.receive() {
                return Some(frame);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn message_type_tags() {
        assert_eq!(MessageType::from_u8(0), Some(MessageType::Data));
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Heartbeat));
        assert_eq!(MessageType::from_u8(2), Some(MessageType::EndOfStream));
        assert_eq!(MessageType::from_u8(3), None);
    }

    #[test]
    fn pattern_parse() {
        assert_eq!(SocketPattern::parse("PUB"), Some(SocketPattern::Pub));
        assert_eq!(SocketPattern::parse("pull"), Some(SocketPattern::Pull));
        assert_eq!(SocketPattern::parse("router"), Some(SocketPattern::Router));
        assert_eq!(SocketPattern::parse("GRPC"), None);
    }

    #[test]
    fn address_validation() {
        let mut transport = ZmqTransport::new();

        let bad_scheme = TransportConfig::data_only(ChannelConfig::new(
            "udp://localhost:5555",
            true,
            SocketPattern::Pull,
        ));
        assert!(matches!(
            transport.configure(bad_scheme).unwrap_err(),
            PipelineError::ConfigurationError(_)
        ));

        let missing_port = TransportConfig::data_only(ChannelConfig::new(
            "tcp://localhost",
            true,
            SocketPattern::Pull,
        ));
        assert!(transport.configure(missing_port).is_err());

        let good = TransportConfig::data_only(ChannelConfig::new(
            "tcp://*:5555",
            true,
            SocketPattern::Pull,
        ));
        assert!(transport.configure(good).is_ok());
        // configure does not open sockets
        assert!(!transport.is_connected());
    }

    #[test]
    fn send_unconnected_reports_failure() {
        let transport = ZmqTransport::new();
        assert!(!transport.send(b"payload", MessageType::Data));
        assert_eq!(transport.stats().send_errors, 1);
    }

    #[test]
    fn push_pull_roundtrip_with_tags() {
        let (pusher, puller) = push_pull_pair(17551);

        // Let the connect settle, then send one frame of each type
        std::thread::sleep(Duration::from_millis(100));
        assert!(pusher.send(b"batch-bytes", MessageType::Data));
        assert!(pusher.send(&encode_heartbeat_body("src-a"), MessageType::Heartbeat));
        assert!(pusher.send(&encode_eos_body("src-a", 9), MessageType::EndOfStream));

        let (body, tag) = recv_with_deadline(&puller).expect("data frame");
        assert_eq!(tag, MessageType::Data);
        assert_eq!(body, b"batch-bytes");

        let (body, tag) = recv_with_deadline(&puller).expect("heartbeat frame");
        assert_eq!(tag, MessageType::Heartbeat);
        assert_eq!(parse_heartbeat_body(&body).as_deref(), Some("src-a"));

        let (body, tag) = recv_with_deadline(&puller).expect("eos frame");
        assert_eq!(tag, MessageType::EndOfStream);
        assert_eq!(parse_eos_body(&body), Some(("src-a".to_string(), 9)));

        let stats = pusher.stats();
        assert_eq!(stats.messages_sent, 3);
        assert!(stats.bytes_sent > 0);
        assert_eq!(puller.stats().messages_received, 3);
    }

    #[test]
    fn pub_sub_strips_topic_envelope() {
        let mut publisher = ZmqTransport::new();
        publisher
            .configure(TransportConfig::data_only(ChannelConfig::new(
                "tcp://127.0.0.1:17552",
                true,
                SocketPattern::Pub,
            )))
            .unwrap();
        publisher.connect().unwrap();

        let mut subscriber = ZmqTransport::new();
        subscriber
            .configure(TransportConfig::data_only(ChannelConfig::new(
                "tcp://127.0.0.1:17552",
                false,
                SocketPattern::Sub,
            )))
            .unwrap();
        subscriber.connect().unwrap();

        // PUB drops frames until the subscription propagates, so publish
        // until something arrives
        let deadline = Instant::now() + Duration::from_secs(5);
        let received = loop {
            publisher.send(b"payload", MessageType::Data);
            if let Some(frame) = subscriber.receive() {
                break Some(frame);
            }
            if Instant::now() >= deadline {
                break None;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let (body, tag) = received.expect("published frame");
        assert_eq!(tag, MessageType::Data);
        assert_eq!(body, b"payload");
    }

    #[test]
    fn status_channel_roundtrip() {
        let mut reporter = ZmqTransport::new();
        let mut config = TransportConfig::data_only(ChannelConfig::new(
            "tcp://127.0.0.1:17554",
            true,
            SocketPattern::Pub,
        ));
        config.status = Some(ChannelConfig::new(
            "tcp://127.0.0.1:17555",
            true,
            SocketPattern::Pub,
        ));
        reporter.configure(config).unwrap();
        reporter.connect().unwrap();

        let mut watcher = ZmqTransport::new();
        let mut config = TransportConfig::data_only(ChannelConfig::new(
            "tcp://127.0.0.1:17554",
            false,
            SocketPattern::Sub,
        ));
        config.status = Some(ChannelConfig::new(
            "tcp://127.0.0.1:17555",
            false,
            SocketPattern::Sub,
        ));
        watcher.configure(config).unwrap();
        watcher.connect().unwrap();

        // Status frames carry no topic envelope; the subscriber takes all
        let deadline = Instant::now() + Duration::from_secs(5);
        let received = loop {
            reporter.send_status(br#"{"module_id":"emu","status":"Running"}"#);
            if let Some(frame) = watcher.receive_status() {
                break Some(frame);
            }
            if Instant::now() >= deadline {
                break None;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let frame = received.expect("status frame");
        assert!(frame.starts_with(b"{"));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (mut pusher, _puller) = push_pull_pair(17553);
        assert!(pusher.is_connected());
        pusher.disconnect();
        assert!(!pusher.is_connected());
        pusher.disconnect();
        assert!(!pusher.send(b"x", MessageType::Data));
    }

    #[test]
    fn heartbeat_body_roundtrip() {
        let body = encode_heartbeat_body("emulator-3");
        assert_eq!(body.last(), Some(&0));
        assert_eq!(parse_heartbeat_body(&body).as_deref(), Some("emulator-3"));
        assert_eq!(parse_heartbeat_body(b"no-terminator"), None);
    }

    #[test]
    fn eos_body_roundtrip() {
        let body = encode_eos_body("merger", 1234);
        assert_eq!(parse_eos_body(&body), Some(("merger".to_string(), 1234)));
        // Truncated run number
        assert_eq!(parse_eos_body(&body[..body.len() - 2]), None);
    }
}
