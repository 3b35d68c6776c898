//! Binary batch serialization for the data plane
//!
//! Frames a batch of [`EventData`] records behind a fixed 64-byte header with
//! a magic number, per-sender sequence number, xxHash32 payload checksum and
//! optional LZ4 compression. The checksum is always computed over the
//! uncompressed payload, so compression can be toggled per message without
//! re-hashing and integrity does not depend on the compressor.
//!
//! On-wire layout (all fields little-endian):
//! ```text
//! offset  size  field
//!   0      8    magic = 0x44454C494C413200
//!   8      8    sequence_number
//!  16      4    format_version (1)
//!  20      4    header_size (64)
//!  24      4    event_count
//!  28      4    uncompressed_size
//!  32      4    compressed_size
//!  36      4    checksum (xxHash32 of uncompressed payload, seed 0)
//!  40      8    timestamp (ns, sender clock)
//!  48     16    reserved (zero)
//!  64    ...    payload of compressed_size bytes
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use xxhash_rust::xxh32::xxh32;

use crate::common::command::now_ns;
use crate::common::{EventData, PipelineError, PipelineResult};

/// Frame magic: "DELILA2\0" read as a little-endian u64
pub const MAGIC_NUMBER: u64 = 0x44454C494C413200;

/// Current wire format version
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Fixed batch header size in bytes
pub const BATCH_HEADER_SIZE: usize = 64;

/// Payloads below this size are never compressed (LZ4 gains nothing)
pub const MIN_MESSAGE_SIZE: usize = 102_400;

/// Parsed 64-byte batch header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryDataHeader {
    pub magic_number: u64,
    pub sequence_number: u64,
    pub format_version: u32,
    pub header_size: u32,
    pub event_count: u32,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub checksum: u32,
    pub timestamp: u64,
}

impl BinaryDataHeader {
    /// Whether the payload is LZ4-compressed
    ///
    /// Compression is present iff the wire payload is strictly smaller than
    /// the original.
    pub fn is_compressed(&self) -> bool {
        self.compressed_size < self.uncompressed_size
    }

    /// Total frame length implied by this header
    pub fn frame_size(&self) -> usize {
        BATCH_HEADER_SIZE + self.compressed_size as usize
    }

    /// Append the 64-byte wire representation to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.magic_number.to_le_bytes());
        buf.extend_from_slice(&self.sequence_number.to_le_bytes());
        buf.extend_from_slice(&self.format_version.to_le_bytes());
        buf.extend_from_slice(&self.header_size.to_le_bytes());
        buf.extend_from_slice(&self.event_count.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
    }

    /// Parse the header from the start of `bytes`
    ///
    /// Only checks the buffer is long enough; magic/size validation is the
    /// decoder's job so callers can distinguish the error kinds.
    pub fn parse(bytes: &[u8]) -> PipelineResult<Self> {
        if bytes.len() < BATCH_HEADER_SIZE {
            return Err(PipelineError::invalid_data(format!(
                "batch header needs {} bytes, got {}",
                BATCH_HEADER_SIZE,
                bytes.len()
            )));
        }

        Ok(Self {
            magic_number: u64::from_le_bytes(bytes[0..8].try_into().expect("8-byte slice")),
            sequence_number: u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice")),
            format_version: u32::from_le_bytes(bytes[16..20].try_into().expect("4-byte slice")),
            header_size: u32::from_le_bytes(bytes[20..24].try_into().expect("4-byte slice")),
            event_count: u32::from_le_bytes(bytes[24..28].try_into().expect("4-byte slice")),
            uncompressed_size: u32::from_le_bytes(bytes[28..32].try_into().expect("4-byte slice")),
            compressed_size: u32::from_le_bytes(bytes[32..36].try_into().expect("4-byte slice")),
            checksum: u32::from_le_bytes(bytes[36..40].try_into().expect("4-byte slice")),
            timestamp: u64::from_le_bytes(bytes[40..48].try_into().expect("8-byte slice")),
        })
    }
}

/// Serializer configuration
#[derive(Debug, Clone, Copy)]
pub struct SerializerConfig {
    /// Enable LZ4 compression for large payloads
    pub compression_enabled: bool,
    /// Compression level hint, clamped to 1-12 for wire compatibility with
    /// the reference implementation (the block encoder has one speed profile)
    pub compression_level: i32,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            compression_enabled: false,
            compression_level: 1,
        }
    }
}

/// Batch serializer with a per-instance monotonic sequence counter
///
/// Sequence numbers start at 0 and increment atomically per encoded batch,
/// so one serializer instance per sender keeps the per-sender monotonicity
/// invariant on the wire.
pub struct BinarySerializer {
    config: SerializerConfig,
    sequence_number: AtomicU64,
}

impl Default for BinarySerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySerializer {
    /// Create a serializer with compression disabled
    pub fn new() -> Self {
        Self::with_config(SerializerConfig::default())
    }

    /// Create a serializer with the given configuration
    pub fn with_config(config: SerializerConfig) -> Self {
        let mut config = config;
        config.compression_level = config.compression_level.clamp(1, 12);
        Self {
            config,
            sequence_number: AtomicU64::new(0),
        }
    }

    /// Enable or disable compression
    pub fn enable_compression(&mut self, enabled: bool) {
        self.config.compression_enabled = enabled;
    }

    /// Set the compression level (clamped to 1-12)
    pub fn set_compression_level(&mut self, level: i32) {
        self.config.compression_level = level.clamp(1, 12);
    }

    /// Encode a batch into a fresh buffer
    pub fn encode_batch(&self, events: &[EventData]) -> PipelineResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_batch_into(events, &mut out)?;
        Ok(out)
    }

    /// Encode a batch into `out` (cleared first)
    ///
    /// `out` is typically a pooled buffer owned by the transport. Compression
    /// is attempted only when enabled and the payload reaches
    /// [`MIN_MESSAGE_SIZE`]; a compressor result that is not strictly smaller
    /// falls back to the uncompressed payload silently.
    pub fn encode_batch_into(
        &self,
        events: &[EventData],
        out: &mut Vec<u8>,
    ) -> PipelineResult<()> {
        if events.is_empty() {
            return Err(PipelineError::invalid_data("cannot encode empty batch"));
        }

        let payload_size: usize = events.iter().map(|e| e.serialized_size()).sum();

        let mut payload = Vec::new();
        payload
            .try_reserve(payload_size)
            .map_err(|_| PipelineError::MemoryAllocation("payload buffer".into()))?;
        for event in events {
            event.encode_into(&mut payload);
        }
        debug_assert_eq!(payload.len(), payload_size);

        let checksum = xxh32(&payload, 0);

        let compressed = if self.config.compression_enabled && payload.len() >= MIN_MESSAGE_SIZE {
            let candidate = lz4_flex::block::compress(&payload);
            if candidate.len() < payload.len() {
                Some(candidate)
            } else {
                None
            }
        } else {
            None
        };

        let wire_payload: &[u8] = compressed.as_deref().unwrap_or(&payload);

        let header = BinaryDataHeader {
            magic_number: MAGIC_NUMBER,
            sequence_number: self.sequence_number.fetch_add(1, Ordering::Relaxed),
            format_version: CURRENT_FORMAT_VERSION,
            header_size: BATCH_HEADER_SIZE as u32,
            event_count: events.len() as u32,
            uncompressed_size: payload.len() as u32,
            compressed_size: wire_payload.len() as u32,
            checksum,
            timestamp: now_ns(),
        };

        out.clear();
        out.try_reserve(BATCH_HEADER_SIZE + wire_payload.len())
            .map_err(|_| PipelineError::MemoryAllocation("frame buffer".into()))?;
        header.write_to(out);
        out.extend_from_slice(wire_payload);
        Ok(())
    }

    /// Decode a batch from a complete frame
    ///
    /// Error ladder: short buffer → `InvalidData`; bad magic →
    /// `InvalidFormat`; length/header mismatch → `InvalidData`; LZ4 size
    /// mismatch → `CompressionFailed`; hash mismatch → `ChecksumMismatch`;
    /// record under/overrun → `InvalidData`.
    pub fn decode_batch(&self, bytes: &[u8]) -> PipelineResult<Vec<EventData>> {
        let header = BinaryDataHeader::parse(bytes)?;

        if header.magic_number != MAGIC_NUMBER {
            return Err(PipelineError::invalid_format(format!(
                "bad magic 0x{:016X}",
                header.magic_number
            )));
        }
        if header.format_version != CURRENT_FORMAT_VERSION {
            return Err(PipelineError::invalid_format(format!(
                "unknown format version {}",
                header.format_version
            )));
        }
        if bytes.len() != header.frame_size() {
            return Err(PipelineError::invalid_data(format!(
                "frame is {} bytes, header claims {}",
                bytes.len(),
                header.frame_size()
            )));
        }

        let wire_payload = &bytes[BATCH_HEADER_SIZE..];

        let decompressed;
        let payload: &[u8] = if header.is_compressed() {
            decompressed =
                lz4_flex::block::decompress(wire_payload, header.uncompressed_size as usize)
                    .map_err(|e| {
                        PipelineError::CompressionFailed(format!("LZ4 decode: {e}"))
                    })?;
            if decompressed.len() != header.uncompressed_size as usize {
                return Err(PipelineError::CompressionFailed(format!(
                    "decompressed to {} bytes, expected {}",
                    decompressed.len(),
                    header.uncompressed_size
                )));
            }
            &decompressed
        } else {
            wire_payload
        };

        let calculated = xxh32(payload, 0);
        if calculated != header.checksum {
            return Err(PipelineError::ChecksumMismatch(format!(
                "payload hash 0x{calculated:08X}, header 0x{:08X}",
                header.checksum
            )));
        }

        let mut events = Vec::new();
        events
            .try_reserve(header.event_count as usize)
            .map_err(|_| PipelineError::MemoryAllocation("event vector".into()))?;

        let mut offset = 0usize;
        for _ in 0..header.event_count {
            let (event, consumed) = EventData::decode(&payload[offset..])?;
            events.push(event);
            offset += consumed;
        }
        if offset != payload.len() {
            return Err(PipelineError::invalid_data(format!(
                "{} trailing payload bytes after {} events",
                payload.len() - offset,
                header.event_count
            )));
        }

        Ok(events)
    }
}

/// Parse just the header of a frame without touching the payload
///
/// Used on zero-copy forwarding paths (merger) where only the sequence
/// number and sizes are needed. Validates magic and frame length so corrupt
/// frames are still caught before forwarding.
pub fn peek_header(bytes: &[u8]) -> PipelineResult<BinaryDataHeader> {
    let header = BinaryDataHeader::parse(bytes)?;
    if header.magic_number != MAGIC_NUMBER {
        return Err(PipelineError::invalid_format(format!(
            "bad magic 0x{:016X}",
            header.magic_number
        )));
    }
    if bytes.len() != header.frame_size() {
        return Err(PipelineError::invalid_data(format!(
            "frame is {} bytes, header claims {}",
            bytes.len(),
            header.frame_size()
        )));
    }
    Ok(header)
}
