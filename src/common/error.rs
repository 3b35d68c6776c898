//! Common error types for DELILA2 components
//!
//! # Design Principles (KISS)
//! - One taxonomy of error kinds shared by serialization, transport and
//!   components; the kind decides the handling policy
//! - Non-fatal kinds are counted and the frame is dropped; fatal kinds push
//!   the owning component into the Error state
//! - Use thiserror for ergonomic error handling

use thiserror::Error;

/// Pipeline errors shared across serialization, transport and components
///
/// Handling policy per kind:
/// - `InvalidData` / `InvalidFormat` / `ChecksumMismatch` /
///   `CompressionFailed`: drop the frame, count, continue
/// - `MemoryAllocation`: abort the current operation and surface it
/// - `SystemError`: fatal for the component (Error state)
/// - `ConfigurationError`: reject configuration, stay Idle
/// - `TimeoutError`: surfaced to the Operator, which may retry
/// - `SequenceError`: log/count only, the frame is never dropped
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Under-sized or malformed buffer
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Magic number mismatch or unknown format version
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Payload hash did not match the header checksum
    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// LZ4 decode failed or produced the wrong size
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Buffer growth or allocation failed
    #[error("Memory allocation failed: {0}")]
    MemoryAllocation(String),

    /// Syscall-level failure (bind, connect, file I/O)
    #[error("System error: {0}")]
    SystemError(String),

    /// Invalid address or parameters
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Control command was not acknowledged in time
    #[error("Operation timed out: {0}")]
    TimeoutError(String),

    /// Sequence gap detected (observational only)
    #[error("Sequence error: {0}")]
    SequenceError(String),

    /// Anything else that does not map to a known kind
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl PipelineError {
    /// Create an invalid-data error
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an invalid-format error
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    /// Create a system error
    pub fn system(msg: impl Into<String>) -> Self {
        Self::SystemError(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::TimeoutError(msg.into())
    }

    /// Whether this kind is fatal for the owning component
    ///
    /// Fatal kinds push the component FSM into Error; everything else is
    /// counted in metrics and the pipeline keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SystemError(_) | Self::MemoryAllocation(_))
    }

    /// Whether the offending frame should be dropped
    pub fn drops_frame(&self) -> bool {
        matches!(
            self,
            Self::InvalidData(_)
                | Self::InvalidFormat(_)
                | Self::ChecksumMismatch(_)
                | Self::CompressionFailed(_)
                | Self::DeserializationError(_)
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::SystemError(e.to_string())
    }
}

impl From<zmq::Error> for PipelineError {
    fn from(e: zmq::Error) -> Self {
        Self::SystemError(format!("ZMQ: {e}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;
