//! DELILA2-RS: binary transport pipeline for nuclear physics DAQ
//!
//! Streams digitizer events from front-end sources through a merger to
//! sinks over ZeroMQ, framed in a length-prefixed, checksummed, optionally
//! LZ4-compressed binary format.

pub mod common;
pub mod component;
pub mod config;
pub mod emulator;
pub mod merger;
pub mod monitor;
pub mod operator;
pub mod processor;
pub mod recorder;
pub mod serializer;
pub mod transport;
