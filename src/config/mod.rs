//! Configuration module for the pipeline
//!
//! Loads the network topology and component settings from a TOML file.
//! Binaries overlay CLI flags on top of what the file provides.
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.toml")?;
//! let merger = config.network.merger.as_ref().unwrap();
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::operator::{ComponentEntry, OperatorConfig};
use crate::serializer::SerializerConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    #[serde(default)]
    pub serializer: SerializerFileConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatFileConfig,
    #[serde(default)]
    pub operator: OperatorFileConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get source configuration by ID
    pub fn get_source(&self, source_id: u32) -> Option<&SourceNetworkConfig> {
        self.network.sources.iter().find(|s| s.id == source_id)
    }

    /// Module ids of every configured source (the EOS registration set)
    pub fn source_module_ids(&self) -> Vec<String> {
        self.network.sources.iter().map(|s| s.module_id()).collect()
    }

    /// Serializer settings as used by components
    pub fn serializer_config(&self) -> SerializerConfig {
        SerializerConfig {
            compression_enabled: self.serializer.compression_enabled,
            compression_level: self.serializer.compression_level,
        }
    }

    /// Build the operator's fleet description from the topology
    pub fn operator_config(&self) -> OperatorConfig {
        let mut components = Vec::new();

        for source in &self.network.sources {
            components.push(ComponentEntry {
                id: source.module_id(),
                component_type: "emulator".to_string(),
                control_address: connect_address(&source.command_address()),
                status_address: source
                    .status
                    .as_deref()
                    .map(connect_address)
                    .unwrap_or_default(),
                start_order: source.start_order,
            });
        }
        if let Some(merger) = &self.network.merger {
            components.push(ComponentEntry {
                id: "merger".to_string(),
                component_type: "merger".to_string(),
                control_address: connect_address(&merger.command),
                status_address: String::new(),
                start_order: merger.start_order,
            });
        }
        if let Some(recorder) = &self.network.recorder {
            components.push(ComponentEntry {
                id: "recorder".to_string(),
                component_type: "recorder".to_string(),
                control_address: connect_address(&recorder.command),
                status_address: String::new(),
                start_order: recorder.start_order,
            });
        }
        if let Some(monitor) = &self.network.monitor {
            components.push(ComponentEntry {
                id: "monitor".to_string(),
                component_type: "monitor".to_string(),
                control_address: connect_address(&monitor.command),
                status_address: String::new(),
                start_order: monitor.start_order,
            });
        }

        OperatorConfig {
            components,
            configure_timeout_ms: self.operator.configure_timeout_ms,
            arm_timeout_ms: self.operator.arm_timeout_ms,
            start_timeout_ms: self.operator.start_timeout_ms,
            stop_timeout_ms: self.operator.stop_timeout_ms,
            command_retry_count: self.operator.command_retry_count,
            command_retry_interval_ms: self.operator.command_retry_interval_ms,
        }
    }
}

/// Turn a bind address into a locally connectable one
///
/// `tcp://*:5560` binds on all interfaces; clients on the same host reach it
/// via localhost.
pub fn connect_address(bind: &str) -> String {
    bind.replace("//*:", "//localhost:")
}

// =============================================================================
// Network topology
// =============================================================================

/// Network topology configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Cluster name for identification
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Data source configurations
    #[serde(default)]
    pub sources: Vec<SourceNetworkConfig>,

    /// Merger configuration
    pub merger: Option<MergerNetworkConfig>,

    /// Recorder configuration
    pub recorder: Option<RecorderNetworkConfig>,

    /// Monitor configuration
    pub monitor: Option<MonitorNetworkConfig>,
}

fn default_cluster_name() -> String {
    "default".to_string()
}

/// Data source (emulator) network config
#[derive(Debug, Clone, Deserialize)]
pub struct SourceNetworkConfig {
    /// Unique source ID
    pub id: u32,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// ZMQ bind address for data (e.g., "tcp://*:5555")
    pub bind: String,

    /// ZMQ bind address for commands
    #[serde(default)]
    pub command: Option<String>,

    /// ZMQ bind address for status publications
    #[serde(default)]
    pub status: Option<String>,

    /// Events per batch
    #[serde(default = "default_events_per_batch")]
    pub events_per_batch: usize,

    /// Batch interval in milliseconds (0 = maximum speed)
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Channels per module
    #[serde(default = "default_channels_per_module")]
    pub channels_per_module: u8,

    /// Generate waveforms
    #[serde(default)]
    pub enable_waveform: bool,

    /// Samples per generated waveform
    #[serde(default)]
    pub waveform_samples: u32,

    /// Fleet ordering (lower = started first; sources start last so the
    /// sinks are already listening, and stop first so EOS drains through)
    #[serde(default = "default_source_start_order")]
    pub start_order: u32,
}

fn default_events_per_batch() -> usize {
    100
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_channels_per_module() -> u8 {
    16
}

fn default_source_start_order() -> u32 {
    3
}

impl SourceNetworkConfig {
    /// Component id used on the control plane and in EOS frames
    pub fn module_id(&self) -> String {
        format!("emulator-{}", self.id)
    }

    /// Command address with the conventional port fallback
    pub fn command_address(&self) -> String {
        self.command
            .clone()
            .unwrap_or_else(|| format!("tcp://*:{}", 5560 + self.id as u16))
    }

    /// Address downstream components connect to
    pub fn connect_address(&self) -> String {
        connect_address(&self.bind)
    }
}

/// Merger network config
#[derive(Debug, Clone, Deserialize)]
pub struct MergerNetworkConfig {
    /// Upstream addresses; defaults to every source's bind address
    #[serde(default)]
    pub sub: Vec<String>,

    /// Downstream bind address
    #[serde(rename = "pub")]
    pub pub_address: String,

    /// ZMQ bind address for commands
    #[serde(default = "default_merger_command")]
    pub command: String,

    /// Fleet ordering
    #[serde(default = "default_merger_start_order")]
    pub start_order: u32,
}

fn default_merger_command() -> String {
    "tcp://*:5570".to_string()
}

fn default_merger_start_order() -> u32 {
    2
}

/// Recorder network config
#[derive(Debug, Clone, Deserialize)]
pub struct RecorderNetworkConfig {
    /// Upstream connect address
    pub subscribe: String,

    /// ZMQ bind address for commands
    #[serde(default = "default_recorder_command")]
    pub command: String,

    /// Output directory for run files
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Data file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Maximum file size in bytes before rotating (0 = unlimited)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum file age in seconds before rotating (0 = unlimited)
    #[serde(default = "default_max_file_duration_secs")]
    pub max_file_duration_secs: u64,

    /// Fleet ordering
    #[serde(default = "default_sink_start_order")]
    pub start_order: u32,
}

fn default_recorder_command() -> String {
    "tcp://*:5580".to_string()
}

fn default_output_dir() -> String {
    "./data".to_string()
}

fn default_file_prefix() -> String {
    "run".to_string()
}

fn default_max_file_size() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_file_duration_secs() -> u64 {
    600 // 10 minutes
}

fn default_sink_start_order() -> u32 {
    1
}

/// Monitor network config
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorNetworkConfig {
    /// Upstream connect address
    pub subscribe: String,

    /// ZMQ bind address for commands
    #[serde(default = "default_monitor_command")]
    pub command: String,

    /// Statistics output interval in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Fleet ordering
    #[serde(default = "default_sink_start_order")]
    pub start_order: u32,
}

fn default_monitor_command() -> String {
    "tcp://*:5590".to_string()
}

fn default_stats_interval() -> u64 {
    1
}

// =============================================================================
// Component settings
// =============================================================================

/// Serializer settings from the config file
#[derive(Debug, Clone, Deserialize)]
pub struct SerializerFileConfig {
    /// Enable LZ4 compression of large payloads
    #[serde(default)]
    pub compression_enabled: bool,

    /// Compression level (clamped to 1-12)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_compression_level() -> i32 {
    1
}

impl Default for SerializerFileConfig {
    fn default() -> Self {
        Self {
            compression_enabled: false,
            compression_level: default_compression_level(),
        }
    }
}

/// Heartbeat settings from the config file
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatFileConfig {
    /// Idle-sender heartbeat interval (ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Receiver-side source timeout (ms)
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    100
}

fn default_heartbeat_timeout_ms() -> u64 {
    6000
}

impl Default for HeartbeatFileConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

/// Operator settings from the config file
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorFileConfig {
    #[serde(default = "default_configure_timeout")]
    pub configure_timeout_ms: u64,
    #[serde(default = "default_configure_timeout")]
    pub arm_timeout_ms: u64,
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,
    #[serde(default = "default_start_timeout")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub command_retry_count: u32,
    #[serde(default = "default_retry_interval")]
    pub command_retry_interval_ms: u64,
}

fn default_configure_timeout() -> u64 {
    10_000
}

fn default_start_timeout() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_interval() -> u64 {
    500
}

impl Default for OperatorFileConfig {
    fn default() -> Self {
        Self {
            configure_timeout_ms: default_configure_timeout(),
            arm_timeout_ms: default_configure_timeout(),
            start_timeout_ms: default_start_timeout(),
            stop_timeout_ms: default_start_timeout(),
            command_retry_count: default_retry_count(),
            command_retry_interval_ms: default_retry_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [network]
        cluster_name = "testbench"

        [[network.sources]]
        id = 0
        name = "emulator A"
        bind = "tcp://*:5555"

        [[network.sources]]
        id = 1
        name = "emulator B"
        bind = "tcp://*:5556"
        command = "tcp://*:5561"
        events_per_batch = 500
        enable_waveform = true
        waveform_samples = 128

        [network.merger]
        sub = ["tcp://localhost:5555", "tcp://localhost:5556"]
        pub = "tcp://*:5557"

        [network.recorder]
        subscribe = "tcp://localhost:5557"
        output_dir = "/data/daq"
        file_prefix = "beam"

        [network.monitor]
        subscribe = "tcp://localhost:5557"

        [serializer]
        compression_enabled = true
        compression_level = 6

        [heartbeat]
        interval_ms = 50
        timeout_ms = 3000

        [operator]
        configure_timeout_ms = 5000
        command_retry_count = 3
    "#;

    #[test]
    fn parse_full_config() {
        let config = Config::from_toml(SAMPLE).unwrap();

        assert_eq!(config.network.cluster_name, "testbench");
        assert_eq!(config.network.sources.len(), 2);

        let source_b = config.get_source(1).unwrap();
        assert_eq!(source_b.events_per_batch, 500);
        assert!(source_b.enable_waveform);
        assert_eq!(source_b.command_address(), "tcp://*:5561");

        let merger = config.network.merger.as_ref().unwrap();
        assert_eq!(merger.sub.len(), 2);
        assert_eq!(merger.start_order, 2);

        let recorder = config.network.recorder.as_ref().unwrap();
        assert_eq!(recorder.file_prefix, "beam");
        assert_eq!(recorder.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(recorder.max_file_duration_secs, 600);

        assert!(config.serializer.compression_enabled);
        assert_eq!(config.serializer.compression_level, 6);
        assert_eq!(config.heartbeat.interval_ms, 50);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::from_toml(
            r#"
            [network]
            [[network.sources]]
            id = 0
            bind = "tcp://*:5555"
        "#,
        )
        .unwrap();

        assert_eq!(config.network.cluster_name, "default");
        let source = config.get_source(0).unwrap();
        assert_eq!(source.events_per_batch, 100);
        assert_eq!(source.command_address(), "tcp://*:5560");
        assert!(!config.serializer.compression_enabled);
        assert_eq!(config.heartbeat.timeout_ms, 6000);
        assert_eq!(config.operator.command_retry_count, 2);
    }

    #[test]
    fn source_module_ids() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(
            config.source_module_ids(),
            vec!["emulator-0", "emulator-1"]
        );
    }

    #[test]
    fn operator_fleet_from_topology() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let operator = config.operator_config();

        assert_eq!(operator.components.len(), 5);
        assert_eq!(operator.configure_timeout_ms, 5000);
        assert_eq!(operator.command_retry_count, 3);

        let emulator = &operator.components[0];
        assert_eq!(emulator.id, "emulator-0");
        assert_eq!(emulator.control_address, "tcp://localhost:5560");
        assert_eq!(emulator.start_order, 3);

        let recorder = operator
            .components
            .iter()
            .find(|c| c.id == "recorder")
            .unwrap();
        assert_eq!(recorder.start_order, 1);
    }

    #[test]
    fn connect_address_rewrites_wildcard() {
        assert_eq!(connect_address("tcp://*:5560"), "tcp://localhost:5560");
        assert_eq!(
            connect_address("tcp://192.168.1.5:5560"),
            "tcp://192.168.1.5:5560"
        );
    }

    #[test]
    fn missing_network_section_fails() {
        assert!(Config::from_toml("[serializer]").is_err());
    }
}
