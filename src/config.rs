//! Configuration document (spec.md §6). Layers a YAML/JSON file under a
//! `GOPROBE_`-prefixed, `__`-separated environment source — the Rust
//! equivalent of the spec's "Viper-style dot-to-underscore override".

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBufferConfig {
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
}

fn default_block_size() -> usize {
    1 << 20
}

fn default_num_blocks() -> usize {
    4
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            num_blocks: default_num_blocks(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub promisc: bool,
    #[serde(default)]
    pub ignore_vlans: bool,
    #[serde(default)]
    pub ring_buffer: RingBufferConfig,
    #[serde(default)]
    pub extra_bpf_filters: Vec<String>,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: String,
    #[serde(default = "default_encoder_type")]
    pub encoder_type: String,
    #[serde(default = "default_permissions")]
    pub permissions: u32,
    /// Cadence of the capture manager's rotation sweep (spec.md Glossary,
    /// "Rotation ... the periodic (default 5 min) operation").
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
}

fn default_encoder_type() -> String {
    "lz4".to_string()
}

fn default_permissions() -> u32 {
    0o755
}

fn default_rotation_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutodetectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_addr")]
    pub addr: String,
    #[serde(default = "default_true")]
    pub metrics: bool,
    #[serde(default)]
    pub profiling: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub query_rate_limit: Option<u32>,
    /// Aggregates away the `iface` metric label, trading per-interface
    /// granularity for lower cardinality (spec.md §9).
    #[serde(default)]
    pub drop_iface_label: bool,
}

fn default_api_addr() -> String {
    "0.0.0.0:8145".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: default_api_addr(),
            metrics: true,
            profiling: false,
            request_timeout_secs: default_request_timeout_secs(),
            keys: Vec::new(),
            query_rate_limit: None,
            drop_iface_label: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBuffersConfig {
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,
    #[serde(default = "default_num_buffers")]
    pub num_buffers: usize,
}

fn default_size_limit() -> usize {
    64 * 1024 * 1024
}

fn default_num_buffers() -> usize {
    4
}

impl Default for LocalBuffersConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
            num_buffers: default_num_buffers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub interfaces: HashMap<String, CaptureConfig>,
    #[serde(default)]
    pub autodetection: AutodetectionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub local_buffers: LocalBuffersConfig,
}

impl Config {
    /// Loads `path` (YAML or JSON, inferred from extension) layered under
    /// environment overrides of the shape `GOPROBE_API__ADDR=...`.
    pub fn load(path: &Path) -> Result<Self, crate::error::Error> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("GOPROBE")
                    .separator("__")
                    .try_parsing(true),
            );
        let raw = builder
            .build()
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;
        raw.try_deserialize()
            .map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_defaults_are_non_promiscuous() {
        let cfg = CaptureConfig::default();
        assert!(!cfg.promisc);
        assert_eq!(cfg.ring_buffer.num_blocks, 4);
    }

    #[test]
    fn api_config_defaults_to_metrics_enabled() {
        let cfg = ApiConfig::default();
        assert!(cfg.metrics);
        assert_eq!(cfg.request_timeout_secs, 30);
    }
}
