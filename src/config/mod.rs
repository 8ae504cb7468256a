// Configuration module

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{DEFAULT_ADDRESS, DEFAULT_PORT};
use crate::error::ProxyError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0")
    #[serde(default = "default_address")]
    pub address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

/// Process-wide transcoder tuning. Built once at startup and passed to the
/// transcoder component; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Maximum concurrent encode jobs. 0 selects the host's available
    /// parallelism.
    #[serde(default)]
    pub worker_concurrency: usize,

    /// Encoder effort/speed trade-off (0-10, where 0 is fastest). The proxy
    /// favors latency over compression ratio, so the default stays at 0.
    #[serde(default)]
    pub encode_effort: u8,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 0,
            encode_effort: 0,
        }
    }
}

impl TranscoderConfig {
    /// Resolve the configured concurrency, substituting host parallelism
    /// for the auto value.
    pub fn resolved_concurrency(&self) -> usize {
        if self.worker_concurrency > 0 {
            self.worker_concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Config, ProxyError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ProxyError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Socket address string the server binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.address, self.server.port)
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
