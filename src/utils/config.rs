// src/utils/config.rs
//! Runtime configuration
//!
//! Configuration is layered: an optional TOML file (`cvm.toml`, or the path
//! named by `CVM_CONFIG`) is read first, then environment variables with the
//! `CVM` prefix override it. Nested keys use `__` as separator:
//!
//! - `CVM__NODE__ID=node-a` -> `node.id = "node-a"`
//! - `CVM__EXECUTOR__THREADS=4` -> `executor.threads = 4`

use crate::utils::errors::{CvmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "cvm.toml";

/// How ports are made reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Single process, ports are published locally only
    Local,
    /// Ports are published for remote peers over the transport
    Distributed,
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvmConfig {
    /// This deployment target
    pub node: NodeConfig,
    /// Deployment-target identifier -> network address
    pub peers: HashMap<String, SocketAddr>,
    /// Defaults for component executors
    pub executor: ExecutorConfig,
    /// Links between nodes
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Identity of this deployment target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identifier, the authority of every URI minted here
    pub id: String,
    /// Local or distributed
    pub mode: DeploymentMode,
    /// Transport address; required in distributed mode
    pub listen_addr: Option<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "cvm-0".to_string(),
            mode: DeploymentMode::Local,
            listen_addr: None,
        }
    }
}

/// Component executor defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker count per component (1 = fully serialized)
    pub threads: usize,

    /// How long shutdown waits for in-flight tasks
    pub shutdown_grace_ms: u64,

    /// Failures retained per component
    pub failure_log_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            shutdown_grace_ms: 2_000,
            failure_log_capacity: 64,
        }
    }
}

impl ExecutorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Remote transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Give up on opening a link after this long
    pub connect_timeout_ms: u64,
    /// Largest frame accepted on a link
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Metrics exporter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint, disabled when absent
    pub prometheus_addr: Option<SocketAddr>,
}

impl CvmConfig {
    /// Load configuration from `CVM_CONFIG` (or `cvm.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("CVM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load configuration from a specific file (missing file is allowed)
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: CvmConfig = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("CVM").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration for a single-process deployment
    pub fn local(node_id: impl Into<String>) -> Self {
        Self {
            node: NodeConfig {
                id: node_id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Configuration for a distributed deployment listening on `listen_addr`
    pub fn distributed(node_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node: NodeConfig {
                id: node_id.into(),
                mode: DeploymentMode::Distributed,
                listen_addr: Some(listen_addr),
            },
            ..Default::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.node.id.is_empty() || self.node.id.contains('/') {
            return Err(CvmError::Config(format!(
                "Invalid node id '{}'",
                self.node.id
            )));
        }

        if self.executor.threads == 0 {
            return Err(CvmError::Config("Executor threads cannot be 0".to_string()));
        }

        if self.node.mode == DeploymentMode::Distributed && self.node.listen_addr.is_none() {
            return Err(CvmError::Config(
                "Distributed mode requires node.listen_addr".to_string(),
            ));
        }

        if self.transport.max_frame_bytes == 0 {
            return Err(CvmError::Config("Max frame size cannot be 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CvmConfig::default();
        assert_eq!(config.node.mode, DeploymentMode::Local);
        assert_eq!(config.executor.threads, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = CvmConfig::local("node-a");
        config.executor.threads = 0;
        assert!(config.validate().is_err());

        let mut config = CvmConfig::local("node-a");
        config.node.mode = DeploymentMode::Distributed;
        assert!(config.validate().is_err());

        let config = CvmConfig::local("bad/id");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[node]
id = "node-b"
mode = "distributed"
listen_addr = "127.0.0.1:7400"

[peers]
node-a = "127.0.0.1:7300"

[executor]
threads = 4
"#
        )
        .unwrap();

        let config = CvmConfig::load_from(file.path()).unwrap();
        assert_eq!(config.node.id, "node-b");
        assert_eq!(config.node.mode, DeploymentMode::Distributed);
        assert_eq!(config.executor.threads, 4);
        assert_eq!(
            config.peers.get("node-a"),
            Some(&"127.0.0.1:7300".parse().unwrap())
        );
        assert_eq!(config.transport.max_frame_bytes, 8 * 1024 * 1024);
    }
}
