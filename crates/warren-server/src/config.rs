//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (WARREN_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use warren_core::{BrokerConfig, ExchangeKind};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker limits and defaults.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Durability backend.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Exchanges declared at boot.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeDefinition>,

    /// Queues declared at boot.
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueDefinition>,

    /// Bindings declared at boot.
    #[serde(default)]
    pub bindings: Vec<BindingDefinition>,
}

/// Which durability backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded sled database on disk.
    Sled,
    /// Process memory only; nothing survives a restart.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Data directory for the sled backend.
    #[serde(default = "default_data_dir")]
    pub path: String,

    /// Flush to disk after every persisted message, before the publish
    /// returns. Turning it off lets a crash lose recently published
    /// persistent messages.
    #[serde(default = "default_true")]
    pub flush_on_persist: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Interval of the broker stats report in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
}

/// An exchange to declare at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: ExchangeKind,
    #[serde(default)]
    pub durable: bool,
}

/// A queue to declare at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    #[serde(default)]
    pub durable: bool,
}

/// A binding to declare at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDefinition {
    pub exchange: String,
    pub queue: String,
    #[serde(default)]
    pub routing_key: String,
}

// Default value functions
fn default_backend() -> StorageBackend {
    StorageBackend::Sled
}

fn default_data_dir() -> String {
    std::env::var("WARREN_DATA_DIR").unwrap_or_else(|_| "./data/warren".to_string())
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    std::env::var("WARREN_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090)
}

fn default_report_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_exchanges() -> Vec<ExchangeDefinition> {
    vec![
        ExchangeDefinition {
            name: "logs".to_string(),
            kind: ExchangeKind::Fanout,
            durable: false,
        },
        ExchangeDefinition {
            name: "logs_direct".to_string(),
            kind: ExchangeKind::Direct,
            durable: false,
        },
    ]
}

fn default_queues() -> Vec<QueueDefinition> {
    vec![
        QueueDefinition {
            name: "hello".to_string(),
            durable: false,
        },
        QueueDefinition {
            name: "task_queue".to_string(),
            durable: true,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
            exchanges: default_exchanges(),
            queues: default_queues(),
            bindings: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_data_dir(),
            flush_on_persist: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            report_interval_ms: default_report_interval(),
        }
    }
}

impl StorageConfig {
    /// Data directory with `~` expanded.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).as_ref())
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "warren.toml",
            "/etc/warren/warren.toml",
            "~/.config/warren/warren.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert!(config.storage.flush_on_persist);
        assert!(config.metrics.enabled);
        assert_eq!(config.broker.default_prefetch, 1);

        let queues: Vec<_> = config.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(queues, vec!["hello", "task_queue"]);
        assert!(config.queues[1].durable);
        assert_eq!(config.exchanges[0].kind, ExchangeKind::Fanout);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [broker]
            default_prefetch = 10

            [storage]
            backend = "memory"

            [metrics]
            enabled = false

            [[exchanges]]
            name = "events"
            kind = "direct"
            durable = true

            [[queues]]
            name = "audit"
            durable = true

            [[bindings]]
            exchange = "events"
            queue = "audit"
            routing_key = "user.created"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.broker.default_prefetch, 10);
        assert_eq!(config.broker.max_name_length, 255);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.storage.flush_on_persist);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.report_interval_ms, 10_000);
        assert_eq!(config.exchanges.len(), 1);
        assert!(config.exchanges[0].durable);
        assert_eq!(config.queues[0].name, "audit");
        assert_eq!(config.bindings[0].routing_key, "user.created");
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warren.toml");
        std::fs::write(&path, "[storage]\npath = \"/var/lib/warren\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.data_dir(), PathBuf::from("/var/lib/warren"));
        assert_eq!(config.queues.len(), 2);

        std::fs::write(&path, "[storage]\nflush_on_persist = false\n").unwrap();
        assert!(!Config::from_file(&path).unwrap().storage.flush_on_persist);

        std::fs::write(&path, "[storage]\nbackend = \"floppy\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
