//! Broker lifecycle for the Warren server.
//!
//! Opens the durability backend, recovers the broker, declares the
//! configured topology and keeps reporting stats until shutdown.

use crate::config::{Config, StorageBackend};
use crate::metrics;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use warren_core::{Broker, ConnectionId, MemoryStore, MessageStore, QueueOptions, SledStore};

/// Open the configured durability backend.
///
/// # Errors
///
/// Returns an error if the sled database cannot be opened.
pub fn open_store(config: &Config) -> Result<Arc<dyn MessageStore>> {
    match config.storage.backend {
        StorageBackend::Sled => {
            let path = config.storage.data_dir();
            let store = SledStore::open(&path, config.storage.flush_on_persist)
                .with_context(|| format!("Failed to open data directory: {}", path.display()))?;
            info!("Using sled storage at {}", path.display());
            if !config.storage.flush_on_persist {
                warn!("flush_on_persist is off, a crash may lose recently published persistent messages");
            }
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage, nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Declare the configured exchanges, queues and bindings.
///
/// Declarations are idempotent, so definitions recovered from storage are
/// left as they are.
///
/// # Errors
///
/// Returns an error on the first declaration the broker rejects.
pub fn apply_definitions(broker: &Broker, config: &Config) -> Result<()> {
    let conn = broker.open_connection();
    let result = declare_all(broker, config, &conn);
    broker.close_connection(&conn);
    result
}

fn declare_all(broker: &Broker, config: &Config, conn: &ConnectionId) -> Result<()> {
    for ex in &config.exchanges {
        broker
            .declare_exchange(&ex.name, ex.kind, ex.durable)
            .with_context(|| format!("Failed to declare exchange '{}'", ex.name))?;
    }

    for q in &config.queues {
        let options = if q.durable {
            QueueOptions::durable()
        } else {
            QueueOptions::transient()
        };
        broker
            .declare_queue(conn, &q.name, options)
            .with_context(|| format!("Failed to declare queue '{}'", q.name))?;
    }

    for b in &config.bindings {
        broker
            .bind(conn, &b.exchange, &b.queue, &b.routing_key)
            .with_context(|| {
                format!(
                    "Failed to bind queue '{}' to exchange '{}' with key '{}'",
                    b.queue, b.exchange, b.routing_key
                )
            })?;
    }

    info!(
        exchanges = config.exchanges.len(),
        queues = config.queues.len(),
        bindings = config.bindings.len(),
        "Definitions applied"
    );
    Ok(())
}

/// Periodically log broker stats and export them as gauges.
async fn report_stats(broker: Arc<Broker>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        interval.tick().await;
        let stats = broker.stats();
        metrics::record_stats(&stats);
        debug!(
            queues = stats.queue_count,
            consumers = stats.consumer_count,
            connections = stats.connection_count,
            ready = stats.ready_messages,
            unacked = stats.unacked_messages,
            "Broker stats"
        );
    }
}

/// Run the broker until ctrl-c.
///
/// # Errors
///
/// Returns an error if the broker cannot be started or the store cannot be
/// flushed on shutdown.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = open_store(&config)?;
    let broker = Arc::new(
        Broker::open(config.broker.clone(), store).context("Failed to recover broker state")?,
    );
    apply_definitions(&broker, &config)?;

    let reporter = tokio::spawn(report_stats(broker.clone(), config.metrics.report_interval_ms));

    info!("Warren broker ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    reporter.abort();
    broker.flush().context("Failed to flush storage")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BindingDefinition, ExchangeDefinition};
    use warren_core::{BrokerConfig, ExchangeKind, Message};

    fn sled_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.storage.path = dir.path().display().to_string();
        config.bindings.push(BindingDefinition {
            exchange: "logs_direct".to_string(),
            queue: "task_queue".to_string(),
            routing_key: "task".to_string(),
        });
        config
    }

    #[test]
    fn test_apply_default_definitions() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        let broker = Broker::open(BrokerConfig::default(), open_store(&config).unwrap()).unwrap();
        apply_definitions(&broker, &config).unwrap();

        assert!(broker.exchange_exists("logs"));
        assert!(broker.exchange_exists("logs_direct"));
        assert!(broker.queue_exists("hello"));
        assert!(broker.queue_exists("task_queue"));
        assert_eq!(broker.stats().connection_count, 0);

        // Applying twice is harmless.
        apply_definitions(&broker, &config).unwrap();
    }

    #[test]
    fn test_conflicting_definition_fails() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.exchanges.push(ExchangeDefinition {
            name: "logs".to_string(),
            kind: ExchangeKind::Direct,
            durable: false,
        });
        let broker = Broker::default();
        let err = apply_definitions(&broker, &config).unwrap_err();
        assert!(err.to_string().contains("logs"));
    }

    #[test]
    fn test_durable_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled_config(&dir);

        {
            let broker = Broker::open(config.broker.clone(), open_store(&config).unwrap()).unwrap();
            apply_definitions(&broker, &config).unwrap();
            broker
                .publish("", "task_queue", Message::persistent("resize image"))
                .unwrap();
            broker.publish("", "hello", Message::persistent("gone")).unwrap();
            broker.flush().unwrap();
        }

        let broker = Broker::open(config.broker.clone(), open_store(&config).unwrap()).unwrap();
        assert!(broker.queue_exists("task_queue"));
        assert!(!broker.queue_exists("hello"));
        apply_definitions(&broker, &config).unwrap();

        let conn = broker.open_connection();
        let delivery = broker.get(&conn, "task_queue", true).unwrap().unwrap();
        assert_eq!(delivery.payload(), "resize image");
        assert!(delivery.redelivered);
        assert_eq!(broker.queue_info("hello").unwrap().message_count, 0);
    }
}
