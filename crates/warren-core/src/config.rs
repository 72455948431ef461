//! Broker configuration.

use serde::{Deserialize, Serialize};

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Prefetch applied to consumers that do not ask for one (`0` = unlimited).
    pub default_prefetch: u16,
    /// Maximum number of exchanges.
    pub max_exchanges: usize,
    /// Maximum number of queues.
    pub max_queues: usize,
    /// Maximum exchange/queue name length in bytes.
    pub max_name_length: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_prefetch: 1,
            max_exchanges: 10_000,
            max_queues: 100_000,
            max_name_length: 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.default_prefetch, 1);
        assert_eq!(config.max_name_length, 255);
    }
}
