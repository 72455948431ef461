//! Binding table.
//!
//! Each exchange keeps a table from routing key to the set of queues bound
//! under that key. Identical bindings collapse to one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A binding from an exchange to a queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    /// Ignored when routing through a fanout exchange.
    pub routing_key: String,
}

impl Binding {
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Routing key to bound queues.
#[derive(Debug, Default, Clone)]
pub struct BindingTable {
    by_key: BTreeMap<String, BTreeSet<String>>,
}

impl BindingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding. Returns `false` if it already existed.
    pub fn insert(&mut self, queue: &str, routing_key: &str) -> bool {
        self.by_key
            .entry(routing_key.to_string())
            .or_default()
            .insert(queue.to_string())
    }

    /// Remove a binding. Returns `false` if it did not exist.
    pub fn remove(&mut self, queue: &str, routing_key: &str) -> bool {
        let Some(queues) = self.by_key.get_mut(routing_key) else {
            return false;
        };
        let removed = queues.remove(queue);
        if queues.is_empty() {
            self.by_key.remove(routing_key);
        }
        removed
    }

    /// Remove every binding targeting `queue`, returning the keys it was bound under.
    pub fn remove_queue(&mut self, queue: &str) -> Vec<String> {
        let mut keys = Vec::new();
        self.by_key.retain(|key, queues| {
            if queues.remove(queue) {
                keys.push(key.clone());
            }
            !queues.is_empty()
        });
        keys
    }

    #[must_use]
    pub fn contains(&self, queue: &str, routing_key: &str) -> bool {
        self.by_key
            .get(routing_key)
            .is_some_and(|queues| queues.contains(queue))
    }

    /// Queues bound under exactly `routing_key`.
    #[must_use]
    pub fn matching(&self, routing_key: &str) -> Vec<String> {
        self.by_key
            .get(routing_key)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every bound queue, once each regardless of how many keys bind it.
    #[must_use]
    pub fn all_queues(&self) -> Vec<String> {
        let unique: BTreeSet<&String> = self.by_key.values().flatten().collect();
        unique.into_iter().cloned().collect()
    }

    /// Materialize the table as bindings of `exchange`.
    #[must_use]
    pub fn bindings(&self, exchange: &str) -> Vec<Binding> {
        self.by_key
            .iter()
            .flat_map(|(key, queues)| {
                queues
                    .iter()
                    .map(move |queue| Binding::new(exchange, queue.as_str(), key.as_str()))
            })
            .collect()
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_bindings_collapse() {
        let mut table = BindingTable::new();
        assert!(table.insert("q1", "info"));
        assert!(!table.insert("q1", "info"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_fan_in_under_several_keys() {
        let mut table = BindingTable::new();
        for key in ["info", "warning", "error"] {
            table.insert("all", key);
        }
        table.insert("errors", "error");

        assert_eq!(table.len(), 4);
        assert_eq!(table.matching("error"), vec!["all", "errors"]);
        assert_eq!(table.matching("info"), vec!["all"]);
        assert!(table.matching("debug").is_empty());
        assert_eq!(table.all_queues(), vec!["all", "errors"]);
    }

    #[test]
    fn test_remove_and_remove_queue() {
        let mut table = BindingTable::new();
        table.insert("a", "k1");
        table.insert("a", "k2");
        table.insert("b", "k1");

        assert!(table.remove("b", "k1"));
        assert!(!table.remove("b", "k1"));
        assert!(table.contains("a", "k1"));

        let mut keys = table.remove_queue("a");
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_bindings_materialize() {
        let mut table = BindingTable::new();
        table.insert("q", "k");
        assert_eq!(table.bindings("ex"), vec![Binding::new("ex", "q", "k")]);
    }
}
