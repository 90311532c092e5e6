//! Plan namespace key scheme and topology domain types.
//!
//! The `Plan` namespace holds the target cluster topology: one key per
//! primary under `Plan/DBServers/`, one key per collection under
//! `Plan/Collections/`, and the `Plan/Version` counter that signals
//! watchers to reload after a committed mutation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier of a cluster server. Only equality is assumed.
pub type ServerId = String;

/// Opaque identifier of a shard within a collection.
pub type ShardId = String;

/// Registry namespace holding the target cluster topology.
pub const PLAN_NAMESPACE: &str = "Plan";

/// Version counter bumped after every committed Plan mutation.
pub const PLAN_VERSION_KEY: &str = "Plan/Version";

/// Prefix of the per-collection configuration entries.
pub const COLLECTIONS_PREFIX: &str = "Plan/Collections/";

/// Key of the primary→secondary mapping entry for a primary.
pub fn dbserver_key(server: &str) -> String {
    format!("Plan/DBServers/{server}")
}

/// Key of a collection configuration entry.
pub fn collection_key(collection: &str) -> String {
    format!("{COLLECTIONS_PREFIX}{collection}")
}

/// Per-collection configuration as stored in the registry.
///
/// Only the `shards` map is interpreted by the topology layer; any further
/// fields round-trip untouched so a rewrite never drops configuration
/// written by other subsystems.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionConfig {
    /// Shard id → server currently responsible for it.
    pub shards: BTreeMap<ShardId, ServerId>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A primary and its current secondary, as read from the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecondaryInfo {
    pub primary: ServerId,
    /// Verbatim registry value; an empty string means "no secondary".
    pub secondary: ServerId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_scheme() {
        assert_eq!(dbserver_key("DBServer1"), "Plan/DBServers/DBServer1");
        assert_eq!(collection_key("c1"), "Plan/Collections/c1");
        assert!(collection_key("c1").starts_with(COLLECTIONS_PREFIX));
    }

    #[test]
    fn collection_config_preserves_unknown_fields() {
        let raw = json!({
            "shards": {"s1": "DBServer1"},
            "name": "users",
            "replicationFactor": 2
        });

        let config: CollectionConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.shards.get("s1").unwrap(), "DBServer1");
        assert_eq!(config.extra.get("replicationFactor"), Some(&json!(2)));

        let round_tripped = serde_json::to_value(&config).unwrap();
        assert_eq!(round_tripped, raw);
    }
}
