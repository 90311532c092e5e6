//! Shard responsibility rewriter.
//!
//! Remaps every shard owned by one server to another, across all
//! collection configurations. Callers must already hold the Plan write
//! lock. The registry has no multi-key atomicity, so a mid-pass failure
//! triggers a best-effort reverse walk restoring the snapshot captured
//! before each write; a racing mutator can still leave a mixed state,
//! which is an accepted limitation of the store.

use serde_json::Value;
use shardplan_registry::Registry;
use tracing::{debug, warn};

use crate::error::{TopologyError, TopologyResult};
use crate::plan::{COLLECTIONS_PREFIX, CollectionConfig};

/// Reassign every shard owned by `old_server` to `new_server`.
///
/// Reads the full collections namespace and writes each entry back with
/// its shard map remapped, in the (fixed) order the registry returned
/// them. Returns the number of shards that changed owner. On failure the
/// collections already written are restored in reverse order before
/// `RewriteFailed` is raised; individual rollback failures are logged and
/// swallowed so the backward pass always completes.
pub fn reassign_all_shards<R: Registry>(
    registry: &R,
    old_server: &str,
    new_server: &str,
) -> TopologyResult<u32> {
    let collections = registry.get_prefix(COLLECTIONS_PREFIX)?;

    // Snapshots of entries already written back, in write order.
    let mut written: Vec<(&str, &Value)> = Vec::new();
    let mut moved = 0u32;

    for (key, value) in &collections {
        if let Err(detail) = rewrite_one(registry, key, value, old_server, new_server, &mut moved) {
            warn!(collection = %key, %detail, "shard rewrite failed, rolling back");
            roll_back(registry, &written);
            return Err(TopologyError::RewriteFailed {
                collection: key.clone(),
                detail,
            });
        }
        written.push((key.as_str(), value));
    }

    debug!(
        %old_server,
        %new_server,
        collections = written.len(),
        shards = moved,
        "shard responsibility rewritten"
    );
    Ok(moved)
}

/// Remap one collection's shards and write the entry back.
fn rewrite_one<R: Registry>(
    registry: &R,
    key: &str,
    value: &Value,
    old_server: &str,
    new_server: &str,
    moved: &mut u32,
) -> Result<(), String> {
    let mut config: CollectionConfig =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    for owner in config.shards.values_mut() {
        if owner == old_server {
            *owner = new_server.to_string();
            *moved += 1;
        }
    }
    let updated = serde_json::to_value(&config).map_err(|e| e.to_string())?;
    registry.set(key, &updated, None).map_err(|e| e.to_string())
}

/// Restore previously written entries in reverse order, best-effort.
fn roll_back<R: Registry>(registry: &R, written: &[(&str, &Value)]) {
    for (key, original) in written.iter().rev() {
        if let Err(e) = registry.set(key, original, None) {
            warn!(collection = %key, error = %e, "rollback write failed");
        }
    }
}
