//! Registry client contract.
//!
//! The registry is the strongly consistent store holding all cluster
//! topology under the `Plan/` namespace. Coordinators only ever talk to it
//! through this trait: single-key get/set/remove, prefix ("recursive")
//! reads, advisory read/write locks with a TTL, and a version counter.
//! There are no multi-key transactions; everything above single-key
//! atomicity is the orchestration layer's problem.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::RegistryResult;

/// Client contract for the cluster configuration registry.
///
/// Implementations must be shareable across threads. Every coordinator
/// call path performs synchronous round-trips through these methods and
/// holds no state of its own between calls — the registry is the single
/// source of truth.
pub trait Registry: Send + Sync {
    /// Read a single key. `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> RegistryResult<Option<Value>>;

    /// Read every key under a prefix, keyed by full key.
    ///
    /// The returned map has an arbitrary but fixed iteration order for the
    /// duration of one call.
    fn get_prefix(&self, prefix: &str) -> RegistryResult<BTreeMap<String, Value>>;

    /// Write a single key. A `ttl` of `None` means the entry never expires.
    fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> RegistryResult<()>;

    /// Remove a single key. Returns true if it existed.
    fn remove(&self, key: &str) -> RegistryResult<bool>;

    /// Remove every key under a prefix. Returns the number removed.
    fn remove_prefix(&self, prefix: &str) -> RegistryResult<u32>;

    /// Acquire a shared read lock on a namespace.
    ///
    /// Blocks up to `timeout`; returns `Ok(false)` if the lock could not
    /// be obtained in time. Read locks may be held concurrently with other
    /// read locks but not with the write lock.
    fn lock_read(&self, namespace: &str, timeout: Duration) -> RegistryResult<bool>;

    /// Release a read lock. Returns false if none was held.
    fn unlock_read(&self, namespace: &str) -> RegistryResult<bool>;

    /// Acquire the exclusive write lock on a namespace.
    ///
    /// The lock expires `ttl` after acquisition if the holder never
    /// releases it (crashed holder); the next acquirer may then take it
    /// over. Blocks up to `timeout`; returns `Ok(false)` on timeout.
    fn lock_write(
        &self,
        namespace: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> RegistryResult<bool>;

    /// Release the write lock. Returns false if none was held.
    fn unlock_write(&self, namespace: &str) -> RegistryResult<bool>;

    /// Increment a version counter key, returning the new value.
    ///
    /// A missing key counts as zero.
    fn increase_version(&self, key: &str) -> RegistryResult<u64>;
}
