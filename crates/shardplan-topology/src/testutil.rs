//! Fault-injecting registry wrapper for failure-path tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use shardplan_registry::{LocalRegistry, Registry, RegistryError, RegistryResult};

/// Wraps a [`LocalRegistry`] and fails selected operations on demand.
///
/// Used to drive the mutator and rewriter down their compensation paths.
pub(crate) struct FlakyRegistry {
    inner: LocalRegistry,
    fail_set: HashSet<String>,
    /// Keys whose second and later writes fail (first write succeeds, so
    /// a forward pass lands and the rollback write is the one that fails).
    fail_set_later: HashSet<String>,
    fail_remove: HashSet<String>,
    fail_version_bump: bool,
    set_counts: Mutex<HashMap<String, u32>>,
}

impl FlakyRegistry {
    pub fn new(inner: LocalRegistry) -> Self {
        Self {
            inner,
            fail_set: HashSet::new(),
            fail_set_later: HashSet::new(),
            fail_remove: HashSet::new(),
            fail_version_bump: false,
            set_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Every write to `key` fails.
    pub fn fail_set_on(mut self, key: &str) -> Self {
        self.fail_set.insert(key.to_string());
        self
    }

    /// Writes to `key` fail from the second one onward.
    pub fn fail_set_after_first_write(mut self, key: &str) -> Self {
        self.fail_set_later.insert(key.to_string());
        self
    }

    /// Every removal of `key` fails.
    pub fn fail_remove_on(mut self, key: &str) -> Self {
        self.fail_remove.insert(key.to_string());
        self
    }

    /// Version counter increments fail.
    pub fn fail_version_bump(mut self) -> Self {
        self.fail_version_bump = true;
        self
    }

    fn injected(what: &str, key: &str) -> RegistryError {
        RegistryError::Write(format!("injected {what} failure for {key}"))
    }
}

impl Registry for FlakyRegistry {
    fn get(&self, key: &str) -> RegistryResult<Option<Value>> {
        self.inner.get(key)
    }

    fn get_prefix(&self, prefix: &str) -> RegistryResult<BTreeMap<String, Value>> {
        self.inner.get_prefix(prefix)
    }

    fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> RegistryResult<()> {
        if self.fail_set.contains(key) {
            return Err(Self::injected("set", key));
        }
        if self.fail_set_later.contains(key) {
            let mut counts = self.set_counts.lock().unwrap();
            let count = counts.entry(key.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                return Err(Self::injected("set", key));
            }
        }
        self.inner.set(key, value, ttl)
    }

    fn remove(&self, key: &str) -> RegistryResult<bool> {
        if self.fail_remove.contains(key) {
            return Err(Self::injected("remove", key));
        }
        self.inner.remove(key)
    }

    fn remove_prefix(&self, prefix: &str) -> RegistryResult<u32> {
        self.inner.remove_prefix(prefix)
    }

    fn lock_read(&self, namespace: &str, timeout: Duration) -> RegistryResult<bool> {
        self.inner.lock_read(namespace, timeout)
    }

    fn unlock_read(&self, namespace: &str) -> RegistryResult<bool> {
        self.inner.unlock_read(namespace)
    }

    fn lock_write(
        &self,
        namespace: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> RegistryResult<bool> {
        self.inner.lock_write(namespace, ttl, timeout)
    }

    fn unlock_write(&self, namespace: &str) -> RegistryResult<bool> {
        self.inner.unlock_write(namespace)
    }

    fn increase_version(&self, key: &str) -> RegistryResult<u64> {
        if self.fail_version_bump {
            return Err(Self::injected("version bump", key));
        }
        self.inner.increase_version(key)
    }
}
