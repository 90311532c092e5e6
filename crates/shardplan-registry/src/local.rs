//! LocalRegistry — redb-backed registry implementation.
//!
//! A single-process stand-in for the production registry service, used by
//! tests, the CLI, and single-node deployments. Values are JSON-serialized
//! into redb's `&[u8]` value column; entries may carry an expiry epoch.
//! Advisory namespace locks live in process memory: a reader count plus an
//! optional writer deadline per namespace, guarded by a mutex/condvar pair.
//! Lock state is deliberately not persisted — a crashed holder's write
//! lock simply times out via its TTL and is taken over by the next
//! acquirer.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Registry;
use crate::error::{RegistryError, RegistryResult};

/// Registry entries keyed by full path (e.g. `Plan/DBServers/DBServer1`).
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("registry_entries");

/// Convert any `Display` error into a `RegistryError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RegistryError::$variant(e.to_string())
    };
}

/// Stored envelope: the value plus an optional expiry epoch (seconds).
#[derive(serde::Serialize, serde::Deserialize)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

impl Entry {
    fn expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// Per-namespace advisory lock state.
#[derive(Default)]
struct LockState {
    readers: u32,
    /// TTL deadline of the current write-lock holder, if any.
    writer_deadline: Option<Instant>,
}

struct LockTable {
    states: Mutex<HashMap<String, LockState>>,
    changed: Condvar,
}

/// Thread-safe local registry backed by redb.
#[derive(Clone)]
pub struct LocalRegistry {
    db: Arc<Database>,
    locks: Arc<LockTable>,
}

impl LocalRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self::from_db(db)?;
        debug!(?path, "local registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> RegistryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self::from_db(db)?;
        debug!("in-memory local registry opened");
        Ok(registry)
    }

    fn from_db(db: Database) -> RegistryResult<Self> {
        let registry = Self {
            db: Arc::new(db),
            locks: Arc::new(LockTable {
                states: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
            }),
        };
        registry.ensure_tables()?;
        Ok(registry)
    }

    /// Create the entries table if it doesn't exist yet.
    fn ensure_tables(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn lock_states(&self) -> RegistryResult<MutexGuard<'_, HashMap<String, LockState>>> {
        self.locks
            .states
            .lock()
            .map_err(|_| RegistryError::Lock("lock table poisoned".to_string()))
    }
}

impl Registry for LocalRegistry {
    fn get(&self, key: &str) -> RegistryResult<Option<Value>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let entry: Entry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                if entry.expired(epoch_secs()) {
                    Ok(None)
                } else {
                    Ok(Some(entry.value))
                }
            }
            None => Ok(None),
        }
    }

    fn get_prefix(&self, prefix: &str) -> RegistryResult<BTreeMap<String, Value>> {
        let now = epoch_secs();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        let mut results = BTreeMap::new();
        for item in table.iter().map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let entry: Entry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if !entry.expired(now) {
                    results.insert(key.value().to_string(), entry.value);
                }
            }
        }
        Ok(results)
    }

    fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> RegistryResult<()> {
        let entry = Entry {
            value: value.clone(),
            expires_at: ttl.map(|t| epoch_secs() + t.as_secs()),
        };
        let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "registry entry stored");
        Ok(())
    }

    fn remove(&self, key: &str) -> RegistryResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "registry entry removed");
        Ok(existed)
    }

    fn remove_prefix(&self, prefix: &str) -> RegistryResult<u32> {
        // Collect matching keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|item| {
                    let (key, _) = item.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(prefix).then_some(k)
                })
                .collect()
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    fn lock_read(&self, namespace: &str, timeout: Duration) -> RegistryResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut states = self.lock_states()?;
        loop {
            let now = Instant::now();
            let writer_deadline = {
                let state = states.entry(namespace.to_string()).or_default();
                match state.writer_deadline {
                    None => {
                        state.readers += 1;
                        return Ok(true);
                    }
                    Some(wd) if now >= wd => {
                        warn!(%namespace, "expiring stale write lock");
                        state.writer_deadline = None;
                        state.readers += 1;
                        return Ok(true);
                    }
                    Some(wd) => wd,
                }
            };
            if now >= deadline {
                return Ok(false);
            }
            let wait = (deadline - now).min(writer_deadline - now);
            states = self
                .locks
                .changed
                .wait_timeout(states, wait)
                .map_err(|_| RegistryError::Lock("lock table poisoned".to_string()))?
                .0;
        }
    }

    fn unlock_read(&self, namespace: &str) -> RegistryResult<bool> {
        let mut states = self.lock_states()?;
        let state = states.entry(namespace.to_string()).or_default();
        if state.readers == 0 {
            return Ok(false);
        }
        state.readers -= 1;
        self.locks.changed.notify_all();
        Ok(true)
    }

    fn lock_write(
        &self,
        namespace: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> RegistryResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut states = self.lock_states()?;
        loop {
            let now = Instant::now();
            let blocked_until = {
                let state = states.entry(namespace.to_string()).or_default();
                if let Some(wd) = state.writer_deadline {
                    if now >= wd {
                        warn!(%namespace, "expiring stale write lock");
                        state.writer_deadline = None;
                    }
                }
                if state.readers == 0 && state.writer_deadline.is_none() {
                    state.writer_deadline = Some(now + ttl);
                    return Ok(true);
                }
                // Readers have no TTL; wake at the writer's deadline if one
                // holds the lock, otherwise only on notification.
                state.writer_deadline
            };
            if now >= deadline {
                return Ok(false);
            }
            let mut wait = deadline - now;
            if let Some(wd) = blocked_until {
                wait = wait.min(wd - now);
            }
            states = self
                .locks
                .changed
                .wait_timeout(states, wait)
                .map_err(|_| RegistryError::Lock("lock table poisoned".to_string()))?
                .0;
        }
    }

    fn unlock_write(&self, namespace: &str) -> RegistryResult<bool> {
        let mut states = self.lock_states()?;
        let state = states.entry(namespace.to_string()).or_default();
        let held = state.writer_deadline.take().is_some();
        if held {
            self.locks.changed.notify_all();
        }
        Ok(held)
    }

    fn increase_version(&self, key: &str) -> RegistryResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            let current = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let entry: Entry =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    entry.value.as_u64().unwrap_or(0)
                }
                None => 0,
            };
            next = current + 1;
            let entry = Entry {
                value: Value::from(next),
                expires_at: None,
            };
            let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = next, "version increased");
        Ok(next)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(50);
    const TTL: Duration = Duration::from_secs(60);

    fn test_registry() -> LocalRegistry {
        LocalRegistry::open_in_memory().unwrap()
    }

    // ── Key/value operations ───────────────────────────────────────

    #[test]
    fn set_and_get() {
        let registry = test_registry();
        registry
            .set("Plan/DBServers/DBServer1", &json!("DBServer2"), None)
            .unwrap();

        let value = registry.get("Plan/DBServers/DBServer1").unwrap();
        assert_eq!(value, Some(json!("DBServer2")));
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = test_registry();
        assert!(registry.get("Plan/DBServers/nope").unwrap().is_none());
    }

    #[test]
    fn entry_ttl_expires() {
        let registry = test_registry();
        registry
            .set("Plan/Lock", &json!("held"), Some(Duration::ZERO))
            .unwrap();

        // Zero TTL means the entry is already expired on read.
        assert!(registry.get("Plan/Lock").unwrap().is_none());
        assert!(registry.get_prefix("Plan/").unwrap().is_empty());
    }

    #[test]
    fn prefix_scan_returns_matching_keys() {
        let registry = test_registry();
        registry
            .set("Plan/Collections/c1", &json!({"shards": {}}), None)
            .unwrap();
        registry
            .set("Plan/Collections/c2", &json!({"shards": {}}), None)
            .unwrap();
        registry
            .set("Plan/DBServers/DBServer1", &json!("DBServer2"), None)
            .unwrap();

        let collections = registry.get_prefix("Plan/Collections/").unwrap();
        assert_eq!(collections.len(), 2);
        assert!(collections.contains_key("Plan/Collections/c1"));
        assert!(collections.contains_key("Plan/Collections/c2"));
    }

    #[test]
    fn remove_single_key() {
        let registry = test_registry();
        registry.set("Plan/X", &json!(1), None).unwrap();

        assert!(registry.remove("Plan/X").unwrap());
        assert!(!registry.remove("Plan/X").unwrap());
        assert!(registry.get("Plan/X").unwrap().is_none());
    }

    #[test]
    fn remove_prefix_deletes_subtree() {
        let registry = test_registry();
        registry.set("Plan/Collections/c1", &json!(1), None).unwrap();
        registry.set("Plan/Collections/c2", &json!(2), None).unwrap();
        registry.set("Plan/Version", &json!(7), None).unwrap();

        let removed = registry.remove_prefix("Plan/Collections/").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(registry.get("Plan/Version").unwrap(), Some(json!(7)));
    }

    #[test]
    fn increase_version_from_missing_and_existing() {
        let registry = test_registry();
        assert_eq!(registry.increase_version("Plan/Version").unwrap(), 1);
        assert_eq!(registry.increase_version("Plan/Version").unwrap(), 2);
        assert_eq!(registry.get("Plan/Version").unwrap(), Some(json!(2)));
    }

    // ── Advisory locks ─────────────────────────────────────────────

    #[test]
    fn read_locks_are_shared() {
        let registry = test_registry();
        assert!(registry.lock_read("Plan", TIMEOUT).unwrap());
        assert!(registry.lock_read("Plan", TIMEOUT).unwrap());
        assert!(registry.unlock_read("Plan").unwrap());
        assert!(registry.unlock_read("Plan").unwrap());
        assert!(!registry.unlock_read("Plan").unwrap());
    }

    #[test]
    fn write_lock_excludes_readers_and_writers() {
        let registry = test_registry();
        assert!(registry.lock_write("Plan", TTL, TIMEOUT).unwrap());

        assert!(!registry.lock_read("Plan", TIMEOUT).unwrap());
        assert!(!registry.lock_write("Plan", TTL, TIMEOUT).unwrap());

        assert!(registry.unlock_write("Plan").unwrap());
        assert!(registry.lock_read("Plan", TIMEOUT).unwrap());
    }

    #[test]
    fn readers_block_writer_until_released() {
        let registry = test_registry();
        assert!(registry.lock_read("Plan", TIMEOUT).unwrap());
        assert!(!registry.lock_write("Plan", TTL, TIMEOUT).unwrap());
        assert!(registry.unlock_read("Plan").unwrap());
        assert!(registry.lock_write("Plan", TTL, TIMEOUT).unwrap());
    }

    #[test]
    fn expired_write_lock_is_taken_over() {
        let registry = test_registry();
        // Holder "crashes": lock acquired with zero TTL, never released.
        assert!(registry.lock_write("Plan", Duration::ZERO, TIMEOUT).unwrap());

        // Next acquirer takes the lock over once the TTL has passed.
        assert!(registry.lock_write("Plan", TTL, TIMEOUT).unwrap());
        assert!(registry.unlock_write("Plan").unwrap());
        // The crashed holder's late release finds nothing to release.
        assert!(!registry.unlock_write("Plan").unwrap());
    }

    #[test]
    fn write_lock_wakes_blocked_acquirer() {
        let registry = test_registry();
        assert!(registry.lock_write("Plan", TTL, TIMEOUT).unwrap());

        let contender = registry.clone();
        let handle = std::thread::spawn(move || {
            contender
                .lock_write("Plan", TTL, Duration::from_secs(5))
                .unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        assert!(registry.unlock_write("Plan").unwrap());

        assert!(handle.join().unwrap());
        assert!(registry.unlock_write("Plan").unwrap());
    }

    #[test]
    fn locks_on_different_namespaces_are_independent() {
        let registry = test_registry();
        assert!(registry.lock_write("Plan", TTL, TIMEOUT).unwrap());
        assert!(registry.lock_write("Current", TTL, TIMEOUT).unwrap());
        assert!(registry.unlock_write("Plan").unwrap());
        assert!(registry.unlock_write("Current").unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("registry.redb");

        {
            let registry = LocalRegistry::open(&db_path).unwrap();
            registry
                .set("Plan/DBServers/DBServer1", &json!("DBServer2"), None)
                .unwrap();
            registry.increase_version("Plan/Version").unwrap();
        }

        let registry = LocalRegistry::open(&db_path).unwrap();
        assert_eq!(
            registry.get("Plan/DBServers/DBServer1").unwrap(),
            Some(json!("DBServer2"))
        );
        assert_eq!(registry.get("Plan/Version").unwrap(), Some(json!(1)));
    }
}
