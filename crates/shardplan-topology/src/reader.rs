//! Topology reader — resolves the current secondary of a primary.

use std::time::Duration;

use shardplan_registry::{ReadLockGuard, Registry, RegistryError};
use tracing::debug;

use crate::error::{TopologyError, TopologyResult};
use crate::plan::{PLAN_NAMESPACE, SecondaryInfo, dbserver_key};

/// Read-only topology queries against the registry.
pub struct TopologyReader<R: Registry> {
    registry: R,
}

impl<R: Registry> TopologyReader<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Resolve the current secondary of `primary`.
    ///
    /// Takes the Plan read lock for the duration of the read; the lock is
    /// released on every exit path. The stored value is returned verbatim
    /// (an empty string means the primary has no secondary).
    pub fn get_secondary(&self, primary: &str, timeout: Duration) -> TopologyResult<SecondaryInfo> {
        let _lock = ReadLockGuard::acquire(&self.registry, PLAN_NAMESPACE, timeout)?
            .ok_or_else(|| TopologyError::LockTimeout(PLAN_NAMESPACE.to_string()))?;

        let secondary = read_configured_secondary(&self.registry, primary)?;
        debug!(%primary, %secondary, "resolved secondary");
        Ok(SecondaryInfo {
            primary: primary.to_string(),
            secondary,
        })
    }
}

/// Read the configured secondary of `primary`, which must exist.
///
/// Shared by the reader and the mutator; callers hold the appropriate
/// Plan lock.
pub(crate) fn read_configured_secondary<R: Registry>(
    registry: &R,
    primary: &str,
) -> TopologyResult<String> {
    let key = dbserver_key(primary);
    let value = registry
        .get(&key)?
        .ok_or_else(|| TopologyError::NotConfigured(primary.to_string()))?;
    match value.as_str() {
        Some(secondary) => Ok(secondary.to_string()),
        None => Err(TopologyError::Registry(RegistryError::Deserialize(
            format!("{key} does not hold a server id"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardplan_registry::LocalRegistry;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn seeded_registry(primary: &str, secondary: &str) -> LocalRegistry {
        let registry = LocalRegistry::open_in_memory().unwrap();
        registry
            .set(&dbserver_key(primary), &json!(secondary), None)
            .unwrap();
        registry
    }

    #[test]
    fn returns_configured_secondary() {
        let registry = seeded_registry("DBServer1", "DBServer2");
        let reader = TopologyReader::new(registry);

        let info = reader.get_secondary("DBServer1", TIMEOUT).unwrap();
        assert_eq!(info.primary, "DBServer1");
        assert_eq!(info.secondary, "DBServer2");
    }

    #[test]
    fn unknown_primary_is_not_configured() {
        let registry = LocalRegistry::open_in_memory().unwrap();
        let reader = TopologyReader::new(registry);

        let err = reader.get_secondary("DBServer9", TIMEOUT).unwrap_err();
        assert!(matches!(err, TopologyError::NotConfigured(p) if p == "DBServer9"));
    }

    #[test]
    fn empty_secondary_returned_verbatim() {
        let registry = seeded_registry("DBServer1", "");
        let reader = TopologyReader::new(registry);

        let info = reader.get_secondary("DBServer1", TIMEOUT).unwrap();
        assert_eq!(info.secondary, "");
    }

    #[test]
    fn held_write_lock_times_out_the_read() {
        let registry = seeded_registry("DBServer1", "DBServer2");
        assert!(
            registry
                .lock_write(PLAN_NAMESPACE, Duration::from_secs(60), TIMEOUT)
                .unwrap()
        );

        let reader = TopologyReader::new(registry.clone());
        let err = reader.get_secondary("DBServer1", TIMEOUT).unwrap_err();
        assert!(matches!(err, TopologyError::LockTimeout(_)));

        registry.unlock_write(PLAN_NAMESPACE).unwrap();
    }

    #[test]
    fn read_lock_released_after_failure() {
        let registry = LocalRegistry::open_in_memory().unwrap();
        let reader = TopologyReader::new(registry.clone());

        // NotConfigured error path must still release the read lock.
        assert!(reader.get_secondary("DBServer9", TIMEOUT).is_err());
        assert!(
            registry
                .lock_write(PLAN_NAMESPACE, Duration::from_secs(60), TIMEOUT)
                .unwrap()
        );
        registry.unlock_write(PLAN_NAMESPACE).unwrap();
    }
}
