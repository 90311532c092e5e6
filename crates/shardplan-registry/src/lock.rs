//! Scoped acquisition of the registry's advisory locks.
//!
//! Every topology operation takes a Plan lock before reading anything it
//! acts on and must release it exactly once on every exit path. These
//! guards tie the release to `Drop` so no error path can leak a lock.

use std::time::Duration;

use tracing::warn;

use crate::client::Registry;
use crate::error::RegistryResult;

/// Holds a shared read lock on a namespace until dropped.
pub struct ReadLockGuard<'a, R: Registry + ?Sized> {
    registry: &'a R,
    namespace: String,
}

impl<'a, R: Registry + ?Sized> ReadLockGuard<'a, R> {
    /// Try to acquire a read lock, blocking up to `timeout`.
    ///
    /// Returns `Ok(None)` if the lock was not obtained in time.
    pub fn acquire(
        registry: &'a R,
        namespace: &str,
        timeout: Duration,
    ) -> RegistryResult<Option<Self>> {
        if registry.lock_read(namespace, timeout)? {
            Ok(Some(Self {
                registry,
                namespace: namespace.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

impl<R: Registry + ?Sized> Drop for ReadLockGuard<'_, R> {
    fn drop(&mut self) {
        match self.registry.unlock_read(&self.namespace) {
            Ok(true) => {}
            Ok(false) => warn!(namespace = %self.namespace, "read lock was already released"),
            Err(e) => warn!(namespace = %self.namespace, error = %e, "failed to release read lock"),
        }
    }
}

/// Holds the exclusive write lock on a namespace until dropped.
pub struct WriteLockGuard<'a, R: Registry + ?Sized> {
    registry: &'a R,
    namespace: String,
}

impl<'a, R: Registry + ?Sized> WriteLockGuard<'a, R> {
    /// Try to acquire the write lock, blocking up to `timeout`.
    ///
    /// The lock expires `ttl` after acquisition if never released.
    /// Returns `Ok(None)` if the lock was not obtained in time.
    pub fn acquire(
        registry: &'a R,
        namespace: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> RegistryResult<Option<Self>> {
        if registry.lock_write(namespace, ttl, timeout)? {
            Ok(Some(Self {
                registry,
                namespace: namespace.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

impl<R: Registry + ?Sized> Drop for WriteLockGuard<'_, R> {
    fn drop(&mut self) {
        match self.registry.unlock_write(&self.namespace) {
            Ok(true) => {}
            Ok(false) => warn!(namespace = %self.namespace, "write lock was already released"),
            Err(e) => warn!(namespace = %self.namespace, error = %e, "failed to release write lock"),
        }
    }
}
