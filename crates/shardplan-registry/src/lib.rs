//! shardplan-registry — client boundary for the cluster configuration registry.
//!
//! The registry is the single strongly-consistent store for cluster
//! topology. This crate defines the [`Registry`] trait every coordinator
//! talks through (single-key get/set/remove, prefix reads, advisory TTL
//! locks, version counter), RAII lock guards that guarantee release on
//! every exit path, and [`LocalRegistry`], a redb-backed implementation
//! with on-disk and in-memory backends (the latter for testing).

pub mod client;
pub mod error;
pub mod local;
pub mod lock;

pub use client::Registry;
pub use error::{RegistryError, RegistryResult};
pub use local::LocalRegistry;
pub use lock::{ReadLockGuard, WriteLockGuard};
