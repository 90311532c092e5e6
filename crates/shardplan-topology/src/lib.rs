//! shardplan-topology — the topology mutation protocol.
//!
//! Coordinates which server is the primary owner of each shard and which
//! server replicates it as secondary. All topology lives in the registry's
//! `Plan` namespace; the components here hold no state of their own and
//! drive every change through the registry's single-key operations under
//! its advisory Plan lock:
//!
//! - [`TopologyReader`] resolves the current secondary of a primary.
//! - [`reassign_all_shards`] remaps shard responsibility between servers,
//!   rolling back best-effort on a mid-pass failure.
//! - [`TopologyMutator`] replaces a secondary (compare-and-set) and swaps
//!   a primary/secondary pair, compensating on partial failure.
//!
//! The registry offers no multi-key transactions, so the compound role
//! swap runs as an explicit state machine with a compensating back-edge
//! from every intermediate state. Compensation is best-effort: a mutator
//! racing the backward pass can leave a mixed state, surfaced to operators
//! as [`TopologyError::DoubleFailure`] when compensation itself fails.

pub mod error;
pub mod mutator;
pub mod plan;
pub mod reader;
pub mod rewriter;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{TopologyError, TopologyResult};
pub use mutator::{MutationOptions, SwapOutcome, TopologyMutator};
pub use plan::*;
pub use reader::TopologyReader;
pub use rewriter::reassign_all_shards;
