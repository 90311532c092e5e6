//! Error taxonomy of the topology mutation protocol.
//!
//! Every operation failure is translated into one of these kinds at the
//! operation boundary; nothing propagates as an uncaught fault, and the
//! Plan lock is released on every exit path regardless of which error
//! occurred.

use shardplan_registry::RegistryError;
use thiserror::Error;

use crate::plan::ServerId;

/// Result type alias for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors raised by topology reads and mutations.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The Plan lock was not obtained within the caller's timeout.
    /// Recoverable; the caller may retry.
    #[error("could not get a lock on {0} in the registry")]
    LockTimeout(String),

    /// The named primary has no registry entry. Terminal for this call.
    #[error("primary {0} is not configured in the registry")]
    NotConfigured(ServerId),

    /// The caller's assumed prior state does not match the registry
    /// (a lost race). Carries the actual current value so the caller can
    /// decide whether to retry with fresh data.
    #[error("primary {primary} does not have {expected} as its secondary, current value: {actual}")]
    PreconditionFailed {
        primary: ServerId,
        expected: ServerId,
        actual: String,
    },

    /// A registry write failed after the precondition passed. Multi-step
    /// mutations attempt compensation before raising this.
    #[error("registry write failed while {step}: {detail}")]
    RegistryWrite { step: &'static str, detail: String },

    /// A compensation attempt itself failed after an earlier step failed.
    /// The registry may be consistent with neither the pre- nor the
    /// post-mutation intent; operator intervention is required.
    #[error("{step} failed ({detail}) and compensation also failed ({compensation}); manual repair required")]
    DoubleFailure {
        step: &'static str,
        detail: String,
        compensation: String,
    },

    /// The shard responsibility rewrite failed mid-pass. Rollback of the
    /// collections already rewritten was attempted best-effort before this
    /// was raised.
    #[error("shard reassignment failed at {collection}: {detail}")]
    RewriteFailed { collection: String, detail: String },

    /// A registry read failed before any precondition was evaluated.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
