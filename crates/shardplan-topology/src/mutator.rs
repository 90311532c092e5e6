//! Topology mutator — secondary replacement and primary/secondary role swap.
//!
//! All mutations run under the Plan write lock and treat the registry as
//! the single source of truth: every operation re-reads what it needs and
//! checks its precondition against the live value before writing. The
//! role swap is a three-write sequence with no native atomicity; it is
//! driven as an explicit state machine with a compensating back-edge from
//! every intermediate state.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use shardplan_registry::{Registry, RegistryResult, WriteLockGuard};
use tracing::{info, warn};

use crate::error::{TopologyError, TopologyResult};
use crate::plan::{PLAN_NAMESPACE, PLAN_VERSION_KEY, SecondaryInfo, ServerId, dbserver_key};
use crate::reader::read_configured_secondary;
use crate::rewriter::reassign_all_shards;

/// Lock parameters for a mutation: write-lock TTL and acquisition timeout.
#[derive(Debug, Clone, Copy)]
pub struct MutationOptions {
    pub ttl: Duration,
    pub timeout: Duration,
}

impl Default for MutationOptions {
    /// 60 s for both, the administrative API defaults.
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
        }
    }
}

/// New role assignment after a successful swap.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SwapOutcome {
    /// The server now acting as primary (the former secondary).
    pub primary: ServerId,
    /// The server now acting as secondary (the former primary).
    pub secondary: ServerId,
}

/// Forward states of the role swap.
///
/// A step failure triggers the compensation of the last state reached
/// (see [`compensate`]), restoring the pre-swap topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwapPhase {
    /// Write lock held, nothing mutated yet.
    Locked,
    /// `Plan/DBServers/<primary>` removed.
    PrimaryRemoved,
    /// `Plan/DBServers/<secondary>` now maps to the old primary.
    SecondaryPromoted,
    /// Every shard of the old primary reassigned to the new one.
    ShardsReassigned,
}

/// Orchestrates topology mutations against the registry.
pub struct TopologyMutator<R: Registry> {
    registry: R,
}

impl<R: Registry> TopologyMutator<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Replace the secondary of `primary`, guarded by a compare-and-set
    /// on the current value.
    ///
    /// Fails with `PreconditionFailed` (carrying the actual current value)
    /// when `old_secondary` is stale, so two racing callers can never both
    /// believe they replaced the same secondary. On success the new value
    /// is written and `Plan/Version` increased; no rollback is attempted
    /// for this single-key case.
    pub fn replace_secondary(
        &self,
        primary: &str,
        old_secondary: &str,
        new_secondary: &str,
        opts: MutationOptions,
    ) -> TopologyResult<SecondaryInfo> {
        let _lock = WriteLockGuard::acquire(&self.registry, PLAN_NAMESPACE, opts.ttl, opts.timeout)?
            .ok_or_else(|| TopologyError::LockTimeout(PLAN_NAMESPACE.to_string()))?;

        let current = read_configured_secondary(&self.registry, primary)?;
        if current != old_secondary {
            return Err(TopologyError::PreconditionFailed {
                primary: primary.to_string(),
                expected: old_secondary.to_string(),
                actual: current,
            });
        }

        self.registry
            .set(&dbserver_key(primary), &Value::from(new_secondary), None)
            .map_err(|e| TopologyError::RegistryWrite {
                step: "replacing the secondary",
                detail: e.to_string(),
            })?;
        self.registry
            .increase_version(PLAN_VERSION_KEY)
            .map_err(|e| TopologyError::RegistryWrite {
                step: "increasing Plan/Version",
                detail: e.to_string(),
            })?;

        info!(%primary, %old_secondary, %new_secondary, "secondary replaced");
        Ok(SecondaryInfo {
            primary: primary.to_string(),
            secondary: new_secondary.to_string(),
        })
    }

    /// Swap the primary and secondary roles of a replicating pair.
    ///
    /// Moves the primary role to `secondary`, the secondary role to
    /// `primary`, and repoints every shard of the old primary at the new
    /// one. Runs as `Locked → PrimaryRemoved → SecondaryPromoted →
    /// ShardsReassigned → version bump`; a failure at any step triggers
    /// the compensation of the state reached so far, and a failed
    /// compensation surfaces as `DoubleFailure`. A version-bump failure
    /// after the final step is reported but not rolled back — the role and
    /// shard changes are already durable and only their propagation to
    /// watchers is delayed; the caller should retry the increment.
    pub fn swap_primary_and_secondary(
        &self,
        primary: &str,
        secondary: &str,
        opts: MutationOptions,
    ) -> TopologyResult<SwapOutcome> {
        let _lock = WriteLockGuard::acquire(&self.registry, PLAN_NAMESPACE, opts.ttl, opts.timeout)?
            .ok_or_else(|| TopologyError::LockTimeout(PLAN_NAMESPACE.to_string()))?;

        let current = read_configured_secondary(&self.registry, primary)?;
        if current != secondary {
            return Err(TopologyError::PreconditionFailed {
                primary: primary.to_string(),
                expected: secondary.to_string(),
                actual: current,
            });
        }

        let mut phase = SwapPhase::Locked;

        // Step 1: retire the old primary entry.
        if let Err(e) = self.registry.remove(&dbserver_key(primary)) {
            return Err(self.step_failed(
                phase,
                "removing the old primary entry",
                e.to_string(),
                primary,
                secondary,
            ));
        }
        phase = SwapPhase::PrimaryRemoved;

        // Step 2: promote the secondary, with the old primary as its secondary.
        if let Err(e) = self
            .registry
            .set(&dbserver_key(secondary), &Value::from(primary), None)
        {
            return Err(self.step_failed(
                phase,
                "promoting the secondary",
                e.to_string(),
                primary,
                secondary,
            ));
        }
        phase = SwapPhase::SecondaryPromoted;

        // Step 3: repoint every shard of the old primary at the new one.
        if let Err(e) = reassign_all_shards(&self.registry, primary, secondary) {
            return Err(self.rewrite_failed(phase, e, primary, secondary));
        }
        phase = SwapPhase::ShardsReassigned;

        // Step 4: make the change visible to watchers. Not rolled back.
        if let Err(e) = self.registry.increase_version(PLAN_VERSION_KEY) {
            warn!(%primary, %secondary, ?phase, error = %e, "role swap committed but Plan/Version bump failed");
            return Err(TopologyError::RegistryWrite {
                step: "increasing Plan/Version",
                detail: e.to_string(),
            });
        }

        info!(new_primary = %secondary, new_secondary = %primary, "primary and secondary swapped");
        Ok(SwapOutcome {
            primary: secondary.to_string(),
            secondary: primary.to_string(),
        })
    }

    /// Translate a step failure into the outer error, attempting the
    /// compensation for the state reached so far.
    fn step_failed(
        &self,
        phase: SwapPhase,
        step: &'static str,
        detail: String,
        primary: &str,
        secondary: &str,
    ) -> TopologyError {
        warn!(%primary, %secondary, ?phase, step, %detail, "role swap step failed, compensating");
        match compensate(&self.registry, phase, primary, secondary) {
            Ok(()) => TopologyError::RegistryWrite { step, detail },
            Err(comp) => TopologyError::DoubleFailure {
                step,
                detail,
                compensation: comp.to_string(),
            },
        }
    }

    /// Like [`Self::step_failed`], but keeps the rewriter's own error when
    /// compensation succeeds (it already names the failing collection).
    fn rewrite_failed(
        &self,
        phase: SwapPhase,
        error: TopologyError,
        primary: &str,
        secondary: &str,
    ) -> TopologyError {
        warn!(%primary, %secondary, ?phase, error = %error, "shard reassignment failed, compensating");
        match compensate(&self.registry, phase, primary, secondary) {
            Ok(()) => error,
            Err(comp) => TopologyError::DoubleFailure {
                step: "reassigning shard responsibility",
                detail: error.to_string(),
                compensation: comp.to_string(),
            },
        }
    }
}

/// Apply the compensating writes that take the registry from `phase` back
/// to the pre-swap topology.
///
/// Kept separate from the forward path so each state's compensation can
/// be exercised on its own. The collections namespace is not touched
/// here: the rewriter restores it itself before its error propagates.
pub(crate) fn compensate<R: Registry>(
    registry: &R,
    phase: SwapPhase,
    primary: &str,
    secondary: &str,
) -> RegistryResult<()> {
    match phase {
        SwapPhase::Locked => Ok(()),
        SwapPhase::PrimaryRemoved => {
            registry.set(&dbserver_key(primary), &Value::from(secondary), None)
        }
        SwapPhase::SecondaryPromoted | SwapPhase::ShardsReassigned => {
            registry.set(&dbserver_key(primary), &Value::from(secondary), None)?;
            registry.remove(&dbserver_key(secondary))?;
            Ok(())
        }
    }
}
