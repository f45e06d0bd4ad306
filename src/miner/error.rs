//! Build-level error taxonomy.

use crate::chain::ChainError;
use crate::consensus::EngineError;
use crate::primitives::ExtraDataError;
use alloy_primitives::B256;
use thiserror::Error;

/// Errors surfaced by one build round. The three interruption variants
/// each trigger a distinct recovery in `commit_work`; the rest abort
/// the round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A new chain head arrived; the build is discarded entirely.
    #[error("new head arrived while building block")]
    InterruptedByNewHead,

    /// The periodic resubmit fired; the partial block is still sealed.
    #[error("recommit interrupt while building block")]
    InterruptedByRecommit,

    /// The payload deadline passed; the partial block is still sealed.
    #[error("timeout while building block")]
    InterruptedByTimeout,

    /// A bundle was cut short by an interrupt signal.
    #[error("interrupt while applying bundles")]
    BundleInterrupted,

    /// A bundle transaction failed, invalidating the whole bundle.
    #[error("could not apply bundle transaction {0}")]
    CouldNotApplyBundleTx(B256),

    /// The requested parent block is unknown.
    #[error("missing parent {0}")]
    MissingParent(B256),

    /// The requested timestamp is not after the parent and may not be
    /// adjusted.
    #[error("invalid timestamp, parent {parent} given {given}")]
    InvalidTimestamp {
        /// Parent timestamp.
        parent: u64,
        /// Requested timestamp.
        given: u64,
    },

    /// Building was requested while no etherbase is configured.
    #[error("refusing to mine without etherbase")]
    MissingEtherbase,

    /// The consensus engine rejected the work.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Chain access failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The extra-data payload could not be read or written.
    #[error(transparent)]
    Extra(#[from] ExtraDataError),

    /// The worker has shut down.
    #[error("miner closed")]
    Closed,
}

impl BuildError {
    /// Whether this is one of the three cooperative interruptions.
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            Self::InterruptedByNewHead | Self::InterruptedByRecommit | Self::InterruptedByTimeout
        )
    }
}
