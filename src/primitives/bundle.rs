//! Atomic transaction bundles submitted out-of-band for top-of-block
//! inclusion.

use super::transaction::Transaction;
use alloy_primitives::B256;
use std::sync::Arc;

/// An ordered, atomic group of transactions. The bundle is only valid
/// as a whole: any transaction failing outside the reverting whitelist
/// invalidates it.
#[derive(Debug, Clone, Default)]
pub struct MevBundle {
    /// Ordered transactions making up the bundle.
    pub txs: Vec<Arc<Transaction>>,
    /// Target block number; zero means any block.
    pub block_number: u64,
    /// Inclusive minimum block timestamp; zero means unconstrained.
    pub min_timestamp: u64,
    /// Inclusive maximum block timestamp; zero means unconstrained.
    pub max_timestamp: u64,
    /// Hashes of transactions allowed to revert without invalidating
    /// the bundle.
    pub reverting_tx_hashes: Vec<B256>,
}

impl MevBundle {
    /// Whether the given transaction hash may revert.
    pub fn may_revert(&self, hash: B256) -> bool {
        self.reverting_tx_hashes.contains(&hash)
    }
}
