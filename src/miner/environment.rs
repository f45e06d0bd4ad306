//! The working set of one block under construction and the task
//! handed to the sealer.

use crate::chain::{State, StateKey};
use crate::primitives::{Block, GasPool, Header, Receipt, Signer, Transaction};
use alloy_primitives::{Address, U256};
use std::{fmt, sync::Arc, time::Instant};

/// The mutable working set for one block under construction. Created
/// by `prepare_work`, mutated exclusively by the owning build call and
/// released through [`Environment::discard`]; abandoning one without
/// discarding leaks its prefetcher until the state itself is dropped.
pub(crate) struct Environment {
    /// Derives senders for the block being built.
    pub(crate) signer: Arc<dyn Signer>,
    /// Speculative state all transactions apply to.
    pub(crate) state: Box<dyn State>,
    /// Number of transactions committed this cycle.
    pub(crate) tcount: usize,
    /// Gas still available for packing transactions.
    pub(crate) gas_pool: GasPool,
    /// Fee recipient; may differ from the header coinbase.
    pub(crate) coinbase: Address,
    /// Accumulated miner profit: Σ gas_used × effective gas tip.
    pub(crate) profit: U256,
    /// Header under construction.
    pub(crate) header: Header,
    /// Committed transactions, in order.
    pub(crate) txs: Vec<Arc<Transaction>>,
    /// Receipts, index-aligned with `txs`.
    pub(crate) receipts: Vec<Receipt>,
    /// Per-transaction read sets, recorded when dependency capture is
    /// active.
    pub(crate) read_sets: Vec<Vec<StateKey>>,
    /// Per-transaction write sets, index-aligned with `read_sets`.
    pub(crate) write_lists: Vec<Vec<StateKey>>,
}

impl Environment {
    /// Create the working set for a prepared header. The caller has
    /// already started the state's prefetcher.
    pub(crate) fn new(
        signer: Arc<dyn Signer>,
        state: Box<dyn State>,
        coinbase: Address,
        header: Header,
    ) -> Self {
        let gas_pool = GasPool::new(header.gas_limit);
        Self {
            signer,
            state,
            tcount: 0,
            gas_pool,
            coinbase,
            profit: U256::ZERO,
            header,
            txs: Vec::new(),
            receipts: Vec::new(),
            read_sets: Vec::new(),
            write_lists: Vec::new(),
        }
    }

    /// Deep copy. The copied state carries no prefetcher.
    pub(crate) fn copy(&self) -> Self {
        Self {
            signer: self.signer.clone(),
            state: self.state.copy(),
            tcount: self.tcount,
            gas_pool: self.gas_pool,
            coinbase: self.coinbase,
            profit: self.profit,
            header: self.header.clone(),
            txs: self.txs.clone(),
            receipts: self.receipts.clone(),
            read_sets: self.read_sets.clone(),
            write_lists: self.write_lists.clone(),
        }
    }

    /// Stop the prefetcher and drop the working set. Must be called on
    /// every abandoned environment.
    pub(crate) fn discard(mut self) {
        self.state.stop_prefetcher();
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("number", &self.header.number)
            .field("tcount", &self.tcount)
            .field("gas_remaining", &self.gas_pool.gas())
            .field("profit", &self.profit)
            .finish()
    }
}

/// Immutable handoff from the build pipeline to the task loop,
/// containing everything the consensus engine needs for sealing and
/// the result loop needs for persisting.
pub struct Task {
    /// The assembled block.
    pub block: Block,
    /// Receipts for the block's transactions.
    pub receipts: Vec<Receipt>,
    /// State at the block tip.
    pub state: Box<dyn State>,
    /// Accumulated miner profit.
    pub profit: U256,
    /// When the task was created.
    pub created_at: Instant,
    /// Whether a bundle producer built this task.
    pub is_bundle: bool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("number", &self.block.number())
            .field("txs", &self.block.transactions().len())
            .field("profit", &self.profit)
            .field("is_bundle", &self.is_bundle)
            .finish()
    }
}

/// Published pending-block snapshot, readable while the next build is
/// in flight.
pub(crate) struct PendingSnapshot {
    /// The pending block.
    pub(crate) block: Block,
    /// Its receipts.
    pub(crate) receipts: Vec<Receipt>,
    /// Its state.
    pub(crate) state: Box<dyn State>,
}
