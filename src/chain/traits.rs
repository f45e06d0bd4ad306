//! Abstractions over the blockchain, its state and the transaction
//! executor. The worker only ever talks to these traits; concrete
//! database- and EVM-backed implementations live outside this crate,
//! with [`super::memory`] providing the in-memory reference used by dev
//! mode and tests.

use crate::primitives::{
    Block, ConditionViolation, GasPool, Header, KnownAccount, Log, Receipt, Transaction,
};
use alloy_primitives::{Address, B256, U256};
use lru::LruCache;
use parking_lot::Mutex;
use std::{any::Any, num::NonZeroUsize, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Size of the channel carrying chain-head events.
pub const CHAIN_HEAD_CHAN_SIZE: usize = 10;

/// Capacity of the cache remembering transactions interrupted
/// mid-execution.
pub const INTERRUPTED_TX_CACHE_SIZE: usize = 4096;

/// Errors surfaced by chain access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// No state is available for the requested root.
    #[error("missing state for root {0}")]
    MissingState(B256),

    /// The requested block is unknown.
    #[error("missing block {0}")]
    MissingBlock(B256),

    /// Persisting a block failed.
    #[error("block write failed: {0}")]
    Write(String),
}

/// Notification that the canonical head advanced.
#[derive(Debug, Clone)]
pub struct ChainHeadEvent {
    /// The new head block.
    pub block: Block,
}

/// A path into account state, used to describe what a transaction read
/// or wrote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPath {
    /// The account balance.
    Balance,
    /// The account nonce.
    Nonce,
    /// The account code.
    Code,
    /// One storage slot.
    Storage(B256),
}

/// A fully-qualified state location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// The touched account.
    pub address: Address,
    /// The path within the account.
    pub path: KeyPath,
}

impl StateKey {
    /// Balance path of an account.
    pub fn balance(address: Address) -> Self {
        Self { address, path: KeyPath::Balance }
    }

    /// Nonce path of an account.
    pub fn nonce(address: Address) -> Self {
        Self { address, path: KeyPath::Nonce }
    }

    /// One storage slot of an account.
    pub fn storage(address: Address, slot: B256) -> Self {
        Self { address, path: KeyPath::Storage(slot) }
    }
}

/// A speculative state the worker executes against. Supports
/// journaling, deep copies, background prefetching and read/write
/// recording for dependency capture.
pub trait State: Send + Sync {
    /// Record a revision point and return its identifier.
    fn snapshot(&mut self) -> usize;

    /// Roll back to a previously recorded revision.
    fn revert_to_snapshot(&mut self, id: usize);

    /// Deep-copy the state. The copy carries no prefetcher.
    fn copy(&self) -> Box<dyn State>;

    /// Start the background prefetcher; a no-op when already running.
    fn start_prefetcher(&mut self, name: &str);

    /// Stop the background prefetcher; a no-op when not running. Every
    /// path abandoning a state is obligated to end up here.
    fn stop_prefetcher(&mut self);

    /// Declare the transaction about to be executed.
    fn set_tx_context(&mut self, tx_hash: B256, index: usize);

    /// Current balance of an account.
    fn balance(&self, address: Address) -> U256;

    /// Current nonce of an account.
    fn nonce(&self, address: Address) -> u64;

    /// Root commitment over the current state.
    fn state_root(&self) -> B256;

    /// Check known-account preconditions of a conditional transaction.
    fn validate_known_accounts(
        &self,
        accounts: &[(Address, KnownAccount)],
    ) -> Result<(), ConditionViolation>;

    /// Begin recording reads and writes for the next transaction.
    fn begin_recording(&mut self);

    /// State locations read since recording began.
    fn recorded_reads(&self) -> Vec<StateKey>;

    /// State locations written since recording began.
    fn recorded_writes(&self) -> Vec<StateKey>;

    /// Drop the recorded read and write sets.
    fn clear_recorded(&mut self);

    /// Downcast support for persistence layers.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support for concrete executors.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Read access to the canonical chain plus block persistence.
pub trait ChainReader: Send + Sync {
    /// Header of the current canonical head.
    fn current_header(&self) -> Header;

    /// Look up a block by hash.
    fn get_block_by_hash(&self, hash: B256) -> Option<Block>;

    /// Look up a canonical block by height.
    fn get_block_by_number(&self, number: u64) -> Option<Block>;

    /// Whether the chain contains the given block.
    fn has_block(&self, hash: B256, number: u64) -> bool;

    /// Open the state at the given root.
    fn state_at(&self, root: B256) -> Result<Box<dyn State>, ChainError>;

    /// Persist a sealed block together with its state and promote it
    /// to head. `emit_head` controls whether subscribers are notified.
    fn write_block_and_set_head(
        &self,
        block: &Block,
        receipts: &[Receipt],
        logs: &[Log],
        state: &dyn State,
        emit_head: bool,
    ) -> Result<(), ChainError>;

    /// Subscribe to canonical head changes.
    fn subscribe_chain_head(&self) -> mpsc::Receiver<ChainHeadEvent>;

    /// Number of connected peers, for liveness gating.
    fn peer_count(&self) -> usize;
}

/// Bounded cache of transactions that were interrupted mid-execution
/// by the opcode-level hook, keyed by transaction hash so following
/// rounds can skip or deprioritise them.
pub struct InterruptedTxCache {
    cache: Mutex<LruCache<B256, ()>>,
}

impl std::fmt::Debug for InterruptedTxCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptedTxCache").field("len", &self.len()).finish()
    }
}

impl InterruptedTxCache {
    /// Create a cache holding up to `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { cache: Mutex::new(LruCache::new(capacity)) }
    }

    /// Remember an interrupted transaction.
    pub fn insert(&self, hash: B256) {
        self.cache.lock().put(hash, ());
    }

    /// Whether the transaction was interrupted recently.
    pub fn contains(&self, hash: B256) -> bool {
        self.cache.lock().contains(&hash)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for InterruptedTxCache {
    fn default() -> Self {
        // capacity is non-zero by construction
        Self::new(NonZeroUsize::new(INTERRUPTED_TX_CACHE_SIZE).unwrap())
    }
}

/// Execution context handed to the executor for every transaction:
/// the cooperative deadline of the build round and the cache the
/// opcode-level hook feeds.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    /// Absolute deadline of the enclosing build, if any.
    pub deadline: Option<Instant>,
    /// Cache of previously interrupted transactions.
    pub interrupted_cache: Option<Arc<InterruptedTxCache>>,
}

impl ExecContext {
    /// Whether the build deadline has passed.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Transaction-local execution failures; each drives a distinct
/// iterator policy in the commit loop and never propagates beyond one
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The transaction nonce is behind the account.
    #[error("nonce too low: address {address}, tx {tx_nonce} < state {state_nonce}")]
    NonceTooLow {
        /// The sender account.
        address: Address,
        /// Nonce carried by the transaction.
        tx_nonce: u64,
        /// Nonce expected by the state.
        state_nonce: u64,
    },

    /// The transaction nonce is ahead of the account.
    #[error("nonce too high: address {address}, tx {tx_nonce} > state {state_nonce}")]
    NonceTooHigh {
        /// The sender account.
        address: Address,
        /// Nonce carried by the transaction.
        tx_nonce: u64,
        /// Nonce expected by the state.
        state_nonce: u64,
    },

    /// The block gas pool cannot cover the transaction.
    #[error("gas limit reached")]
    GasLimitReached,

    /// The transaction type is not supported on this chain.
    #[error("transaction type {0} not supported")]
    TxTypeNotSupported(u8),

    /// The fee cap is below the block base fee.
    #[error("max fee per gas below block base fee")]
    FeeCapTooLow,

    /// The sender cannot cover value plus fees.
    #[error("insufficient funds for gas * price + value")]
    InsufficientFunds,

    /// Execution was cut off by the opcode-level interruption hook.
    #[error("execution interrupted")]
    Interrupted,

    /// Any other execution failure.
    #[error("{0}")]
    Other(String),
}

/// Applies one transaction to a speculative state. This is the EVM
/// seam; gas metering and state-transition semantics live behind it.
pub trait TxExecutor: Send + Sync {
    /// Execute `tx` on `state`, drawing gas from `gas_pool` and
    /// accumulating into `cumulative_gas_used`. On error the caller
    /// rolls the state back to its own snapshot; implementations need
    /// not undo partial writes.
    #[allow(clippy::too_many_arguments)]
    fn apply_transaction(
        &self,
        header: &Header,
        coinbase: Address,
        state: &mut dyn State,
        gas_pool: &mut GasPool,
        tx: &Transaction,
        cumulative_gas_used: &mut u64,
        ctx: &ExecContext,
    ) -> Result<Receipt, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_cache_evicts_lru() {
        let cache = InterruptedTxCache::new(NonZeroUsize::new(2).unwrap());
        let (a, b, c) =
            (B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3));

        cache.insert(a);
        cache.insert(b);
        cache.insert(c);

        assert!(!cache.contains(a));
        assert!(cache.contains(b));
        assert!(cache.contains(c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_exec_context_deadline() {
        let ctx = ExecContext::default();
        assert!(!ctx.expired());

        let ctx = ExecContext {
            deadline: Some(Instant::now() - std::time::Duration::from_millis(1)),
            ..Default::default()
        };
        assert!(ctx.expired());
    }
}
