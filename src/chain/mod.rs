//! Chain, state and execution seams consumed by the worker, plus the
//! in-memory reference implementations used by dev mode and tests.

mod memory;
mod spec;
mod traits;

pub use memory::{InMemoryChain, MemoryState, SimpleExecutor};
#[cfg(test)]
pub(crate) use memory::REVERT_MARKER;
pub use spec::{ChainSpec, INITIAL_BASE_FEE, MIN_GAS_LIMIT};
pub use traits::{
    ChainError, ChainHeadEvent, ChainReader, ExecContext, ExecutionError, InterruptedTxCache,
    KeyPath, State, StateKey, TxExecutor, CHAIN_HEAD_CHAN_SIZE, INTERRUPTED_TX_CACHE_SIZE,
};
