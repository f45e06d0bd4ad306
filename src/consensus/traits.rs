//! The consensus engine abstraction.

use crate::chain::{ChainReader, State};
use crate::primitives::{Block, Header, Receipt, Transaction, Withdrawal, EXTRA_SEAL};
use alloy_primitives::{keccak256, Address, B256};
use alloy_rlp::Encodable;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Size of the channel carrying sealing results back to the worker.
pub const RESULT_QUEUE_SIZE: usize = 20;

/// Errors surfaced by the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The local signer is not authorized to seal at this height.
    #[error("unauthorized signer {0}")]
    UnauthorizedSigner(Address),

    /// The parent required for preparation is unknown.
    #[error("unknown parent {0}")]
    UnknownParent(B256),

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

/// Canonical fingerprint of a header excluding its seal: the hash of
/// the header with the fixed-size seal suffix stripped from the
/// extra-data. Stable across re-seals of the same content.
pub fn seal_hash(header: &Header) -> B256 {
    let mut unsealed = header.clone();
    if unsealed.extra.len() >= EXTRA_SEAL {
        unsealed.extra = unsealed.extra.slice(..unsealed.extra.len() - EXTRA_SEAL);
    }
    let mut buf = Vec::with_capacity(unsealed.length());
    unsealed.encode(&mut buf);
    keccak256(&buf)
}

/// A consensus engine: prepares headers, assembles finalized blocks
/// and seals them asynchronously.
pub trait Engine: Send + Sync {
    /// Fill the consensus fields of a header under construction.
    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError>;

    /// Run post-transaction state modifications and assemble the final
    /// block.
    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainReader,
        header: Header,
        state: &mut dyn State,
        txs: Vec<Arc<Transaction>>,
        receipts: &[Receipt],
        withdrawals: Option<Vec<Withdrawal>>,
    ) -> Result<Block, EngineError>;

    /// Canonical fingerprint of a header excluding sealing fields.
    fn seal_hash(&self, header: &Header) -> B256 {
        seal_hash(header)
    }

    /// Seal a block asynchronously, publishing the result on
    /// `results`. Cancelling `stop` aborts the attempt.
    fn seal(
        &self,
        chain: Arc<dyn ChainReader>,
        block: Block,
        results: mpsc::Sender<Block>,
        stop: CancellationToken,
    ) -> Result<(), EngineError>;

    /// The account that sealed the given header.
    fn author(&self, header: &Header) -> Result<Address, EngineError>;
}
