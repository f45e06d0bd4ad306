//! Dev-mode consensus engine.
//!
//! Seals blocks with a placeholder signature after waiting out the
//! block period. Good enough to run a single-node network and to
//! exercise the worker end to end; a production engine implements the
//! same [`Engine`] seam with real signatures.

use super::traits::{Engine, EngineError};
use crate::chain::{ChainReader, State};
use crate::primitives::{
    Block, Header, Receipt, Transaction, Withdrawal, EXTRA_SEAL, EXTRA_VANITY,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Difficulty of blocks sealed in turn.
pub const DIFF_IN_TURN: u64 = 2;

/// Difficulty of blocks sealed out of turn.
pub const DIFF_NO_TURN: u64 = 1;

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Instant sealer for dev networks: waits until the header timestamp,
/// stamps a placeholder seal and emits the block.
#[derive(Debug, Clone)]
pub struct DevEngine {
    signer: Address,
    period: u64,
    extra_seal_delay: Duration,
}

impl DevEngine {
    /// Create an engine sealing as `signer` with the given block
    /// period in seconds.
    pub fn new(signer: Address, period: u64) -> Self {
        Self { signer, period, extra_seal_delay: Duration::ZERO }
    }

    /// Add a fixed delay on top of the period before each seal
    /// completes. Used to keep seals in flight deliberately.
    pub fn with_seal_delay(mut self, delay: Duration) -> Self {
        self.extra_seal_delay = delay;
        self
    }

    fn seal_bytes(signer: Address) -> [u8; EXTRA_SEAL] {
        let mut seal = [0u8; EXTRA_SEAL];
        seal[..20].copy_from_slice(signer.as_slice());
        seal
    }
}

impl Engine for DevEngine {
    fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError> {
        if self.signer == Address::ZERO {
            return Err(EngineError::UnauthorizedSigner(self.signer));
        }
        let parent = chain
            .get_block_by_hash(header.parent_hash)
            .ok_or(EngineError::UnknownParent(header.parent_hash))?;

        header.difficulty = U256::from(DIFF_IN_TURN);
        header.time = header.time.max(parent.header.time + self.period);

        // Reformat the caller's vanity into the canonical layout:
        // 32-byte vanity, empty payload, zeroed seal.
        let mut extra = vec![0u8; EXTRA_VANITY + EXTRA_SEAL];
        let vanity_len = header.extra.len().min(EXTRA_VANITY);
        extra[..vanity_len].copy_from_slice(&header.extra[..vanity_len]);
        header.extra = Bytes::from(extra);
        Ok(())
    }

    fn finalize_and_assemble(
        &self,
        _chain: &dyn ChainReader,
        mut header: Header,
        state: &mut dyn State,
        txs: Vec<Arc<Transaction>>,
        receipts: &[Receipt],
        withdrawals: Option<Vec<Withdrawal>>,
    ) -> Result<Block, EngineError> {
        header.gas_used = receipts.last().map(|r| r.cumulative_gas_used).unwrap_or_default();
        header.state_root = state.state_root();

        let mut tx_bytes = Vec::with_capacity(txs.len() * 32);
        for tx in &txs {
            tx_bytes.extend_from_slice(tx.hash().as_slice());
        }
        header.transactions_root = keccak256(&tx_bytes);

        let mut receipt_bytes = Vec::with_capacity(receipts.len() * 40);
        for receipt in receipts {
            receipt_bytes.extend_from_slice(receipt.tx_hash.as_slice());
            receipt_bytes.extend_from_slice(&receipt.gas_used.to_be_bytes());
        }
        header.receipts_root = keccak256(&receipt_bytes);

        Ok(Block::new(header, txs, withdrawals))
    }

    fn seal(
        &self,
        _chain: Arc<dyn ChainReader>,
        block: Block,
        results: mpsc::Sender<Block>,
        stop: CancellationToken,
    ) -> Result<(), EngineError> {
        if block.header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(EngineError::Other(format!(
                "extra-data too short to seal: {} bytes",
                block.header.extra.len()
            )));
        }

        let delay = Duration::from_secs(block.header.time.saturating_sub(unix_now()))
            + self.extra_seal_delay;
        let signer = self.signer;

        trace!(target: "engine::dev", number = block.number(), ?delay, "Scheduling seal");

        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(target: "engine::dev", number = block.number(), "Seal aborted");
                }
                _ = tokio::time::sleep(delay) => {
                    let mut sealed = block;
                    let mut extra = sealed.header.extra.to_vec();
                    let seal_start = extra.len() - EXTRA_SEAL;
                    extra[seal_start..].copy_from_slice(&Self::seal_bytes(signer));
                    sealed.header.extra = Bytes::from(extra);

                    debug!(
                        target: "engine::dev",
                        number = sealed.number(),
                        hash = ?sealed.hash(),
                        "Sealed block"
                    );
                    let _ = results.send(sealed).await;
                }
            }
        });
        Ok(())
    }

    fn author(&self, header: &Header) -> Result<Address, EngineError> {
        if header.extra.len() < EXTRA_SEAL {
            return Ok(header.coinbase);
        }
        let seal = &header.extra[header.extra.len() - EXTRA_SEAL..];
        let author = Address::from_slice(&seal[..20]);
        if author == Address::ZERO {
            return Ok(header.coinbase);
        }
        Ok(author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InMemoryChain;

    fn engine() -> DevEngine {
        DevEngine::new(Address::repeat_byte(0x0a), 0)
    }

    fn prepared_block(chain: &InMemoryChain, genesis: &Block) -> Block {
        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            gas_limit: 30_000_000,
            time: unix_now(),
            ..Default::default()
        };
        engine().prepare(chain, &mut header).unwrap();
        Block::new(header, Vec::new(), None)
    }

    #[test]
    fn test_prepare_formats_extra() {
        let (chain, genesis) = InMemoryChain::dev(&[], 30_000_000, 0);
        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            extra: Bytes::from_static(b"flint"),
            ..Default::default()
        };
        engine().prepare(&chain, &mut header).unwrap();

        assert_eq!(header.extra.len(), EXTRA_VANITY + EXTRA_SEAL);
        assert_eq!(&header.extra[..5], b"flint");
        assert_eq!(header.difficulty, U256::from(DIFF_IN_TURN));
    }

    #[test]
    fn test_prepare_rejects_unknown_parent() {
        let (chain, _) = InMemoryChain::dev(&[], 30_000_000, 0);
        let mut header = Header { parent_hash: B256::repeat_byte(9), ..Default::default() };
        assert!(matches!(
            engine().prepare(&chain, &mut header),
            Err(EngineError::UnknownParent(_))
        ));
    }

    #[tokio::test]
    async fn test_seal_emits_signed_block() {
        let (chain, genesis) = InMemoryChain::dev(&[], 30_000_000, 0);
        let chain = Arc::new(chain);
        let block = prepared_block(&chain, &genesis);
        let (tx, mut rx) = mpsc::channel(1);

        engine()
            .seal(chain.clone() as Arc<dyn ChainReader>, block.clone(), tx, CancellationToken::new())
            .unwrap();

        let sealed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("seal timeout")
            .expect("channel closed");

        assert_eq!(sealed.number(), 1);
        assert_eq!(engine().author(&sealed.header).unwrap(), Address::repeat_byte(0x0a));
        // Sealing changes the hash but not the seal hash.
        assert_ne!(sealed.hash(), block.hash());
        assert_eq!(
            crate::consensus::seal_hash(&sealed.header),
            crate::consensus::seal_hash(&block.header)
        );
    }

    #[tokio::test]
    async fn test_seal_honours_stop() {
        let (chain, genesis) = InMemoryChain::dev(&[], 30_000_000, 0);
        let chain = Arc::new(chain);
        let block = prepared_block(&chain, &genesis);
        let (tx, mut rx) = mpsc::channel(1);
        let stop = CancellationToken::new();

        DevEngine::new(Address::repeat_byte(0x0a), 0)
            .with_seal_delay(Duration::from_secs(30))
            .seal(chain as Arc<dyn ChainReader>, block, tx, stop.clone())
            .unwrap();
        stop.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
