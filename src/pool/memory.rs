//! In-memory transaction pool for dev mode and tests.

use super::traits::{LazyTransaction, NewTxsEvent, TransactionPool, TX_CHAN_SIZE};
use crate::primitives::{MevBundle, Transaction};
use alloy_primitives::Address;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Default)]
struct PoolInner {
    /// Pending transactions per sender with their arrival stamp,
    /// nonce-ordered.
    pending: HashMap<Address, Vec<(Arc<Transaction>, u64)>>,
    locals: HashSet<Address>,
    bundles: Vec<MevBundle>,
}

/// A minimal [`TransactionPool`]: nonce-ordered pending lists, local
/// accounts, bundles and new-transaction notifications.
#[derive(Debug, Default)]
pub struct InMemoryPool {
    inner: RwLock<PoolInner>,
    subscribers: Mutex<Vec<mpsc::Sender<NewTxsEvent>>>,
    arrivals: AtomicU64,
}

impl InMemoryPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a bundle for inclusion.
    pub fn add_bundle(&self, bundle: MevBundle) {
        self.inner.write().bundles.push(bundle);
    }

    /// Number of pending transactions across all senders.
    pub fn pending_count(&self) -> usize {
        self.inner.read().pending.values().map(Vec::len).sum()
    }

    fn insert(&self, tx: Arc<Transaction>, local: bool) {
        let sender = match tx.recover_sender() {
            Ok(sender) => sender,
            Err(err) => {
                warn!(target: "txpool", %err, hash = ?tx.hash(), "Discarding unsignable transaction");
                return;
            }
        };

        let stamp = self.arrivals.fetch_add(1, Ordering::SeqCst);
        {
            let mut inner = self.inner.write();
            let list = inner.pending.entry(sender).or_default();
            match list.iter().position(|(t, _)| t.nonce >= tx.nonce) {
                // Replace same-nonce entries, keep nonce order otherwise.
                Some(i) if list[i].0.nonce == tx.nonce => list[i] = (tx.clone(), stamp),
                Some(i) => list.insert(i, (tx.clone(), stamp)),
                None => list.push((tx.clone(), stamp)),
            }
            if local {
                inner.locals.insert(sender);
            }
        }

        let event = NewTxsEvent { txs: vec![tx] };
        self.subscribers.lock().retain(|s| s.try_send(event.clone()).is_ok());
    }
}

impl TransactionPool for InMemoryPool {
    fn subscribe_new_txs(&self) -> mpsc::Receiver<NewTxsEvent> {
        let (tx, rx) = mpsc::channel(TX_CHAN_SIZE);
        self.subscribers.lock().push(tx);
        rx
    }

    fn pending(&self, _enforce_tips: bool) -> HashMap<Address, Vec<LazyTransaction>> {
        self.inner
            .read()
            .pending
            .iter()
            .map(|(sender, list)| {
                let lazies = list
                    .iter()
                    .map(|(tx, stamp)| LazyTransaction::new(tx.clone(), *stamp))
                    .collect();
                (*sender, lazies)
            })
            .collect()
    }

    fn locals(&self) -> Vec<Address> {
        self.inner.read().locals.iter().copied().collect()
    }

    fn mev_bundles(&self, block_number: u64, block_timestamp: u64) -> Vec<MevBundle> {
        self.inner
            .read()
            .bundles
            .iter()
            .filter(|b| {
                (b.block_number == 0 || b.block_number == block_number)
                    && (b.min_timestamp == 0 || block_timestamp >= b.min_timestamp)
                    && (b.max_timestamp == 0 || block_timestamp <= b.max_timestamp)
            })
            .cloned()
            .collect()
    }

    fn nonce(&self, address: Address) -> u64 {
        self.inner
            .read()
            .pending
            .get(&address)
            .and_then(|list| list.last().map(|(tx, _)| tx.nonce + 1))
            .unwrap_or_default()
    }

    fn add_remote(&self, tx: Arc<Transaction>) {
        self.insert(tx, false);
    }

    fn add_local(&self, tx: Arc<Transaction>) {
        self.insert(tx, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn tx(sender: Address, nonce: u64) -> Arc<Transaction> {
        Transaction::builder()
            .chain_id(1)
            .nonce(nonce)
            .gas_limit(21_000)
            .fee_caps(100, 1)
            .to(Address::repeat_byte(0xee))
            .value(U256::ZERO)
            .signed_by(sender)
            .build_arc()
    }

    #[test]
    fn test_pending_keeps_nonce_order() {
        let pool = InMemoryPool::new();
        let sender = Address::repeat_byte(1);
        pool.add_remote(tx(sender, 2));
        pool.add_remote(tx(sender, 0));
        pool.add_remote(tx(sender, 1));

        let pending = pool.pending(true);
        let nonces: Vec<u64> = pending[&sender]
            .iter()
            .map(|l| l.resolve().unwrap().nonce)
            .collect();
        assert_eq!(nonces, vec![0, 1, 2]);
        assert_eq!(pool.nonce(sender), 3);
    }

    #[test]
    fn test_locals_tracked() {
        let pool = InMemoryPool::new();
        let local = Address::repeat_byte(1);
        let remote = Address::repeat_byte(2);
        pool.add_local(tx(local, 0));
        pool.add_remote(tx(remote, 0));

        assert_eq!(pool.locals(), vec![local]);
    }

    #[tokio::test]
    async fn test_subscription_delivers_events() {
        let pool = InMemoryPool::new();
        let mut rx = pool.subscribe_new_txs();

        let t = tx(Address::repeat_byte(1), 0);
        pool.add_remote(t.clone());

        let event = rx.recv().await.expect("event");
        assert_eq!(event.txs.len(), 1);
        assert_eq!(event.txs[0].hash(), t.hash());
    }

    #[test]
    fn test_bundle_eligibility_filters() {
        let pool = InMemoryPool::new();
        pool.add_bundle(MevBundle { block_number: 5, ..Default::default() });
        pool.add_bundle(MevBundle { min_timestamp: 100, max_timestamp: 200, ..Default::default() });

        assert_eq!(pool.mev_bundles(5, 150).len(), 2);
        assert_eq!(pool.mev_bundles(6, 150).len(), 1);
        assert_eq!(pool.mev_bundles(5, 250).len(), 1);
    }
}
