//! The transaction pool abstraction.

use crate::primitives::{MevBundle, Transaction};
use alloy_primitives::{Address, B256};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;

/// Size of the channel carrying new-transaction events, referenced
/// from the pool's own capacity.
pub const TX_CHAN_SIZE: usize = 4096;

/// Notification that transactions entered the pending pool.
#[derive(Debug, Clone)]
pub struct NewTxsEvent {
    /// The newly pending transactions.
    pub txs: Vec<Arc<Transaction>>,
}

/// A cheap handle on a pooled transaction: enough to order it without
/// materialising it. `resolve` may come up empty when the pool evicted
/// the transaction in the meantime.
#[derive(Debug, Clone)]
pub struct LazyTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Arrival stamp used as an ordering tie-breaker; earlier wins.
    pub time: u64,
    /// Max fee per gas.
    pub gas_fee_cap: u128,
    /// Max priority fee per gas.
    pub gas_tip_cap: u128,
    tx: Option<Arc<Transaction>>,
}

impl LazyTransaction {
    /// Wrap a live transaction.
    pub fn new(tx: Arc<Transaction>, time: u64) -> Self {
        Self {
            hash: tx.hash(),
            time,
            gas_fee_cap: tx.gas_fee_cap,
            gas_tip_cap: tx.gas_tip_cap,
            tx: Some(tx),
        }
    }

    /// A handle whose transaction is already gone; `resolve` returns
    /// nothing.
    pub fn evicted(hash: B256, time: u64, gas_fee_cap: u128, gas_tip_cap: u128) -> Self {
        Self { hash, time, gas_fee_cap, gas_tip_cap, tx: None }
    }

    /// Materialise the full transaction, if it still exists.
    pub fn resolve(&self) -> Option<Arc<Transaction>> {
        self.tx.clone()
    }

    /// The miner-retained fee per gas against the given base fee.
    /// `None` when the fee cap cannot cover the base fee.
    pub fn effective_gas_tip(&self, base_fee: Option<u128>) -> Option<u128> {
        match base_fee {
            None => Some(self.gas_tip_cap),
            Some(base) if self.gas_fee_cap >= base => {
                Some(self.gas_tip_cap.min(self.gas_fee_cap - base))
            }
            Some(_) => None,
        }
    }
}

/// The mempool as the worker sees it.
pub trait TransactionPool: Send + Sync {
    /// Subscribe to new-transaction events.
    fn subscribe_new_txs(&self) -> mpsc::Receiver<NewTxsEvent>;

    /// Pending transactions grouped by sender, nonce-ordered within
    /// each sender. `enforce_tips` filters out transactions below the
    /// pool's price floor.
    fn pending(&self, enforce_tips: bool) -> HashMap<Address, Vec<LazyTransaction>>;

    /// Accounts treated as local, whose transactions are prioritised.
    fn locals(&self) -> Vec<Address>;

    /// Bundles eligible for the given block number and timestamp.
    fn mev_bundles(&self, block_number: u64, block_timestamp: u64) -> Vec<MevBundle>;

    /// Next nonce for the account, taking pending transactions into
    /// account.
    fn nonce(&self, address: Address) -> u64;

    /// Queue a remote transaction.
    fn add_remote(&self, tx: Arc<Transaction>);

    /// Queue a local transaction.
    fn add_local(&self, tx: Arc<Transaction>);
}
