//! Priority ordering of pending transactions.
//!
//! Yields the globally best transaction while respecting per-sender
//! nonce order: a heap holds the head transaction of every sender,
//! keyed by effective gas tip (descending) with arrival time as the
//! tie-breaker (ascending).

use super::traits::LazyTransaction;
use alloy_primitives::Address;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, VecDeque},
};

#[derive(Debug)]
struct HeadTx {
    tip: u128,
    time: u64,
    sender: Address,
    tx: LazyTransaction,
}

impl PartialEq for HeadTx {
    fn eq(&self, other: &Self) -> bool {
        self.tip == other.tip && self.time == other.time
    }
}

impl Eq for HeadTx {}

impl PartialOrd for HeadTx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeadTx {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher tip wins, earlier arrival breaks ties.
        self.tip.cmp(&other.tip).then_with(|| other.time.cmp(&self.time))
    }
}

/// Heap-ordered view over per-sender pending transaction lists.
#[derive(Debug)]
pub struct TransactionsByPriceAndNonce {
    txs: HashMap<Address, VecDeque<LazyTransaction>>,
    heads: BinaryHeap<HeadTx>,
    base_fee: Option<u128>,
}

impl TransactionsByPriceAndNonce {
    /// Build the ordered view. Senders whose head transaction cannot
    /// cover the base fee are dropped entirely; their later
    /// transactions cannot execute either.
    pub fn new(
        pending: HashMap<Address, Vec<LazyTransaction>>,
        base_fee: Option<u128>,
    ) -> Self {
        let mut txs: HashMap<Address, VecDeque<LazyTransaction>> = HashMap::new();
        let mut heads = BinaryHeap::with_capacity(pending.len());

        for (sender, list) in pending {
            let mut queue: VecDeque<LazyTransaction> = list.into();
            let Some(head) = queue.pop_front() else { continue };
            let Some(tip) = head.effective_gas_tip(base_fee) else { continue };
            heads.push(HeadTx { tip, time: head.time, sender, tx: head });
            txs.insert(sender, queue);
        }

        Self { txs, heads, base_fee }
    }

    /// The best candidate, without advancing.
    pub fn peek(&self) -> Option<&LazyTransaction> {
        self.heads.peek().map(|h| &h.tx)
    }

    /// Sender of the best candidate.
    pub fn peek_sender(&self) -> Option<Address> {
        self.heads.peek().map(|h| h.sender)
    }

    /// Replace the best candidate with the same sender's next
    /// transaction, dropping the sender when none remains or the next
    /// one cannot cover the base fee.
    pub fn shift(&mut self) {
        let Some(head) = self.heads.pop() else { return };
        let sender = head.sender;
        if let Some(next) = self.txs.get_mut(&sender).and_then(|q| q.pop_front()) {
            if let Some(tip) = next.effective_gas_tip(self.base_fee) {
                self.heads.push(HeadTx { tip, time: next.time, sender, tx: next });
                return;
            }
        }
        self.txs.remove(&sender);
    }

    /// Drop the best candidate and every later transaction of its
    /// sender.
    pub fn pop(&mut self) {
        if let Some(head) = self.heads.pop() {
            self.txs.remove(&head.sender);
        }
    }

    /// Number of transactions still reachable through the iterator.
    pub fn remaining(&self) -> usize {
        self.heads.len() + self.txs.values().map(VecDeque::len).sum::<usize>()
    }

    /// Whether no transactions remain.
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Transaction;
    use alloy_primitives::U256;

    fn lazy(sender: Address, nonce: u64, fee_cap: u128, tip_cap: u128, time: u64) -> LazyTransaction {
        let tx = Transaction::builder()
            .chain_id(1)
            .nonce(nonce)
            .gas_limit(21_000)
            .fee_caps(fee_cap, tip_cap)
            .to(Address::repeat_byte(0xee))
            .value(U256::ZERO)
            .signed_by(sender)
            .build_arc();
        LazyTransaction::new(tx, time)
    }

    fn sender(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_empty_map_yields_nothing() {
        let set = TransactionsByPriceAndNonce::new(HashMap::new(), None);
        assert!(set.peek().is_none());
        assert!(set.is_empty());
        assert_eq!(set.remaining(), 0);
    }

    #[test]
    fn test_orders_by_tip_across_senders() {
        let mut pending = HashMap::new();
        pending.insert(sender(1), vec![lazy(sender(1), 0, 100, 3, 0)]);
        pending.insert(sender(2), vec![lazy(sender(2), 0, 100, 5, 1)]);

        let mut set = TransactionsByPriceAndNonce::new(pending, None);
        assert_eq!(set.peek().unwrap().gas_tip_cap, 5);
        set.shift();
        assert_eq!(set.peek().unwrap().gas_tip_cap, 3);
        set.shift();
        assert!(set.peek().is_none());
    }

    #[test]
    fn test_respects_sender_nonce_order() {
        let mut pending = HashMap::new();
        // Nonce 0 carries a lower tip than nonce 1; the iterator must
        // still yield nonce 0 first for this sender.
        pending.insert(
            sender(1),
            vec![lazy(sender(1), 0, 100, 2, 0), lazy(sender(1), 1, 100, 9, 1)],
        );

        let mut set = TransactionsByPriceAndNonce::new(pending, None);
        let first = set.peek().unwrap().resolve().unwrap();
        assert_eq!(first.nonce, 0);
        set.shift();
        let second = set.peek().unwrap().resolve().unwrap();
        assert_eq!(second.nonce, 1);
    }

    #[test]
    fn test_arrival_breaks_price_ties() {
        let mut pending = HashMap::new();
        pending.insert(sender(1), vec![lazy(sender(1), 0, 100, 5, 10)]);
        pending.insert(sender(2), vec![lazy(sender(2), 0, 100, 5, 2)]);

        let set = TransactionsByPriceAndNonce::new(pending, None);
        assert_eq!(set.peek_sender(), Some(sender(2)));
    }

    #[test]
    fn test_pop_drops_whole_sender() {
        let mut pending = HashMap::new();
        pending.insert(
            sender(1),
            vec![lazy(sender(1), 0, 100, 9, 0), lazy(sender(1), 1, 100, 9, 1)],
        );
        pending.insert(sender(2), vec![lazy(sender(2), 0, 100, 1, 2)]);

        let mut set = TransactionsByPriceAndNonce::new(pending, None);
        assert_eq!(set.peek_sender(), Some(sender(1)));
        set.pop();
        // Both transactions of sender 1 are gone.
        assert_eq!(set.peek_sender(), Some(sender(2)));
        assert_eq!(set.remaining(), 1);
    }

    #[test]
    fn test_underpriced_heads_dropped_at_construction() {
        let mut pending = HashMap::new();
        pending.insert(sender(1), vec![lazy(sender(1), 0, 10, 1, 0)]);
        pending.insert(sender(2), vec![lazy(sender(2), 0, 100, 1, 1)]);

        // Base fee above sender 1's fee cap.
        let set = TransactionsByPriceAndNonce::new(pending, Some(50));
        assert_eq!(set.peek_sender(), Some(sender(2)));
        assert_eq!(set.remaining(), 1);
    }

    #[test]
    fn test_base_fee_shapes_priority() {
        let mut pending = HashMap::new();
        // Tip capped by fee headroom: min(10, 105 - 100) = 5.
        pending.insert(sender(1), vec![lazy(sender(1), 0, 105, 10, 0)]);
        // Plain tip 7 with plenty of headroom.
        pending.insert(sender(2), vec![lazy(sender(2), 0, 200, 7, 1)]);

        let set = TransactionsByPriceAndNonce::new(pending, Some(100));
        assert_eq!(set.peek_sender(), Some(sender(2)));
    }
}
