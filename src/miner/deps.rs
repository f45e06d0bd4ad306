//! Inter-transaction dependency capture.
//!
//! While a block is being filled, every committed transaction's read
//! set and write set stream to a background collector that folds them
//! into a dependency graph: transaction `i` depends on `j < i` when
//! `j` wrote a location `i` read. After the fill, the matrix is
//! encoded into the header extra-data for downstream parallel
//! executors — unless any transaction read the coinbase or
//! burn-contract balance, in which case fee accumulation serializes
//! everything and the matrix is cleared.

use crate::chain::StateKey;
use crate::primitives::{decode_extra_data, encode_extra_data, ExtraDataError, Header};
use alloy_primitives::Address;
use std::{
    collections::{BTreeSet, HashMap},
    sync::mpsc,
    thread,
};
use tracing::error;

/// Read and write sets of one committed transaction.
#[derive(Debug)]
pub(crate) struct TxDep {
    /// Index of the transaction within the block.
    pub index: usize,
    /// Locations the transaction read.
    pub reads: Vec<StateKey>,
    /// Locations the transaction wrote.
    pub writes: Vec<StateKey>,
}

/// Background folder of [`TxDep`] records into a dependency graph.
#[derive(Debug)]
pub(crate) struct DepCollector {
    tx: mpsc::Sender<TxDep>,
    handle: thread::JoinHandle<HashMap<usize, BTreeSet<usize>>>,
}

impl DepCollector {
    /// Spawn the collector thread.
    pub(crate) fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<TxDep>();
        let handle = thread::spawn(move || {
            let mut deps: HashMap<usize, BTreeSet<usize>> = HashMap::new();
            let mut write_lists: Vec<Vec<StateKey>> = Vec::new();
            while let Ok(dep) = rx.recv() {
                update_deps(&mut deps, &write_lists, &dep);
                if write_lists.len() == dep.index {
                    write_lists.push(dep.writes);
                }
            }
            deps
        });
        Self { tx, handle }
    }

    /// Stream one transaction's sets to the collector.
    pub(crate) fn record(&self, dep: TxDep) {
        let _ = self.tx.send(dep);
    }

    /// Close the stream and collect the folded graph.
    pub(crate) fn finish(self) -> HashMap<usize, BTreeSet<usize>> {
        drop(self.tx);
        match self.handle.join() {
            Ok(deps) => deps,
            Err(_) => {
                error!(target: "miner", "Dependency collector panicked");
                HashMap::new()
            }
        }
    }
}

/// Fold one transaction into the graph: it depends on every earlier
/// transaction whose writes intersect its reads.
fn update_deps(
    deps: &mut HashMap<usize, BTreeSet<usize>>,
    write_lists: &[Vec<StateKey>],
    dep: &TxDep,
) {
    let entry = deps.entry(dep.index).or_default();
    for (j, writes) in write_lists.iter().enumerate().take(dep.index) {
        if writes.iter().any(|w| dep.reads.contains(w)) {
            entry.insert(j);
        }
    }
}

/// Whether any recorded read set touches the balance path of one of
/// the given accounts.
pub(crate) fn reads_balance_of(read_sets: &[Vec<StateKey>], accounts: &[Address]) -> bool {
    read_sets.iter().flatten().any(|key| {
        matches!(key.path, crate::chain::KeyPath::Balance) && accounts.contains(&key.address)
    })
}

/// Encode the dependency matrix into the header extra-data between
/// the vanity prefix and the seal suffix, preserving the existing
/// validator bytes. A cleared matrix encodes as empty.
pub(crate) fn encode_dependencies(
    header: &mut Header,
    deps: &HashMap<usize, BTreeSet<usize>>,
    tx_count: usize,
    clear: bool,
) -> Result<(), ExtraDataError> {
    let mut payload = decode_extra_data(&header.extra)?;

    payload.tx_dependency = if clear || tx_count == 0 {
        Vec::new()
    } else {
        (0..tx_count)
            .map(|i| {
                deps.get(&i)
                    .map(|set| set.iter().map(|j| *j as u64).collect())
                    .unwrap_or_default()
            })
            .collect()
    };

    header.extra = encode_extra_data(&header.extra, &payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{EXTRA_SEAL, EXTRA_VANITY};
    use alloy_primitives::Bytes;

    fn key(byte: u8) -> StateKey {
        StateKey::balance(Address::repeat_byte(byte))
    }

    #[test]
    fn test_collector_builds_graph() {
        let collector = DepCollector::spawn();

        // tx0 writes A; tx1 reads A; tx2 reads nothing shared.
        collector.record(TxDep { index: 0, reads: vec![], writes: vec![key(0xa)] });
        collector.record(TxDep { index: 1, reads: vec![key(0xa)], writes: vec![key(0xb)] });
        collector.record(TxDep { index: 2, reads: vec![key(0xc)], writes: vec![] });

        let deps = collector.finish();
        assert!(deps[&0].is_empty());
        assert_eq!(deps[&1].iter().copied().collect::<Vec<_>>(), vec![0]);
        assert!(deps[&2].is_empty());
    }

    #[test]
    fn test_transitive_reads_chain() {
        let collector = DepCollector::spawn();

        collector.record(TxDep { index: 0, reads: vec![], writes: vec![key(1)] });
        collector.record(TxDep { index: 1, reads: vec![key(1)], writes: vec![key(2)] });
        collector.record(TxDep { index: 2, reads: vec![key(1), key(2)], writes: vec![] });

        let deps = collector.finish();
        assert_eq!(deps[&2].iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_reads_balance_of() {
        let coinbase = Address::repeat_byte(0xcb);
        let sets = vec![vec![StateKey::nonce(coinbase)], vec![key(0x01)]];
        assert!(!reads_balance_of(&sets, &[coinbase]));

        let sets = vec![vec![StateKey::balance(coinbase)]];
        assert!(reads_balance_of(&sets, &[coinbase]));
    }

    #[test]
    fn test_encode_dependencies_round_trip() {
        let mut header = Header {
            extra: Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL]),
            ..Default::default()
        };

        let mut deps = HashMap::new();
        deps.insert(1usize, BTreeSet::from([0usize]));
        encode_dependencies(&mut header, &deps, 2, false).unwrap();

        let decoded = decode_extra_data(&header.extra).unwrap();
        assert_eq!(decoded.tx_dependency, vec![vec![], vec![0]]);
    }

    #[test]
    fn test_encode_cleared_matrix() {
        let mut header = Header {
            extra: Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL]),
            ..Default::default()
        };

        let mut deps = HashMap::new();
        deps.insert(1usize, BTreeSet::from([0usize]));
        encode_dependencies(&mut header, &deps, 2, true).unwrap();

        let decoded = decode_extra_data(&header.extra).unwrap();
        assert!(decoded.tx_dependency.is_empty());
    }

    #[test]
    fn test_encode_requires_formatted_extra() {
        let mut header = Header { extra: Bytes::from(vec![0u8; 4]), ..Default::default() };
        assert!(encode_dependencies(&mut header, &HashMap::new(), 0, false).is_err());
    }
}
