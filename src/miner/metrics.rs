//! Worker metrics.
//!
//! Module-scoped counters, initialised on first use and registered
//! when the first worker is built. Tests assert deltas, never absolute
//! values.

use lazy_static::lazy_static;
use prometheus::{IntCounter, Registry};

lazy_static! {
    /// Registry holding the miner metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total blocks sealed by this node.
    pub static ref SEALED_BLOCKS: IntCounter = IntCounter::new(
        "flint_miner_sealed_blocks_total",
        "Total number of blocks sealed by the miner"
    )
    .expect("metric creation failed");

    /// Empty blocks sealed by this node.
    pub static ref SEALED_EMPTY_BLOCKS: IntCounter = IntCounter::new(
        "flint_miner_sealed_empty_blocks_total",
        "Total number of empty blocks sealed by the miner"
    )
    .expect("metric creation failed");

    /// Builds cut short at the transaction level.
    pub static ref TX_COMMIT_INTERRUPT: IntCounter = IntCounter::new(
        "flint_miner_tx_commit_interrupt_total",
        "Total number of transaction commits cut short by an interrupt"
    )
    .expect("metric creation failed");
}

/// Register the miner metrics; duplicate registration (a second
/// worker in the same process) is a no-op.
pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(SEALED_BLOCKS.clone()));
    let _ = REGISTRY.register(Box::new(SEALED_EMPTY_BLOCKS.clone()));
    let _ = REGISTRY.register(Box::new(TX_COMMIT_INTERRUPT.clone()));
}
