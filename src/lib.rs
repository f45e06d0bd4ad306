//! Flint block-production engine.
//!
//! The crate implements the sealing worker of a Flint
//! proof-of-authority node: a long-lived actor that assembles
//! candidate blocks from a mempool, executes their transactions
//! against speculative state and submits them to a consensus engine
//! for sealing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Worker                             │
//! │                                                             │
//! │  NewWorkLoop ──new-work──► MainLoop ──task──► TaskLoop      │
//! │   ▲  ▲  ▲                 (pipeline)             │          │
//! │   │  │  └─ IntervalAdjust                        ▼          │
//! │   │  └──── recommit timer                  Engine::seal     │
//! │   └─────── chain-head events                     │          │
//! │                                                  ▼          │
//! │          Chain ◄──write+head── ResultLoop ◄───result        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The chain, its state, the transaction executor, the mempool and
//! the consensus engine are all consumed through traits; in-memory
//! reference implementations back dev mode and the test suites.
//!
//! # Modules
//!
//! - [`primitives`]: blocks, transactions, receipts, bundles and the
//!   extra-data layout
//! - [`chain`]: chain/state/executor seams plus in-memory
//!   implementations
//! - [`consensus`]: the engine seam and the dev sealer
//! - [`pool`]: the mempool seam and price-and-nonce ordering
//! - [`miner`]: the worker itself

pub mod chain;
pub mod consensus;
pub mod miner;
pub mod pool;
pub mod primitives;

pub use miner::{
    BundleTaskQueue, BuildError, MinerConfig, NoopObserver, TestObserver, Worker, WorkerBuilder,
};
