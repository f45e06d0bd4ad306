//! The sealing worker: repeatedly assembles candidate blocks from the
//! mempool, executes them interruptibly against speculative state and
//! hands them to the consensus engine.
//!
//! # Modules
//!
//! - `config`: tunables and their sanitization
//! - `worker`: the worker handle, its loops and control surface
//! - `pipeline`: header preparation and the interruptible commit loop
//! - `bundles`: bundle simulation and greedy merging
//! - `deps`: inter-transaction dependency capture
//! - `sealing`: task serialisation and sealed-block persistence
//! - [`metrics`]: sealing counters
//! - `observer`: test observation points

mod bundles;
mod config;
mod deps;
mod environment;
mod error;
mod interrupt;
pub mod metrics;
mod observer;
mod pipeline;
mod sealing;
#[cfg(test)]
pub(crate) mod test_utils;
mod worker;

pub use config::{
    MinerConfig, DEFAULT_GAS_CEIL, DEFAULT_NEW_PAYLOAD_TIMEOUT, DEFAULT_RECOMMIT_INTERVAL,
    MAX_RECOMMIT_INTERVAL, MIN_RECOMMIT_INTERVAL,
};
pub use environment::Task;
pub use error::BuildError;
pub use interrupt::{InterruptFlag, InterruptSignal};
pub use observer::{NoopObserver, TestObserver};
pub use worker::{BundleTaskQueue, IntervalAdjust, Worker, WorkerBuilder, STALE_THRESHOLD};
