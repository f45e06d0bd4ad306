//! Shared fixtures for worker tests: an in-memory rig, a capturing
//! observer and instrumented executors.

use super::config::MinerConfig;
use super::environment::Task;
use super::observer::TestObserver;
use super::worker::{unix_now, BundleTaskQueue, IntervalAdjust, Worker, WorkerBuilder};
use crate::chain::{
    ChainSpec, ExecContext, ExecutionError, InMemoryChain, SimpleExecutor, State, TxExecutor,
};
use crate::consensus::{DevEngine, Engine};
use crate::pool::InMemoryPool;
use crate::primitives::{Block, GasPool, Header, Receipt, Transaction};
use alloy_primitives::{Address, B256, U256};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Etherbase used by every test worker.
pub(crate) const ETHERBASE: Address = Address::repeat_byte(0xcb);

/// Starting balance of funded test accounts.
pub(crate) const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

/// Test sender address from a byte.
pub(crate) fn sender(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// A plain transfer paying the given tip.
pub(crate) fn transfer(from: Address, nonce: u64, tip: u128) -> Arc<Transaction> {
    transfer_to(from, Address::repeat_byte(0xee), nonce, tip)
}

/// A transfer to an explicit recipient.
pub(crate) fn transfer_to(from: Address, to: Address, nonce: u64, tip: u128) -> Arc<Transaction> {
    Transaction::builder()
        .chain_id(1)
        .nonce(nonce)
        .gas_limit(21_000)
        .fee_caps(1_000_000_000, tip)
        .to(to)
        .value(U256::from(1_000u64))
        .signed_by(from)
        .build_arc()
}

/// A zero-tip transfer paying the coinbase directly.
pub(crate) fn coinbase_payment(from: Address, nonce: u64, wei: u128) -> Arc<Transaction> {
    Transaction::builder()
        .chain_id(1)
        .nonce(nonce)
        .gas_limit(21_000)
        .fee_caps(0, 0)
        .to(ETHERBASE)
        .value(U256::from(wei))
        .signed_by(from)
        .build_arc()
}

/// Poll a condition until it holds or the timeout passes.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    cond()
}

/// A condensed view of an observed sealing task.
#[derive(Debug, Clone)]
pub(crate) struct CapturedTask {
    pub(crate) parent: B256,
    pub(crate) number: u64,
    pub(crate) tx_hashes: Vec<B256>,
    pub(crate) gas_limit: u64,
    pub(crate) receipts_gas: u64,
    pub(crate) profit: U256,
}

impl CapturedTask {
    pub(crate) fn tx_count(&self) -> usize {
        self.tx_hashes.len()
    }
}

/// Observer recording tasks and interval feedback, optionally
/// skipping seals.
#[derive(Default)]
pub(crate) struct CapturingObserver {
    pub(crate) tasks: Mutex<Vec<CapturedTask>>,
    pub(crate) adjusts: Mutex<Vec<IntervalAdjust>>,
    pub(crate) resubmit_updates: Mutex<Vec<(Duration, Duration)>>,
    pub(crate) skip_all_seals: AtomicBool,
    pub(crate) skip_empty_seals: AtomicBool,
}

impl CapturingObserver {
    /// An observer skipping every seal.
    pub(crate) fn skipping_all() -> Arc<Self> {
        let observer = Self::default();
        observer.skip_all_seals.store(true, Ordering::SeqCst);
        Arc::new(observer)
    }

    /// An observer skipping only empty-block seals.
    pub(crate) fn skipping_empty() -> Arc<Self> {
        let observer = Self::default();
        observer.skip_empty_seals.store(true, Ordering::SeqCst);
        Arc::new(observer)
    }

    /// Tasks that carried at least one transaction.
    pub(crate) fn full_tasks(&self) -> Vec<CapturedTask> {
        self.tasks.lock().iter().filter(|t| t.tx_count() > 0).cloned().collect()
    }
}

impl TestObserver for CapturingObserver {
    fn on_new_task(&self, task: &Task) {
        self.tasks.lock().push(CapturedTask {
            parent: task.block.parent_hash(),
            number: task.block.number(),
            tx_hashes: task.block.transactions().iter().map(|tx| tx.hash()).collect(),
            gas_limit: task.block.header.gas_limit,
            receipts_gas: task.receipts.iter().map(|r| r.gas_used).sum(),
            profit: task.profit,
        });
    }

    fn skip_seal(&self, task: &Task) -> bool {
        self.skip_all_seals.load(Ordering::SeqCst)
            || (self.skip_empty_seals.load(Ordering::SeqCst) && task.block.is_empty())
    }

    fn on_resubmit_update(&self, min_interval: Duration, interval: Duration) {
        self.resubmit_updates.lock().push((min_interval, interval));
    }

    fn on_interval_adjust(&self, adjust: &IntervalAdjust) {
        self.adjusts.lock().push(*adjust);
    }
}

/// Executor sleeping a fixed duration per transaction; pair it with a
/// multi-threaded test runtime.
pub(crate) struct DelayedExecutor {
    inner: SimpleExecutor,
    delay: Duration,
}

impl DelayedExecutor {
    pub(crate) fn new(spec: ChainSpec, delay: Duration) -> Arc<Self> {
        Arc::new(Self { inner: SimpleExecutor::new(spec), delay })
    }
}

impl TxExecutor for DelayedExecutor {
    fn apply_transaction(
        &self,
        header: &Header,
        coinbase: Address,
        state: &mut dyn State,
        gas_pool: &mut GasPool,
        tx: &Transaction,
        cumulative_gas_used: &mut u64,
        ctx: &ExecContext,
    ) -> Result<Receipt, ExecutionError> {
        std::thread::sleep(self.delay);
        self.inner
            .apply_transaction(header, coinbase, state, gas_pool, tx, cumulative_gas_used, ctx)
    }
}

/// Executor aborting specific transactions the way the opcode-level
/// interruption hook would.
pub(crate) struct InterruptingExecutor {
    inner: SimpleExecutor,
    interrupted: HashSet<B256>,
}

impl InterruptingExecutor {
    pub(crate) fn new(spec: ChainSpec, interrupted: HashSet<B256>) -> Arc<Self> {
        Arc::new(Self { inner: SimpleExecutor::new(spec), interrupted })
    }
}

impl TxExecutor for InterruptingExecutor {
    fn apply_transaction(
        &self,
        header: &Header,
        coinbase: Address,
        state: &mut dyn State,
        gas_pool: &mut GasPool,
        tx: &Transaction,
        cumulative_gas_used: &mut u64,
        ctx: &ExecContext,
    ) -> Result<Receipt, ExecutionError> {
        if self.interrupted.contains(&tx.hash()) {
            return Err(ExecutionError::Interrupted);
        }
        self.inner
            .apply_transaction(header, coinbase, state, gas_pool, tx, cumulative_gas_used, ctx)
    }
}

/// A worker wired to in-memory collaborators.
pub(crate) struct TestRig {
    pub(crate) worker: Worker,
    pub(crate) chain: Arc<InMemoryChain>,
    pub(crate) pool: Arc<InMemoryPool>,
    pub(crate) genesis: Block,
    pub(crate) observer: Arc<CapturingObserver>,
}

/// Options for building a [`TestRig`].
pub(crate) struct RigOptions {
    pub(crate) spec: ChainSpec,
    pub(crate) config: MinerConfig,
    pub(crate) balances: Vec<(Address, U256)>,
    pub(crate) executor: Option<Arc<dyn TxExecutor>>,
    pub(crate) engine: Option<Arc<dyn Engine>>,
    pub(crate) observer: Option<Arc<CapturingObserver>>,
    pub(crate) bundle_queue: Option<Arc<BundleTaskQueue>>,
    pub(crate) init: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        // Fund a spread of test senders.
        let balances =
            (1u8..=16).map(|b| (sender(b), U256::from(ONE_ETHER))).collect();
        Self {
            spec: ChainSpec::default(),
            config: MinerConfig::new(ETHERBASE),
            balances,
            executor: None,
            engine: None,
            observer: None,
            bundle_queue: None,
            init: false,
        }
    }
}

/// Build a worker over an in-memory chain with a dev engine and the
/// flat-cost executor, unless overridden.
pub(crate) fn build_rig(options: RigOptions) -> TestRig {
    let (chain, genesis) = InMemoryChain::dev(&options.balances, 30_000_000, unix_now());
    let chain = Arc::new(chain);
    let pool = Arc::new(InMemoryPool::new());

    let engine: Arc<dyn Engine> =
        options.engine.unwrap_or_else(|| Arc::new(DevEngine::new(ETHERBASE, 1)));
    let executor: Arc<dyn TxExecutor> = options
        .executor
        .unwrap_or_else(|| Arc::new(SimpleExecutor::new(options.spec.clone())));
    let observer =
        options.observer.unwrap_or_else(|| Arc::new(CapturingObserver::default()));

    let mut builder = WorkerBuilder::new(
        options.spec,
        chain.clone(),
        engine,
        pool.clone(),
        executor,
        options.config,
    )
    .with_observer(observer.clone());
    if let Some(queue) = options.bundle_queue {
        builder = builder.with_bundle_queue(queue);
    }
    if options.init {
        builder = builder.with_init();
    }

    TestRig { worker: builder.build(), chain, pool, genesis, observer }
}
