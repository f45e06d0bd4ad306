//! The sealing worker.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Worker                               │
//! │                                                              │
//! │  NewWorkLoop ──new-work──► MainLoop ──task──► TaskLoop       │
//! │   ▲  ▲  ▲                  (build pipeline)      │           │
//! │   │  │  └── IntervalAdjust feedback              ▼           │
//! │   │  └───── recommit timer                  Engine::seal     │
//! │   └──────── chain-head events                    │           │
//! │                                                  ▼           │
//! │            Chain ◄──write+head─── ResultLoop ◄─result─┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Four cooperating tasks: the new-work loop debounces triggers and
//! owns the adaptive recommit interval, the main loop dispatches
//! requests into the build pipeline, the task loop serialises sealing
//! attempts, and the result loop persists sealed blocks. A bundle
//! producer publishes its tasks into a shared queue instead of sealing
//! them itself; a consumer bridges that queue into its own task loop.

use super::config::{
    MinerConfig, INTERVAL_ADJUST_BIAS, INTERVAL_ADJUST_RATIO, MAX_RECOMMIT_INTERVAL,
    MIN_RECOMMIT_INTERVAL,
};
use super::environment::{PendingSnapshot, Task};
use super::error::BuildError;
use super::interrupt::{InterruptFlag, InterruptSignal};
use super::metrics;
use super::observer::{NoopObserver, TestObserver};
use super::pipeline::GenerateParams;
use crate::chain::{ChainHeadEvent, ChainReader, ChainSpec, InterruptedTxCache, State, TxExecutor};
use crate::consensus::{Engine, RESULT_QUEUE_SIZE};
use crate::pool::TransactionPool;
use crate::primitives::{Block, Receipt, Withdrawal};
use alloy_primitives::{Address, Bytes, B256, U256};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

/// Depth beyond which pending sealing tasks are considered
/// unreachable and purged.
pub const STALE_THRESHOLD: u64 = 7;

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// A resubmit-interval adjustment emitted by the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalAdjust {
    /// Fill ratio of the interrupted build; meaningful when `inc`.
    pub ratio: f64,
    /// Grow the interval (the build starved) instead of shrinking it.
    pub inc: bool,
}

/// Request for new sealing work.
#[derive(Debug)]
pub(crate) struct NewWorkRequest {
    /// Shared flag through which this request can later be
    /// interrupted.
    pub(crate) interrupt: Arc<InterruptFlag>,
    /// Target timestamp of the round.
    pub(crate) timestamp: u64,
    /// Skip the empty-block pre-seal for this round.
    pub(crate) noempty: bool,
}

/// Request for a one-shot payload with explicit parameters.
pub(crate) struct GetWorkRequest {
    pub(crate) params: GenerateParams,
    pub(crate) reply: oneshot::Sender<Result<(Block, U256), BuildError>>,
}

/// Shared task queue wiring bundle producers to the worker that seals
/// their blocks.
#[derive(Debug)]
pub struct BundleTaskQueue {
    tx: mpsc::Sender<Task>,
    rx: Mutex<Option<mpsc::Receiver<Task>>>,
}

impl BundleTaskQueue {
    /// Create a queue.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(RESULT_QUEUE_SIZE);
        Arc::new(Self { tx, rx: Mutex::new(Some(rx)) })
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Task> {
        self.tx.clone()
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<Task>> {
        self.rx.lock().take()
    }
}

/// Mutable configuration guarded by the worker's config lock.
#[derive(Debug)]
pub(crate) struct MutableConfig {
    pub(crate) coinbase: Address,
    pub(crate) extra: Bytes,
    pub(crate) gas_ceil: u64,
}

/// Shared core of the worker; every loop holds an [`Arc`] of it.
pub(crate) struct WorkerInner {
    pub(crate) spec: Arc<ChainSpec>,
    pub(crate) chain: Arc<dyn ChainReader>,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) pool: Arc<dyn TransactionPool>,
    pub(crate) executor: Arc<dyn TxExecutor>,
    pub(crate) observer: Arc<dyn TestObserver>,

    pub(crate) config: RwLock<MutableConfig>,
    pub(crate) new_payload_timeout: Duration,
    pub(crate) commit_interrupt: bool,
    pub(crate) bundle_mode: bool,
    pub(crate) max_merged_bundles: u64,

    pub(crate) new_work_tx: mpsc::Sender<NewWorkRequest>,
    pub(crate) get_work_tx: mpsc::Sender<GetWorkRequest>,
    pub(crate) task_tx: mpsc::Sender<Task>,
    pub(crate) result_tx: mpsc::Sender<Block>,
    pub(crate) start_tx: mpsc::Sender<()>,
    pub(crate) resubmit_interval_tx: mpsc::UnboundedSender<Duration>,
    pub(crate) resubmit_adjust_tx: mpsc::UnboundedSender<IntervalAdjust>,
    pub(crate) mined_block_tx: broadcast::Sender<Block>,
    pub(crate) exit: CancellationToken,

    pub(crate) pending_tasks: RwLock<HashMap<B256, Task>>,
    pub(crate) snapshot: RwLock<Option<PendingSnapshot>>,

    pub(crate) running: AtomicBool,
    pub(crate) new_txs: AtomicI32,
    pub(crate) syncing: AtomicBool,
    pub(crate) noempty: AtomicBool,

    pub(crate) interrupted_cache: Arc<InterruptedTxCache>,
}

impl WorkerInner {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn etherbase(&self) -> Address {
        self.config.read().coinbase
    }

    /// Purge pending tasks more than [`STALE_THRESHOLD`] blocks behind
    /// the given head.
    pub(crate) fn clear_pending(&self, number: u64) {
        self.pending_tasks
            .write()
            .retain(|_, task| task.block.number() + STALE_THRESHOLD > number);
    }

    /// Interrupt the previous request, allocate a fresh flag and
    /// publish the next one. Returns false when the worker is exiting.
    async fn emit_work(
        &self,
        interrupt: &mut Option<Arc<InterruptFlag>>,
        timestamp: u64,
        noempty: bool,
        signal: InterruptSignal,
    ) -> bool {
        if let Some(prev) = interrupt.as_ref() {
            prev.store(signal);
        }
        let fresh = Arc::new(InterruptFlag::default());
        *interrupt = Some(fresh.clone());

        let request = NewWorkRequest { interrupt: fresh, timestamp, noempty };
        tokio::select! {
            result = self.new_work_tx.send(request) => result.is_ok(),
            _ = self.exit.cancelled() => false,
        }
    }

    /// Submits new sealing work upon start signals, chain-head events
    /// and the recommit timer; owns the adaptive recommit interval.
    pub(crate) async fn new_work_loop(
        self: Arc<Self>,
        mut start_rx: mpsc::Receiver<()>,
        mut head_rx: mpsc::Receiver<ChainHeadEvent>,
        mut interval_rx: mpsc::UnboundedReceiver<Duration>,
        mut adjust_rx: mpsc::UnboundedReceiver<IntervalAdjust>,
        recommit: Duration,
    ) {
        let mut interrupt: Option<Arc<InterruptFlag>> = None;
        let mut min_recommit = recommit;
        let mut recommit = recommit;
        let mut timestamp: u64 = 0;

        let timer = tokio::time::sleep(recommit);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = self.exit.cancelled() => return,

                Some(()) = start_rx.recv() => {
                    self.clear_pending(self.chain.current_header().number);
                    timestamp = unix_now();
                    if self.emit_work(&mut interrupt, timestamp, false, InterruptSignal::NewHead).await {
                        timer.as_mut().reset(tokio::time::Instant::now() + recommit);
                        self.new_txs.store(0, Ordering::SeqCst);
                    }
                }

                Some(event) = head_rx.recv() => {
                    self.clear_pending(event.block.number());
                    timestamp = unix_now();
                    if self.emit_work(&mut interrupt, timestamp, false, InterruptSignal::NewHead).await {
                        timer.as_mut().reset(tokio::time::Instant::now() + recommit);
                        self.new_txs.store(0, Ordering::SeqCst);
                    }
                }

                _ = &mut timer => {
                    // Resubmit periodically to pull in higher-priced
                    // transactions, except in 0-period dev mode where
                    // arrival events drive building directly.
                    if self.is_running() && self.spec.dev_period != Some(0) {
                        if self.new_txs.load(Ordering::SeqCst) == 0 {
                            timer.as_mut().reset(tokio::time::Instant::now() + recommit);
                        } else if self
                            .emit_work(&mut interrupt, timestamp, true, InterruptSignal::Resubmit)
                            .await
                        {
                            timer.as_mut().reset(tokio::time::Instant::now() + recommit);
                            self.new_txs.store(0, Ordering::SeqCst);
                        }
                    } else {
                        timer.as_mut().reset(tokio::time::Instant::now() + recommit);
                    }
                }

                Some(interval) = interval_rx.recv() => {
                    let interval = if interval < MIN_RECOMMIT_INTERVAL {
                        warn!(
                            target: "miner",
                            provided = ?interval,
                            updated = ?MIN_RECOMMIT_INTERVAL,
                            "Sanitizing miner recommit interval"
                        );
                        MIN_RECOMMIT_INTERVAL
                    } else {
                        interval
                    };
                    info!(target: "miner", from = ?min_recommit, to = ?interval, "Miner recommit interval update");
                    min_recommit = interval;
                    recommit = interval;
                    self.observer.on_resubmit_update(min_recommit, recommit);
                }

                Some(adjust) = adjust_rx.recv() => {
                    self.observer.on_interval_adjust(&adjust);
                    let before = recommit;
                    if adjust.inc {
                        let target = recommit.as_nanos() as f64 / adjust.ratio;
                        recommit = recalc_recommit(min_recommit, recommit, target, true);
                        trace!(target: "miner", from = ?before, to = ?recommit, "Increase miner recommit interval");
                    } else {
                        recommit = recalc_recommit(
                            min_recommit,
                            recommit,
                            min_recommit.as_nanos() as f64,
                            false,
                        );
                        trace!(target: "miner", from = ?before, to = ?recommit, "Decrease miner recommit interval");
                    }
                    self.observer.on_resubmit_update(min_recommit, recommit);
                }
            }
        }
    }

    /// Bridge a shared bundle queue into this worker's task loop.
    pub(crate) async fn bundle_forwarder(self: Arc<Self>, queue: Arc<BundleTaskQueue>) {
        let Some(mut rx) = queue.take_receiver() else {
            warn!(target: "miner", "Bundle queue already has a consumer");
            return;
        };
        loop {
            tokio::select! {
                _ = self.exit.cancelled() => return,
                task = rx.recv() => {
                    let Some(task) = task else { return };
                    tokio::select! {
                        _ = self.exit.cancelled() => return,
                        result = self.task_tx.send(task) => {
                            if result.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Recalculate the resubmit interval upon feedback: move a tenth of
/// the way toward the biased target, clamped to the configured floor
/// and the global ceiling.
pub(crate) fn recalc_recommit(
    min_recommit: Duration,
    prev: Duration,
    target_ns: f64,
    inc: bool,
) -> Duration {
    let prev_ns = prev.as_nanos() as f64;
    let next_ns = if inc {
        let next = prev_ns * (1.0 - INTERVAL_ADJUST_RATIO)
            + INTERVAL_ADJUST_RATIO * (target_ns + INTERVAL_ADJUST_BIAS);
        next.min(MAX_RECOMMIT_INTERVAL.as_nanos() as f64)
    } else {
        let next = prev_ns * (1.0 - INTERVAL_ADJUST_RATIO)
            + INTERVAL_ADJUST_RATIO * (target_ns - INTERVAL_ADJUST_BIAS);
        next.max(min_recommit.as_nanos() as f64)
    };
    Duration::from_nanos(next_ns as u64)
}

/// Builder wiring a [`Worker`] to its collaborators.
pub struct WorkerBuilder {
    spec: ChainSpec,
    chain: Arc<dyn ChainReader>,
    engine: Arc<dyn Engine>,
    pool: Arc<dyn TransactionPool>,
    executor: Arc<dyn TxExecutor>,
    config: MinerConfig,
    observer: Arc<dyn TestObserver>,
    bundle_queue: Option<Arc<BundleTaskQueue>>,
    init: bool,
}

impl WorkerBuilder {
    /// Start building a worker.
    pub fn new(
        spec: ChainSpec,
        chain: Arc<dyn ChainReader>,
        engine: Arc<dyn Engine>,
        pool: Arc<dyn TransactionPool>,
        executor: Arc<dyn TxExecutor>,
        config: MinerConfig,
    ) -> Self {
        Self {
            spec,
            chain,
            engine,
            pool,
            executor,
            config,
            observer: Arc::new(NoopObserver),
            bundle_queue: None,
            init: false,
        }
    }

    /// Inject an observer.
    pub fn with_observer(mut self, observer: Arc<dyn TestObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Attach a shared bundle task queue. A bundle-mode worker
    /// publishes into it; any other worker consumes from it.
    pub fn with_bundle_queue(mut self, queue: Arc<BundleTaskQueue>) -> Self {
        self.bundle_queue = Some(queue);
        self
    }

    /// Submit a first round of work at construction to initialize the
    /// pending state.
    pub fn with_init(mut self) -> Self {
        self.init = true;
        self
    }

    /// Spawn the worker's loops and return its handle.
    pub fn build(self) -> Worker {
        metrics::register_metrics();
        let config = self.config.sanitize();

        let (new_work_tx, new_work_rx) = mpsc::channel(1);
        let (get_work_tx, get_work_rx) = mpsc::channel(1);
        let (result_tx, result_rx) = mpsc::channel(RESULT_QUEUE_SIZE);
        let (start_tx, start_rx) = mpsc::channel(1);
        let (resubmit_interval_tx, interval_rx) = mpsc::unbounded_channel();
        let (resubmit_adjust_tx, adjust_rx) = mpsc::unbounded_channel();
        let (mined_block_tx, _) = broadcast::channel(16);

        let produces_bundles = config.bundle_mode && self.bundle_queue.is_some();
        let (task_tx, task_rx) = if produces_bundles {
            // Publish into the shared queue; sealing happens in the
            // consumer worker.
            (
                self.bundle_queue
                    .as_ref()
                    .map(|q| q.sender())
                    .unwrap_or_else(|| mpsc::channel(1).0),
                None,
            )
        } else {
            let (tx, rx) = mpsc::channel(1);
            (tx, Some(rx))
        };

        let head_rx = self.chain.subscribe_chain_head();
        let txs_rx = self.pool.subscribe_new_txs();

        let inner = Arc::new(WorkerInner {
            spec: Arc::new(self.spec),
            chain: self.chain,
            engine: self.engine,
            pool: self.pool,
            executor: self.executor,
            observer: self.observer,
            config: RwLock::new(MutableConfig {
                coinbase: config.etherbase,
                extra: config.extra_data.clone(),
                gas_ceil: config.gas_ceil,
            }),
            new_payload_timeout: config.new_payload_timeout,
            commit_interrupt: config.commit_interrupt,
            bundle_mode: config.bundle_mode,
            max_merged_bundles: config.max_merged_bundles,
            new_work_tx,
            get_work_tx,
            task_tx,
            result_tx,
            start_tx,
            resubmit_interval_tx,
            resubmit_adjust_tx,
            mined_block_tx,
            exit: CancellationToken::new(),
            pending_tasks: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
            running: AtomicBool::new(false),
            new_txs: AtomicI32::new(0),
            syncing: AtomicBool::new(false),
            // Disabling commit interruption also forces the empty
            // pre-seal off.
            noempty: AtomicBool::new(!config.commit_interrupt),
            interrupted_cache: Arc::new(InterruptedTxCache::default()),
        });

        let mut handles = Vec::with_capacity(5);
        handles.push(tokio::spawn(inner.clone().main_loop(new_work_rx, get_work_rx, txs_rx)));
        handles.push(tokio::spawn(inner.clone().new_work_loop(
            start_rx,
            head_rx,
            interval_rx,
            adjust_rx,
            config.recommit,
        )));

        if let Some(task_rx) = task_rx {
            handles.push(tokio::spawn(inner.clone().task_loop(task_rx)));
            handles.push(tokio::spawn(inner.clone().result_loop(result_rx)));
            if let Some(queue) = self.bundle_queue {
                handles.push(tokio::spawn(inner.clone().bundle_forwarder(queue)));
            }
        }

        if self.init {
            let _ = inner.start_tx.try_send(());
        }

        Worker { inner, handles: Mutex::new(handles) }
    }
}

/// Handle over the sealing worker.
pub struct Worker {
    pub(crate) inner: Arc<WorkerInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Start sealing. A no-op while already running.
    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let _ = self.inner.start_tx.try_send(());
        }
    }

    /// Stop sealing. Builds keep maintaining the pending snapshot.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Whether the worker is sealing.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Mark the node as (de)synchronizing; builds are skipped while
    /// syncing.
    pub fn set_syncing(&self, syncing: bool) {
        self.inner.syncing.store(syncing, Ordering::SeqCst);
    }

    /// Terminate every loop and wait for them. The worker does not
    /// support being closed twice.
    pub async fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.exit.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Update the coinbase of future blocks.
    pub fn set_etherbase(&self, address: Address) {
        self.inner.config.write().coinbase = address;
    }

    /// Update the extra-data vanity of future blocks.
    pub fn set_extra(&self, extra: Bytes) {
        self.inner.config.write().extra = extra;
    }

    /// Update the gas ceiling of future blocks.
    pub fn set_gas_ceil(&self, gas_ceil: u64) {
        self.inner.config.write().gas_ceil = gas_ceil;
    }

    /// Update the recommit interval; clamped to one second.
    pub fn set_recommit_interval(&self, interval: Duration) {
        let _ = self.inner.resubmit_interval_tx.send(interval);
    }

    /// The pending block and a copy of its state, if a build has
    /// completed.
    pub fn pending(&self) -> Option<(Block, Box<dyn State>)> {
        self.inner
            .snapshot
            .read()
            .as_ref()
            .map(|s| (s.block.clone(), s.state.copy()))
    }

    /// The pending block.
    pub fn pending_block(&self) -> Option<Block> {
        self.inner.snapshot.read().as_ref().map(|s| s.block.clone())
    }

    /// The pending block and its receipts.
    pub fn pending_block_and_receipts(&self) -> Option<(Block, Vec<Receipt>)> {
        self.inner
            .snapshot
            .read()
            .as_ref()
            .map(|s| (s.block.clone(), s.receipts.clone()))
    }

    /// Subscribe to sealed-and-written block notifications.
    pub fn subscribe_mined_blocks(&self) -> broadcast::Receiver<Block> {
        self.inner.mined_block_tx.subscribe()
    }

    /// Build a one-shot sealing payload with the given parameters.
    pub async fn get_sealing_block(
        &self,
        parent: B256,
        timestamp: u64,
        coinbase: Address,
        random: B256,
        withdrawals: Option<Vec<Withdrawal>>,
        no_txs: bool,
    ) -> Result<(Block, U256), BuildError> {
        let (reply, reply_rx) = oneshot::channel();
        let request = GetWorkRequest {
            params: GenerateParams {
                timestamp,
                force_time: true,
                parent_hash: Some(parent),
                coinbase,
                random,
                withdrawals,
                no_txs,
            },
            reply,
        };

        tokio::select! {
            result = self.inner.get_work_tx.send(request) => {
                if result.is_err() {
                    return Err(BuildError::Closed);
                }
            }
            _ = self.inner.exit.cancelled() => return Err(BuildError::Closed),
        }
        reply_rx.await.map_err(|_| BuildError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;
    use crate::chain::{ChainSpec, MemoryState};
    use crate::primitives::Header;
    use std::time::Instant;

    #[test]
    fn test_recalc_increases_toward_target() {
        let min = Duration::from_secs(1);
        let prev = Duration::from_secs(3);
        // ratio 0.5 -> target 6s
        let target = prev.as_nanos() as f64 / 0.5;
        let next = recalc_recommit(min, prev, target, true);
        assert!(next > prev);
        assert!(next <= MAX_RECOMMIT_INTERVAL);
    }

    #[test]
    fn test_recalc_clamps_at_max() {
        let min = Duration::from_secs(1);
        let next = recalc_recommit(min, MAX_RECOMMIT_INTERVAL, f64::from(u32::MAX), true);
        assert_eq!(next, MAX_RECOMMIT_INTERVAL);
    }

    #[test]
    fn test_recalc_decreases_toward_floor() {
        let min = Duration::from_secs(1);
        let prev = Duration::from_secs(5);
        let next = recalc_recommit(min, prev, min.as_nanos() as f64, false);
        assert!(next < prev);
        assert!(next >= min);
    }

    #[test]
    fn test_recalc_clamps_at_floor() {
        let min = Duration::from_secs(1);
        let next = recalc_recommit(min, min, min.as_nanos() as f64, false);
        assert_eq!(next, min);
    }

    fn dummy_task(number: u64) -> Task {
        let header = Header { number, ..Default::default() };
        Task {
            block: Block::new(header, Vec::new(), None),
            receipts: Vec::new(),
            state: Box::new(MemoryState::new()),
            profit: U256::ZERO,
            created_at: Instant::now(),
            is_bundle: false,
        }
    }

    #[tokio::test]
    async fn test_clear_pending_purges_stale_tasks() {
        let rig = build_rig(RigOptions::default());
        let inner = &rig.worker.inner;

        inner.pending_tasks.write().insert(B256::repeat_byte(1), dummy_task(1));
        inner.pending_tasks.write().insert(B256::repeat_byte(2), dummy_task(5));

        // 1 + 7 <= 8 is stale, 5 + 7 > 8 survives.
        inner.clear_pending(8);

        let pending = inner.pending_tasks.read();
        assert!(!pending.contains_key(&B256::repeat_byte(1)));
        assert!(pending.contains_key(&B256::repeat_byte(2)));
        drop(pending);
        rig.worker.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bundle_queue_bridges_into_task_loop() {
        let queue = BundleTaskQueue::new();
        let rig = build_rig(RigOptions {
            observer: Some(CapturingObserver::skipping_all()),
            bundle_queue: Some(queue.clone()),
            ..Default::default()
        });

        queue.sender().send(dummy_task(3)).await.unwrap();
        assert!(
            wait_until(
                || rig.observer.tasks.lock().iter().any(|t| t.number == 3),
                Duration::from_secs(2),
            )
            .await,
            "queued task never reached the task loop"
        );
        rig.worker.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_is_idempotent_while_running() {
        let rig = build_rig(RigOptions {
            observer: Some(CapturingObserver::skipping_all()),
            ..Default::default()
        });

        rig.worker.start();
        assert!(rig.worker.is_running());
        // One round emits the empty pre-seal task and the full task.
        assert!(
            wait_until(|| rig.observer.tasks.lock().len() >= 2, Duration::from_secs(5)).await,
            "first start produced no round"
        );
        let after_first = rig.observer.tasks.lock().len();

        rig.worker.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rig.observer.tasks.lock().len(), after_first);
        assert!(rig.worker.is_running());
        rig.worker.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_set_recommit_interval_clamped_to_floor() {
        let rig = build_rig(RigOptions::default());

        rig.worker.set_recommit_interval(Duration::from_millis(100));
        assert!(
            wait_until(
                || rig
                    .observer
                    .resubmit_updates
                    .lock()
                    .last()
                    .is_some_and(|(min, current)| {
                        *min == MIN_RECOMMIT_INTERVAL && *current == MIN_RECOMMIT_INTERVAL
                    }),
                Duration::from_secs(2),
            )
            .await,
            "clamped interval update not observed"
        );
        rig.worker.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_new_head_interrupt_discards_build() {
        let spec = ChainSpec::default();
        let rig = build_rig(RigOptions {
            config: MinerConfig::new(ETHERBASE).with_commit_interrupt(false),
            executor: Some(DelayedExecutor::new(spec.clone(), Duration::from_millis(200))),
            observer: Some(CapturingObserver::skipping_all()),
            spec,
            ..Default::default()
        });

        for byte in 1..=3u8 {
            rig.pool.add_remote(transfer(sender(byte), 0, byte as u128));
        }

        rig.worker.start();
        // Let the first build get underway.
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Publish a competing head while the build is in flight.
        let state = rig.chain.state_at(rig.genesis.header.state_root).unwrap();
        let header = Header {
            parent_hash: rig.genesis.hash(),
            number: 1,
            gas_limit: 30_000_000,
            time: rig.genesis.header.time + 1,
            state_root: state.state_root(),
            ..Default::default()
        };
        let new_head = Block::new(header, Vec::new(), None);
        rig.chain
            .write_block_and_set_head(&new_head, &[], &[], state.as_ref(), true)
            .unwrap();

        // The next full build must be rooted at the new head.
        assert!(
            wait_until(
                || rig
                    .observer
                    .full_tasks()
                    .iter()
                    .any(|t| t.parent == new_head.hash() && t.tx_count() == 3),
                Duration::from_secs(5),
            )
            .await,
            "no rebuild on the new head"
        );

        // The interrupted round emitted nothing for the stale parent.
        let tasks = rig.observer.tasks.lock();
        assert!(tasks.iter().all(|t| t.parent == new_head.hash()));
        drop(tasks);
        assert!(rig
            .worker
            .inner
            .pending_tasks
            .read()
            .values()
            .all(|t| t.block.parent_hash() != rig.genesis.hash()));
        rig.worker.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resubmit_interrupt_seals_partial_block() {
        let spec = ChainSpec::default();
        let rig = build_rig(RigOptions {
            config: MinerConfig::new(ETHERBASE).with_commit_interrupt(false),
            executor: Some(DelayedExecutor::new(spec.clone(), Duration::from_millis(300))),
            observer: Some(CapturingObserver::skipping_all()),
            spec,
            ..Default::default()
        });
        for byte in 1..=10u8 {
            rig.pool.add_remote(transfer(sender(byte), 0, (20 - byte) as u128));
        }

        // Drive one round directly with a flag that flips to Resubmit
        // one second in, the way the recommit timer does.
        rig.worker.inner.running.store(true, Ordering::SeqCst);
        let flag = Arc::new(InterruptFlag::default());
        let timer_flag = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            timer_flag.store(InterruptSignal::Resubmit);
        });

        let mut current = None;
        rig.worker
            .inner
            .commit_work(&mut current, Some(flag), true, unix_now())
            .await;

        assert!(
            wait_until(|| rig.observer.full_tasks().len() == 1, Duration::from_secs(2)).await,
            "expected exactly one partial task"
        );
        let tasks = rig.observer.full_tasks();
        assert_eq!(tasks[0].tx_count(), 4, "expected the four transactions that fit before the interrupt");
        assert!(tasks[0].receipts_gas <= tasks[0].gas_limit);

        assert!(
            wait_until(
                || rig
                    .observer
                    .adjusts
                    .lock()
                    .iter()
                    .any(|adjust| adjust.inc && adjust.ratio >= 0.1),
                Duration::from_secs(2),
            )
            .await,
            "no positive interval adjustment observed"
        );

        if let Some(env) = current.take() {
            env.discard();
        }
        rig.worker.close().await;
    }
}
