//! The block assembly pipeline: header preparation, transaction
//! filling and the interruptible commit loop, plus the main dispatch
//! loop that drives them.

use super::deps::{encode_dependencies, reads_balance_of, DepCollector, TxDep};
use super::environment::{Environment, PendingSnapshot, Task};
use super::error::BuildError;
use super::interrupt::{InterruptFlag, InterruptSignal};
use super::metrics;
use super::worker::{unix_now, GetWorkRequest, IntervalAdjust, NewWorkRequest, WorkerInner};
use crate::chain::{ExecContext, ExecutionError};
use crate::consensus::EngineError;
use crate::pool::{LazyTransaction, NewTxsEvent, TransactionsByPriceAndNonce};
use crate::primitives::{Block, Header, Receipt, Transaction, Withdrawal, TX_GAS};
use alloy_primitives::{Address, B256, U256};
use std::{
    collections::HashMap,
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Parameters of one sealing round.
#[derive(Debug, Clone, Default)]
pub(crate) struct GenerateParams {
    /// Target timestamp.
    pub(crate) timestamp: u64,
    /// Fail instead of clamping when the timestamp is not after the
    /// parent.
    pub(crate) force_time: bool,
    /// Explicit parent; the current head when absent.
    pub(crate) parent_hash: Option<B256>,
    /// Fee recipient.
    pub(crate) coinbase: Address,
    /// Randomness for the mix field.
    pub(crate) random: B256,
    /// Withdrawals to include.
    pub(crate) withdrawals: Option<Vec<Withdrawal>>,
    /// Produce an empty block regardless of the mempool.
    pub(crate) no_txs: bool,
}

/// Total miner fees of an assembled block, in wei.
pub(crate) fn total_fees(block: &Block, receipts: &[Receipt]) -> U256 {
    let mut fees = U256::ZERO;
    for (tx, receipt) in block.transactions().iter().zip(receipts) {
        if let Ok(tip) = tx.effective_gas_tip(block.header.base_fee) {
            fees += U256::from(receipt.gas_used) * U256::from(tip);
        }
    }
    fees
}

impl WorkerInner {
    /// Dispatcher: receives new-work requests, one-shot payload
    /// requests and mempool events. The build pipeline runs inline
    /// here, so the current environment needs no lock.
    pub(crate) async fn main_loop(
        self: Arc<Self>,
        mut new_work_rx: mpsc::Receiver<NewWorkRequest>,
        mut get_work_rx: mpsc::Receiver<GetWorkRequest>,
        mut txs_rx: mpsc::Receiver<NewTxsEvent>,
    ) {
        let mut current: Option<Environment> = None;

        loop {
            tokio::select! {
                _ = self.exit.cancelled() => {
                    if let Some(env) = current.take() {
                        env.discard();
                    }
                    return;
                }

                Some(request) = new_work_rx.recv() => {
                    if self.spec.gate_on_peers && self.chain.peer_count() == 0 {
                        continue;
                    }
                    self.commit_work(
                        &mut current,
                        Some(request.interrupt),
                        request.noempty,
                        request.timestamp,
                    )
                    .await;
                }

                Some(request) = get_work_rx.recv() => {
                    let result = self.generate_work(request.params);
                    let _ = request.reply.send(result);
                }

                Some(event) = txs_rx.recv() => {
                    self.handle_new_txs(&mut current, event).await;
                }
            }
        }
    }

    /// Fold arriving transactions into the pending block while not
    /// sealing; while sealing only count them for the resubmit timer.
    async fn handle_new_txs(&self, current: &mut Option<Environment>, event: NewTxsEvent) {
        if !self.is_running() && current.is_some() {
            if let Some(env) = current.as_mut() {
                // Skip if the pending block is already full.
                if env.gas_pool.gas() >= TX_GAS {
                    let mut pending: HashMap<Address, Vec<LazyTransaction>> = HashMap::new();
                    for (i, tx) in event.txs.iter().enumerate() {
                        let Ok(sender) = env.signer.sender(tx) else { continue };
                        pending
                            .entry(sender)
                            .or_default()
                            .push(LazyTransaction::new(tx.clone(), i as u64));
                    }
                    for list in pending.values_mut() {
                        list.sort_by_key(|l| l.resolve().map(|tx| tx.nonce).unwrap_or(u64::MAX));
                    }

                    let mut txs = TransactionsByPriceAndNonce::new(pending, env.header.base_fee);
                    let tcount = env.tcount;
                    let _ =
                        self.commit_transactions(env, &mut txs, None, &ExecContext::default());
                    // Only publish if anything was actually added.
                    if tcount != env.tcount {
                        self.update_snapshot(env);
                    }
                }
            }
        } else if self.spec.dev_period == Some(0) {
            // 0-period dev mode seals instantaneously, so empty
            // submissions are rejected; arrival is the build trigger.
            self.commit_work(current, None, true, unix_now()).await;
        }
        self.new_txs.fetch_add(event.txs.len() as i32, Ordering::SeqCst);
    }

    /// Construct the sealing header and a fresh environment on the
    /// parent state, pending transactions not yet filled.
    pub(crate) fn prepare_work(&self, params: &GenerateParams) -> Result<Environment, BuildError> {
        let (extra, gas_ceil) = {
            let config = self.config.read();
            (config.extra.clone(), config.gas_ceil)
        };

        let parent = match params.parent_hash {
            Some(hash) => self
                .chain
                .get_block_by_hash(hash)
                .map(|block| block.header)
                .ok_or(BuildError::MissingParent(hash))?,
            None => self.chain.current_header(),
        };

        // Recap the timestamp to parent + 1 when mutation is allowed.
        let mut timestamp = params.timestamp;
        if parent.time >= timestamp {
            if params.force_time {
                return Err(BuildError::InvalidTimestamp {
                    parent: parent.time,
                    given: timestamp,
                });
            }
            timestamp = parent.time + 1;
        }

        let mut header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            gas_limit: self.spec.calc_gas_limit(parent.gas_limit, gas_ceil),
            time: timestamp,
            coinbase: params.coinbase,
            ..Default::default()
        };
        if !extra.is_empty() {
            header.extra = extra;
        }
        if params.random != B256::ZERO {
            header.mix_hash = params.random;
        }
        if self.spec.is_london(header.number) {
            header.base_fee = Some(self.spec.calc_base_fee(&parent));
            if !self.spec.is_london(parent.number) {
                let parent_gas_limit = parent.gas_limit * self.spec.elasticity_multiplier;
                header.gas_limit = self.spec.calc_gas_limit(parent_gas_limit, gas_ceil);
            }
        }

        if let Err(err) = self.engine.prepare(self.chain.as_ref(), &mut header) {
            match &err {
                EngineError::UnauthorizedSigner(_) => {
                    debug!(target: "miner", %err, "Failed to prepare header for sealing");
                }
                _ => {
                    error!(target: "miner", %err, "Failed to prepare header for sealing");
                }
            }
            return Err(err.into());
        }

        let mut state = self.chain.state_at(parent.state_root).map_err(|err| {
            error!(target: "miner", %err, "Failed to create sealing context");
            BuildError::from(err)
        })?;
        state.start_prefetcher("miner");

        // The passed coinbase may differ from header.coinbase after
        // engine preparation.
        let signer = self.spec.make_signer(header.number, header.time);
        Ok(Environment::new(signer, state, params.coinbase, header))
    }

    /// One full build round: prepare, optionally pre-seal empty, fill,
    /// recover per interruption kind, emit the task and rotate the
    /// current environment.
    pub(crate) async fn commit_work(
        &self,
        current: &mut Option<Environment>,
        interrupt: Option<Arc<InterruptFlag>>,
        noempty: bool,
        timestamp: u64,
    ) {
        // Abort committing while the node is still syncing.
        if self.syncing.load(Ordering::SeqCst) {
            return;
        }
        let start = Instant::now();

        let mut coinbase = Address::ZERO;
        if self.is_running() {
            coinbase = self.etherbase();
            if coinbase == Address::ZERO {
                error!(target: "miner", "Refusing to mine without etherbase");
                return;
            }
        }

        let params = GenerateParams { timestamp, coinbase, ..Default::default() };
        let mut work = match self.prepare_work(&params) {
            Ok(work) => work,
            Err(_) => return,
        };

        let mut ctx = ExecContext::default();
        if !noempty && self.commit_interrupt {
            let delay = Duration::from_secs(work.header.time.saturating_sub(unix_now()));
            ctx.deadline = Some(Instant::now() + delay);
            ctx.interrupted_cache = Some(self.interrupted_cache.clone());
        }

        // Pre-seal an empty block on a copied environment so a valid
        // block exists even if the full build is interrupted.
        if !noempty && !self.noempty.load(Ordering::SeqCst) {
            let _ = self.commit(work.copy(), false, false, start).await;
        }

        match self.fill_transactions(interrupt.as_ref(), &mut work, &ctx) {
            Ok(()) => {
                // The whole round had slack; shrink the resubmit
                // interval toward the user floor.
                let _ = self.resubmit_adjust_tx.send(IntervalAdjust { ratio: 0.0, inc: false });
            }
            Err(BuildError::InterruptedByRecommit) => {
                let gas_limit = work.header.gas_limit;
                let ratio =
                    ((gas_limit - work.gas_pool.gas()) as f64 / gas_limit as f64).max(0.1);
                let _ = self.resubmit_adjust_tx.send(IntervalAdjust { ratio, inc: true });
            }
            Err(BuildError::InterruptedByNewHead) => {
                // Discard entirely; sealing on the stale parent would
                // only produce an uncle.
                work.discard();
                return;
            }
            // Timeout seals the partial block without adjusting the
            // interval; other failures fall through the same way.
            Err(_) => {}
        }

        let _ = self.commit(work.copy(), true, true, start).await;

        // Swap in the new environment, terminating the previous
        // prefetcher.
        if let Some(old) = current.replace(work) {
            old.discard();
        }
    }

    /// Assemble the final block from a copy of the environment and
    /// hand it to the task loop; optionally publish the snapshot.
    pub(crate) async fn commit(
        &self,
        env: Environment,
        full: bool,
        update: bool,
        start: Instant,
    ) -> Result<(), BuildError> {
        if self.is_running() {
            if full {
                self.observer.on_full_task();
            }

            // A second copy keeps the task isolated from the snapshot.
            let task_env = env.copy();
            let Environment { mut state, txs, receipts, header, profit, tcount, .. } = task_env;

            let block = self.engine.finalize_and_assemble(
                self.chain.as_ref(),
                header,
                state.as_mut(),
                txs,
                &receipts,
                None,
            )?;

            let number = block.number();
            let seal_hash = self.engine.seal_hash(&block.header);
            let gas_used = block.header.gas_used;
            let fees = total_fees(&block, &receipts);
            let task = Task {
                block,
                receipts,
                state,
                profit,
                created_at: Instant::now(),
                is_bundle: self.bundle_mode,
            };

            tokio::select! {
                result = self.task_tx.send(task) => {
                    if result.is_ok() {
                        info!(
                            target: "miner",
                            number,
                            sealhash = ?seal_hash,
                            txs = tcount,
                            gas = gas_used,
                            fees = %fees,
                            profit = %profit,
                            elapsed = ?start.elapsed(),
                            "Commit new sealing work"
                        );
                    }
                }
                _ = self.exit.cancelled() => {
                    info!(target: "miner", "Worker has exited");
                }
            }
        }

        if update {
            self.update_snapshot(&env);
        }
        Ok(())
    }

    /// Publish the pending-block snapshot.
    pub(crate) fn update_snapshot(&self, env: &Environment) {
        let mut snapshot = self.snapshot.write();
        *snapshot = Some(PendingSnapshot {
            block: Block::new(env.header.clone(), env.txs.clone(), None),
            receipts: env.receipts.clone(),
            state: env.state.copy(),
        });
    }

    /// Generate a one-shot sealing block with explicit parameters.
    pub(crate) fn generate_work(
        &self,
        params: GenerateParams,
    ) -> Result<(Block, U256), BuildError> {
        let mut work = self.prepare_work(&params)?;

        if !params.no_txs {
            let ctx = ExecContext {
                deadline: Some(Instant::now() + self.new_payload_timeout),
                interrupted_cache: None,
            };
            match self.fill_transactions(None, &mut work, &ctx) {
                Ok(()) => {}
                Err(BuildError::InterruptedByTimeout) => {
                    warn!(
                        target: "miner",
                        allowance = ?self.new_payload_timeout,
                        "Block building is interrupted"
                    );
                }
                Err(err) => {
                    work.discard();
                    return Err(err);
                }
            }
        }

        let assembled = self.engine.finalize_and_assemble(
            self.chain.as_ref(),
            work.header.clone(),
            work.state.as_mut(),
            work.txs.clone(),
            &work.receipts,
            params.withdrawals,
        );
        match assembled {
            Ok(block) => {
                let fees = total_fees(&block, &work.receipts);
                work.discard();
                Ok((block, fees))
            }
            Err(err) => {
                work.discard();
                Err(err.into())
            }
        }
    }

    /// Pull pending transactions from the pool and fill the block:
    /// merged bundles first in bundle mode, then locals, then remotes.
    pub(crate) fn fill_transactions(
        &self,
        interrupt: Option<&Arc<InterruptFlag>>,
        env: &mut Environment,
        ctx: &ExecContext,
    ) -> Result<(), BuildError> {
        let mut remote_txs = self.pool.pending(true);
        let mut local_txs = HashMap::new();
        for account in self.pool.locals() {
            if let Some(txs) = remote_txs.remove(&account) {
                local_txs.insert(account, txs);
            }
        }

        if self.bundle_mode {
            let bundles = self.pool.mev_bundles(env.header.number, env.header.time);
            let (bundle_txs, bundle, bundle_count) = self.generate_bundle(env, bundles, ctx)?;
            info!(
                target: "miner",
                eth_to_coinbase = %bundle.eth_sent_to_coinbase,
                gas_used = bundle.total_gas_used,
                score = %bundle.mev_gas_price,
                txs = bundle_txs.len(),
                bundles = bundle_count,
                "Merged bundle"
            );
            if bundle_txs.is_empty() {
                return Ok(());
            }
            self.commit_bundle(env, &bundle_txs, interrupt, ctx)?;
            env.profit += bundle.eth_sent_to_coinbase;
        }

        if !local_txs.is_empty() {
            let mut txs = TransactionsByPriceAndNonce::new(local_txs, env.header.base_fee);
            self.commit_transactions(env, &mut txs, interrupt, ctx)?;
        }
        if !remote_txs.is_empty() {
            let mut txs = TransactionsByPriceAndNonce::new(remote_txs, env.header.base_fee);
            self.commit_transactions(env, &mut txs, interrupt, ctx)?;
        }
        Ok(())
    }

    /// Execute one transaction against the environment, reverting the
    /// state and gas pool on failure.
    fn commit_transaction(
        &self,
        env: &mut Environment,
        tx: &Arc<Transaction>,
        ctx: &ExecContext,
    ) -> Result<(), ExecutionError> {
        let snap = env.state.snapshot();
        let gas_before = env.gas_pool.gas();
        let tip = tx
            .effective_gas_tip(env.header.base_fee)
            .map_err(|_| ExecutionError::FeeCapTooLow)?;

        let mut cumulative = env.header.gas_used;
        let result = self.executor.apply_transaction(
            &env.header,
            env.coinbase,
            env.state.as_mut(),
            &mut env.gas_pool,
            tx,
            &mut cumulative,
            ctx,
        );

        match result {
            Ok(receipt) => {
                env.txs.push(tx.clone());
                env.profit += U256::from(receipt.gas_used) * U256::from(tip);
                env.receipts.push(receipt);
                env.header.gas_used = cumulative;
                Ok(())
            }
            Err(err) => {
                env.state.revert_to_snapshot(snap);
                env.gas_pool.set_gas(gas_before);
                Err(err)
            }
        }
    }

    /// The interruptible commit loop over a price-and-nonce iterator.
    pub(crate) fn commit_transactions(
        &self,
        env: &mut Environment,
        txs: &mut TransactionsByPriceAndNonce,
        interrupt: Option<&Arc<InterruptFlag>>,
        ctx: &ExecContext,
    ) -> Result<(), BuildError> {
        let capture_deps = self.spec.is_parallel(env.header.number) && self.is_running();
        let collector = if capture_deps { Some(DepCollector::spawn()) } else { None };

        loop {
            // The two cooperative cancellation points of a build:
            // the request's interrupt flag and the round deadline.
            if let Some(flag) = interrupt {
                if let Some(err) = flag.load().to_build_error() {
                    return Err(err);
                }
            }
            if ctx.expired() {
                metrics::TX_COMMIT_INTERRUPT.inc();
                warn!(target: "miner", "Transaction commit deadline reached");
                return Err(BuildError::InterruptedByTimeout);
            }

            if env.gas_pool.gas() < TX_GAS {
                trace!(
                    target: "miner",
                    have = env.gas_pool.gas(),
                    want = TX_GAS,
                    "Not enough gas for further transactions"
                );
                break;
            }
            let Some(lazy) = txs.peek().cloned() else { break };
            let Some(tx) = lazy.resolve() else {
                warn!(target: "miner", hash = ?lazy.hash, "Ignoring evicted transaction");
                txs.pop();
                continue;
            };
            let from = match env.signer.sender(&tx) {
                Ok(from) => from,
                Err(err) => {
                    trace!(target: "miner", hash = ?tx.hash(), %err, "Skipping unsignable transaction");
                    txs.pop();
                    continue;
                }
            };

            // Conditional bounds are checked before execution; a
            // violated transaction is dropped outright.
            if let Some(options) = &tx.options {
                if let Err(reason) = env
                    .header
                    .validate_block_number_bounds(options.block_number_min, options.block_number_max)
                {
                    trace!(target: "miner", ?from, hash = ?tx.hash(), %reason, "Dropping conditional transaction");
                    txs.pop();
                    continue;
                }
                if let Err(reason) = env
                    .header
                    .validate_timestamp_bounds(options.timestamp_min, options.timestamp_max)
                {
                    trace!(target: "miner", ?from, hash = ?tx.hash(), %reason, "Dropping conditional transaction");
                    txs.pop();
                    continue;
                }
                if let Err(reason) = env.state.validate_known_accounts(&options.known_accounts) {
                    trace!(target: "miner", ?from, hash = ?tx.hash(), %reason, "Dropping conditional transaction");
                    txs.pop();
                    continue;
                }
            }

            // Ignore replay-protected transactions until the fork.
            if tx.protected() && !self.spec.is_eip155(env.header.number) {
                trace!(target: "miner", hash = ?tx.hash(), "Ignoring replay protected transaction");
                txs.pop();
                continue;
            }

            env.state.set_tx_context(tx.hash(), env.tcount);
            if capture_deps {
                env.state.begin_recording();
            }

            match self.commit_transaction(env, &tx, ctx) {
                Ok(()) => {
                    env.tcount += 1;
                    if capture_deps {
                        let reads = env.state.recorded_reads();
                        let writes = env.state.recorded_writes();
                        if let Some(collector) = &collector {
                            collector.record(TxDep {
                                index: env.tcount - 1,
                                reads: reads.clone(),
                                writes: writes.clone(),
                            });
                        }
                        env.read_sets.push(reads);
                        env.write_lists.push(writes);
                        env.state.clear_recorded();
                    }
                    txs.shift();
                }
                Err(ExecutionError::NonceTooLow { .. }) => {
                    // Data race between the pool and the miner; the
                    // sender's next nonce may still fit.
                    trace!(target: "miner", sender = ?from, nonce = tx.nonce, "Skipping transaction with low nonce");
                    txs.shift();
                }
                Err(ExecutionError::Interrupted) => {
                    metrics::TX_COMMIT_INTERRUPT.inc();
                    if let Some(cache) = &ctx.interrupted_cache {
                        cache.insert(tx.hash());
                    }
                    debug!(target: "miner", hash = ?tx.hash(), "Transaction interrupted mid-execution, account skipped");
                    txs.pop();
                }
                Err(ExecutionError::GasLimitReached) => {
                    trace!(target: "miner", sender = ?from, "Gas limit exceeded for current block");
                    txs.pop();
                }
                Err(err) => {
                    // Including nonce-too-high: executing later
                    // nonces of this sender would be in vain.
                    debug!(target: "miner", hash = ?tx.hash(), %err, "Transaction failed, account skipped");
                    txs.pop();
                }
            }
        }

        if let Some(collector) = collector {
            let deps = collector.finish();
            // Reads of the coinbase or burn-contract balance
            // serialize everything; publish no dependency data then.
            let mut serializing = vec![env.coinbase];
            if let Some(burn) = self.spec.burn_contract_at(env.header.number) {
                serializing.push(burn);
            }
            let clear = reads_balance_of(&env.read_sets, &serializing);
            encode_dependencies(&mut env.header, &deps, env.tcount, clear)?;
        }

        Ok(())
    }

    /// Execute a pre-chosen bundle as a unit: any transaction failure
    /// invalidates the whole bundle.
    pub(crate) fn commit_bundle(
        &self,
        env: &mut Environment,
        txs: &[Arc<Transaction>],
        interrupt: Option<&Arc<InterruptFlag>>,
        ctx: &ExecContext,
    ) -> Result<(), BuildError> {
        for tx in txs {
            if ctx.expired() {
                metrics::TX_COMMIT_INTERRUPT.inc();
                warn!(target: "miner", "Bundle commit deadline reached");
                return Err(BuildError::InterruptedByTimeout);
            }
            if let Some(flag) = interrupt {
                let signal = flag.load();
                if signal != InterruptSignal::None {
                    if signal == InterruptSignal::Resubmit {
                        let gas_limit = env.header.gas_limit;
                        let ratio = ((gas_limit - env.gas_pool.gas()) as f64 / gas_limit as f64)
                            .max(0.1);
                        let _ =
                            self.resubmit_adjust_tx.send(IntervalAdjust { ratio, inc: true });
                    }
                    return Err(BuildError::BundleInterrupted);
                }
            }
            if env.gas_pool.gas() < TX_GAS {
                trace!(
                    target: "miner",
                    have = env.gas_pool.gas(),
                    want = TX_GAS,
                    "Not enough gas for further bundle transactions"
                );
                break;
            }
            if tx.protected() && !self.spec.is_eip155(env.header.number) {
                trace!(target: "miner", hash = ?tx.hash(), "Replay protected transaction in bundle");
                return Err(BuildError::CouldNotApplyBundleTx(tx.hash()));
            }

            env.state.set_tx_context(tx.hash(), env.tcount);
            match self.commit_transaction(env, tx, ctx) {
                Ok(()) => {
                    env.tcount += 1;
                }
                Err(err) => {
                    debug!(target: "miner", hash = ?tx.hash(), %err, "Bundle transaction failed");
                    return Err(BuildError::CouldNotApplyBundleTx(tx.hash()));
                }
            }
        }

        // The bundle filled with slack; let the resubmit interval
        // shrink.
        if interrupt.is_some() {
            let _ = self.resubmit_adjust_tx.send(IntervalAdjust { ratio: 0.0, inc: false });
        }
        Ok(())
    }
}
