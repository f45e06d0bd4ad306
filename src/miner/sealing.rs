//! Task and result loops: serialising sealing attempts and persisting
//! sealed blocks.

use super::environment::Task;
use super::metrics;
use super::worker::WorkerInner;
use crate::primitives::{Block, Log, Receipt};
use alloy_primitives::U256;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

impl WorkerInner {
    /// Fetch sealing tasks and push them to the consensus engine,
    /// deduplicating by seal hash and never regressing profit on the
    /// same parent. At most one sealing attempt is in flight; a new
    /// task aborts the previous one.
    pub(crate) async fn task_loop(self: Arc<Self>, mut task_rx: mpsc::Receiver<Task>) {
        let mut stop: Option<CancellationToken> = None;
        let mut prev = None;
        let mut prev_parent_hash = None;
        let mut prev_profit: Option<U256> = None;

        loop {
            tokio::select! {
                _ = self.exit.cancelled() => {
                    if let Some(stop) = stop.take() {
                        stop.cancel();
                    }
                    return;
                }

                Some(task) = task_rx.recv() => {
                    self.observer.on_new_task(&task);

                    // Reject duplicate sealing work due to resubmitting.
                    let seal_hash = self.engine.seal_hash(&task.block.header);
                    if prev == Some(seal_hash) {
                        continue;
                    }
                    // Reject new tasks which don't profit.
                    let parent_hash = task.block.parent_hash();
                    if prev_parent_hash == Some(parent_hash)
                        && prev_profit.is_some_and(|profit| task.profit < profit)
                    {
                        continue;
                    }
                    prev_parent_hash = Some(parent_hash);
                    prev_profit = Some(task.profit);

                    // Interrupt the previous sealing operation.
                    if let Some(stop) = stop.take() {
                        stop.cancel();
                    }
                    let token = CancellationToken::new();
                    stop = Some(token.clone());
                    prev = Some(seal_hash);

                    info!(
                        target: "miner",
                        number = task.block.number(),
                        sealhash = ?seal_hash,
                        parent = ?parent_hash,
                        profit = %task.profit,
                        is_bundle = task.is_bundle,
                        "Proposed sealing block"
                    );

                    if self.observer.skip_seal(&task) {
                        continue;
                    }

                    let block = task.block.clone();
                    self.pending_tasks.write().insert(seal_hash, task);

                    if let Err(err) =
                        self.engine.seal(self.chain.clone(), block, self.result_tx.clone(), token)
                    {
                        warn!(target: "miner", %err, "Block sealing failed");
                        self.pending_tasks.write().remove(&seal_hash);
                    }
                }
            }
        }
    }

    /// Receive sealed blocks, write them to the chain and announce
    /// them.
    pub(crate) async fn result_loop(self: Arc<Self>, mut result_rx: mpsc::Receiver<Block>) {
        loop {
            tokio::select! {
                _ = self.exit.cancelled() => return,
                Some(block) = result_rx.recv() => {
                    self.handle_sealed_block(block);
                }
            }
        }
    }

    fn handle_sealed_block(&self, block: Block) {
        let hash = block.hash();

        // Short circuit duplicate results caused by resubmitting.
        if self.chain.has_block(hash, block.number()) {
            return;
        }
        // A block at the same height by the same author is the same
        // work sealed twice.
        if let Some(old) = self.chain.get_block_by_number(block.number()) {
            let old_author = self.engine.author(&old.header).ok();
            let new_author = self.engine.author(&block.header).ok();
            if old_author.is_some() && old_author == new_author {
                info!(target: "miner", height = block.number(), "Dropping duplicate block by same author");
                return;
            }
        }

        let seal_hash = self.engine.seal_hash(&block.header);
        let pending = self.pending_tasks.read();
        let Some(task) = pending.get(&seal_hash) else {
            drop(pending);
            error!(
                target: "miner",
                number = block.number(),
                sealhash = ?seal_hash,
                hash = ?hash,
                "Block found but no relative pending task"
            );
            return;
        };

        // Different blocks can share a seal hash; deep-copy receipts
        // and stamp their block location before persisting.
        let mut receipts: Vec<Receipt> = Vec::with_capacity(task.receipts.len());
        let mut logs: Vec<Log> = Vec::new();
        for (index, receipt) in task.receipts.iter().enumerate() {
            let patched = receipt.with_block_location(hash, block.number(), index as u64);
            logs.extend(patched.logs.iter().cloned());
            receipts.push(patched);
        }

        if let Err(err) = self.chain.write_block_and_set_head(
            &block,
            &receipts,
            &logs,
            task.state.as_ref(),
            true,
        ) {
            error!(target: "miner", %err, "Failed writing block to chain");
            return;
        }

        info!(
            target: "miner",
            number = block.number(),
            sealhash = ?seal_hash,
            hash = ?hash,
            elapsed = ?task.created_at.elapsed(),
            "Successfully sealed new block"
        );
        drop(pending);

        // Announce the mined block and account for it.
        let _ = self.mined_block_tx.send(block.clone());
        metrics::SEALED_BLOCKS.inc();
        if block.is_empty() {
            metrics::SEALED_EMPTY_BLOCKS.inc();
        }
    }
}
