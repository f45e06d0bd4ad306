//! Bundle simulation and merging.
//!
//! Candidate bundles are simulated on a throwaway copy of the build
//! state, ranked by MEV gas price and merged greedily: a bundle stays
//! in the block only if it still earns at least 99/100 of its
//! top-of-block price when re-simulated after the bundles ranked above
//! it. A block is produced only when exactly the configured number of
//! bundles merged.

use super::environment::Environment;
use super::error::BuildError;
use super::worker::WorkerInner;
use crate::chain::{ExecContext, ExecutionError, State};
use crate::primitives::{GasPool, MevBundle, Transaction};
use alloy_primitives::U256;
use std::sync::Arc;
use tracing::{debug, info};

/// A bundle together with its simulation outcome. Ordered descending
/// by `mev_gas_price` when ranked.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimulatedBundle {
    /// Profit per gas: (coinbase transfers + fees of txs not already
    /// pending) / gas used.
    pub(crate) mev_gas_price: U256,
    /// Total value extracted, in wei.
    pub(crate) total_eth: U256,
    /// Direct coinbase transfers, in wei.
    pub(crate) eth_sent_to_coinbase: U256,
    /// Gas consumed by the whole bundle.
    pub(crate) total_gas_used: u64,
    /// The unsimulated source bundle.
    pub(crate) original_bundle: MevBundle,
}

impl WorkerInner {
    /// Simulate, rank and merge the candidate bundles. Returns the
    /// concatenated transactions of the merged bundles with aggregate
    /// statistics, or an empty list when no full merge was achievable.
    pub(crate) fn generate_bundle(
        &self,
        env: &mut Environment,
        bundles: Vec<MevBundle>,
        ctx: &ExecContext,
    ) -> Result<(Vec<Arc<Transaction>>, SimulatedBundle, usize), BuildError> {
        let mut simulated = self.simulate_bundles(env, bundles, ctx);
        simulated.sort_by(|a, b| b.mev_gas_price.cmp(&a.mev_gas_price));
        Ok(self.merge_bundles(env, simulated, ctx))
    }

    /// Simulate each candidate on its own state copy, dropping the
    /// ones that fail.
    fn simulate_bundles(
        &self,
        env: &Environment,
        bundles: Vec<MevBundle>,
        ctx: &ExecContext,
    ) -> Vec<SimulatedBundle> {
        let mut simulated = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            if bundle.txs.is_empty() {
                continue;
            }
            let mut state = env.state.copy();
            let mut gas_pool = GasPool::new(env.header.gas_limit);
            match self.compute_bundle_gas(env, &bundle, state.as_mut(), &mut gas_pool, 0, ctx) {
                Ok(simmed) => simulated.push(simmed),
                Err(err) => {
                    debug!(target: "miner", %err, "Error computing gas for a bundle");
                }
            }
        }
        simulated
    }

    /// Greedily merge ranked bundles on speculative state copies,
    /// rolling back any bundle whose re-simulated price falls under
    /// the 99/100 floor of its top-of-block simulation.
    fn merge_bundles(
        &self,
        env: &Environment,
        bundles: Vec<SimulatedBundle>,
        ctx: &ExecContext,
    ) -> (Vec<Arc<Transaction>>, SimulatedBundle, usize) {
        let mut final_txs: Vec<Arc<Transaction>> = Vec::new();
        let mut current_state = env.state.copy();
        let mut gas_pool = GasPool::new(env.header.gas_limit);
        let mut merged = SimulatedBundle::default();
        let mut count = 0usize;

        for bundle in bundles {
            let prev_state = current_state.copy();
            let prev_gas_pool = gas_pool;

            // The floor price is 99/100 of what was simulated at the
            // top of the block.
            let floor = bundle.mev_gas_price * U256::from(99u64) / U256::from(100u64);

            let simmed = self.compute_bundle_gas(
                env,
                &bundle.original_bundle,
                current_state.as_mut(),
                &mut gas_pool,
                final_txs.len(),
                ctx,
            );
            match simmed {
                Ok(simmed) if simmed.mev_gas_price > floor => {
                    info!(
                        target: "miner",
                        eth_to_coinbase = %simmed.eth_sent_to_coinbase,
                        gas_used = simmed.total_gas_used,
                        score = %simmed.mev_gas_price,
                        txs = bundle.original_bundle.txs.len(),
                        "Included bundle"
                    );
                    final_txs.extend(bundle.original_bundle.txs.iter().cloned());
                    merged.total_eth += simmed.total_eth;
                    merged.eth_sent_to_coinbase += simmed.eth_sent_to_coinbase;
                    merged.total_gas_used += simmed.total_gas_used;
                    count += 1;
                    if count >= self.max_merged_bundles as usize {
                        break;
                    }
                }
                _ => {
                    current_state = prev_state;
                    gas_pool = prev_gas_pool;
                }
            }
        }

        // Fire only when a full merge is achievable; otherwise an
        // ordinary worker produces the block.
        if final_txs.is_empty() || count != self.max_merged_bundles as usize {
            return (Vec::new(), SimulatedBundle::default(), count);
        }

        merged.mev_gas_price = if merged.total_gas_used > 0 {
            merged.total_eth / U256::from(merged.total_gas_used)
        } else {
            U256::ZERO
        };
        (final_txs, merged, count)
    }

    /// Price a whole bundle: execute it in order, summing the direct
    /// coinbase transfers and the fees of transactions not already in
    /// the pending pool, divided by the total gas used. Transactions
    /// may only revert when whitelisted.
    fn compute_bundle_gas(
        &self,
        env: &Environment,
        bundle: &MevBundle,
        state: &mut dyn State,
        gas_pool: &mut GasPool,
        current_tx_count: usize,
        ctx: &ExecContext,
    ) -> Result<SimulatedBundle, ExecutionError> {
        let mut total_gas_used = 0u64;
        let mut scratch_cumulative = 0u64;
        let mut gas_fees = U256::ZERO;
        let mut eth_sent_to_coinbase = U256::ZERO;

        for (i, tx) in bundle.txs.iter().enumerate() {
            if env.header.base_fee.is_some() {
                tx.check_fee_caps().map_err(|err| ExecutionError::Other(err.to_string()))?;
            }

            state.set_tx_context(tx.hash(), i + current_tx_count);
            let coinbase_before = state.balance(env.coinbase);

            let receipt = self.executor.apply_transaction(
                &env.header,
                env.coinbase,
                state,
                gas_pool,
                tx,
                &mut scratch_cumulative,
                ctx,
            )?;
            if !receipt.success && !bundle.may_revert(receipt.tx_hash) {
                return Err(ExecutionError::Other("failed tx".to_string()));
            }
            total_gas_used += receipt.gas_used;

            let from = tx
                .recover_sender()
                .map_err(|err| ExecutionError::Other(err.to_string()))?;
            let tx_in_pending_pool = tx.nonce < self.pool.nonce(from);

            let tip = tx
                .effective_gas_tip(env.header.base_fee)
                .map_err(|_| ExecutionError::FeeCapTooLow)?;
            let tx_fees = U256::from(receipt.gas_used) * U256::from(tip);
            let coinbase_after = state.balance(env.coinbase);
            let coinbase_delta =
                coinbase_after.saturating_sub(coinbase_before).saturating_sub(tx_fees);
            eth_sent_to_coinbase += coinbase_delta;

            // Fees of transactions already pending would be earned
            // anyway; only count the rest.
            if !tx_in_pending_pool {
                gas_fees += tx_fees;
            }
        }

        let total_eth = eth_sent_to_coinbase + gas_fees;
        Ok(SimulatedBundle {
            mev_gas_price: if total_gas_used > 0 {
                total_eth / U256::from(total_gas_used)
            } else {
                U256::ZERO
            },
            total_eth,
            eth_sent_to_coinbase,
            total_gas_used,
            original_bundle: bundle.clone(),
        })
    }
}
