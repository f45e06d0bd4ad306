//! Chain configuration: fork schedule, fee-market parameters and
//! per-block gas-limit movement.

use crate::primitives::{Header, PlaceholderSigner, Signer};
use alloy_primitives::Address;
use std::sync::Arc;

/// Base fee of the first fee-market block, in wei (1 gwei).
pub const INITIAL_BASE_FEE: u128 = 1_000_000_000;

/// Lowest gas limit a block may carry.
pub const MIN_GAS_LIMIT: u64 = 5_000;

/// Bound divisor limiting per-block gas-limit movement.
const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Bound divisor limiting per-block base-fee movement.
const BASE_FEE_CHANGE_DENOMINATOR: u128 = 8;

/// Chain-wide configuration consumed by the worker.
#[derive(Debug, Clone)]
pub struct ChainSpec {
    /// Chain identifier.
    pub chain_id: u64,
    /// Height activating EIP-155 replay protection; `None` disables.
    pub eip155_block: Option<u64>,
    /// Height activating the EIP-1559 fee market; `None` disables.
    pub london_block: Option<u64>,
    /// Height activating parallel-execution dependency capture;
    /// `None` disables.
    pub parallel_block: Option<u64>,
    /// Contract receiving the burned base fee, when the fee market is
    /// active.
    pub burn_contract: Option<Address>,
    /// Dev-mode block period in seconds; `Some(0)` means blocks are
    /// produced on transaction arrival only.
    pub dev_period: Option<u64>,
    /// Skip building while no peers are connected.
    pub gate_on_peers: bool,
    /// Multiplier between the gas target and the gas limit.
    pub elasticity_multiplier: u64,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            chain_id: 1,
            eip155_block: Some(0),
            london_block: None,
            parallel_block: None,
            burn_contract: None,
            dev_period: None,
            gate_on_peers: false,
            elasticity_multiplier: 2,
        }
    }
}

impl ChainSpec {
    /// Whether EIP-155 replay protection is active at `number`.
    pub fn is_eip155(&self, number: u64) -> bool {
        self.eip155_block.is_some_and(|b| number >= b)
    }

    /// Whether the EIP-1559 fee market is active at `number`.
    pub fn is_london(&self, number: u64) -> bool {
        self.london_block.is_some_and(|b| number >= b)
    }

    /// Whether dependency capture is active at `number`.
    pub fn is_parallel(&self, number: u64) -> bool {
        self.parallel_block.is_some_and(|b| number >= b)
    }

    /// The burn contract in effect at `number`, if any.
    pub fn burn_contract_at(&self, _number: u64) -> Option<Address> {
        self.burn_contract
    }

    /// Signer used to derive transaction senders.
    pub fn make_signer(&self, _number: u64, _time: u64) -> Arc<dyn Signer> {
        Arc::new(PlaceholderSigner)
    }

    /// Compute the child gas limit: move from the parent limit toward
    /// `desired`, bounded by the parent limit divided by 1024.
    pub fn calc_gas_limit(&self, parent_gas_limit: u64, desired: u64) -> u64 {
        let delta = (parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR).saturating_sub(1);
        let desired = desired.max(MIN_GAS_LIMIT);
        if parent_gas_limit < desired {
            (parent_gas_limit + delta).min(desired)
        } else {
            (parent_gas_limit - delta).max(desired)
        }
    }

    /// Compute the child base fee from the parent header.
    pub fn calc_base_fee(&self, parent: &Header) -> u128 {
        let Some(parent_base_fee) = parent.base_fee else {
            // First fee-market block.
            return INITIAL_BASE_FEE;
        };

        let parent_target = (parent.gas_limit / self.elasticity_multiplier) as u128;
        if parent_target == 0 {
            return parent_base_fee;
        }
        let gas_used = parent.gas_used as u128;

        match gas_used.cmp(&parent_target) {
            std::cmp::Ordering::Equal => parent_base_fee,
            std::cmp::Ordering::Greater => {
                let delta = parent_base_fee * (gas_used - parent_target)
                    / parent_target
                    / BASE_FEE_CHANGE_DENOMINATOR;
                parent_base_fee + delta.max(1)
            }
            std::cmp::Ordering::Less => {
                let delta = parent_base_fee * (parent_target - gas_used)
                    / parent_target
                    / BASE_FEE_CHANGE_DENOMINATOR;
                parent_base_fee.saturating_sub(delta)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_limit_moves_toward_ceiling() {
        let spec = ChainSpec::default();

        // Moving up is bounded by parent/1024 - 1.
        let next = spec.calc_gas_limit(20_000_000, 30_000_000);
        assert_eq!(next, 20_000_000 + 20_000_000 / 1024 - 1);

        // Moving down is bounded too.
        let next = spec.calc_gas_limit(30_000_000, 20_000_000);
        assert_eq!(next, 30_000_000 - (30_000_000 / 1024 - 1));

        // Already at the target.
        assert_eq!(spec.calc_gas_limit(30_000_000, 30_000_000), 30_000_000);

        // Desired below the protocol floor clamps to the floor.
        assert_eq!(spec.calc_gas_limit(MIN_GAS_LIMIT, 0), MIN_GAS_LIMIT);
    }

    #[test]
    fn test_base_fee_first_fork_block() {
        let spec = ChainSpec { london_block: Some(5), ..Default::default() };
        let parent = Header { gas_limit: 30_000_000, ..Default::default() };
        assert_eq!(spec.calc_base_fee(&parent), INITIAL_BASE_FEE);
    }

    #[test]
    fn test_base_fee_tracks_usage() {
        let spec = ChainSpec { london_block: Some(0), ..Default::default() };

        // At target: unchanged.
        let parent = Header {
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            base_fee: Some(INITIAL_BASE_FEE),
            ..Default::default()
        };
        assert_eq!(spec.calc_base_fee(&parent), INITIAL_BASE_FEE);

        // Full block: +12.5%.
        let parent = Header { gas_used: 30_000_000, ..parent.clone() };
        assert_eq!(spec.calc_base_fee(&parent), INITIAL_BASE_FEE + INITIAL_BASE_FEE / 8);

        // Empty block: -12.5%.
        let parent = Header { gas_used: 0, ..parent.clone() };
        assert_eq!(spec.calc_base_fee(&parent), INITIAL_BASE_FEE - INITIAL_BASE_FEE / 8);
    }

    #[test]
    fn test_fork_gates() {
        let spec = ChainSpec {
            eip155_block: Some(10),
            london_block: None,
            parallel_block: Some(0),
            ..Default::default()
        };
        assert!(!spec.is_eip155(9));
        assert!(spec.is_eip155(10));
        assert!(!spec.is_london(u64::MAX));
        assert!(spec.is_parallel(0));
    }
}
