//! Worker configuration.

use alloy_primitives::{Address, Bytes};
use std::time::Duration;
use tracing::warn;

/// Minimal interval between recreating the sealing block with newly
/// arrived transactions.
pub const MIN_RECOMMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum interval the adaptive controller will stretch the recommit
/// period to.
pub const MAX_RECOMMIT_INTERVAL: Duration = Duration::from_secs(15);

/// Default recommit interval.
pub const DEFAULT_RECOMMIT_INTERVAL: Duration = Duration::from_secs(3);

/// Default allowance for building one payload.
pub const DEFAULT_NEW_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Default gas ceiling fed into the per-block gas-limit recomputation.
pub const DEFAULT_GAS_CEIL: u64 = 30_000_000;

/// Impact a single adjustment has on the recommit interval.
pub(crate) const INTERVAL_ADJUST_RATIO: f64 = 0.1;

/// Bias applied during interval recalculation so the limits stay
/// reachable, in nanoseconds.
pub(crate) const INTERVAL_ADJUST_BIAS: f64 = 200_000_000.0;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Address credited with block rewards and tips.
    pub etherbase: Address,
    /// Vanity bytes for the header extra-data.
    pub extra_data: Bytes,
    /// Gas ceiling for produced blocks.
    pub gas_ceil: u64,
    /// Interval for recommitting sealing work.
    pub recommit: Duration,
    /// Allowance for building one payload before it is cut short.
    pub new_payload_timeout: Duration,
    /// Enables opcode-level commit interruption and the deadline
    /// timer; disabling it also forces the empty pre-seal off.
    pub commit_interrupt: bool,
    /// Produce bundle blocks instead of ordinary ones.
    pub bundle_mode: bool,
    /// How many bundles a bundle block merges.
    pub max_merged_bundles: u64,
}

impl MinerConfig {
    /// Create a configuration sealing into `etherbase`.
    pub fn new(etherbase: Address) -> Self {
        Self {
            etherbase,
            extra_data: Bytes::default(),
            gas_ceil: DEFAULT_GAS_CEIL,
            recommit: DEFAULT_RECOMMIT_INTERVAL,
            new_payload_timeout: DEFAULT_NEW_PAYLOAD_TIMEOUT,
            commit_interrupt: true,
            bundle_mode: false,
            max_merged_bundles: 0,
        }
    }

    /// Set the gas ceiling.
    pub fn with_gas_ceil(mut self, gas_ceil: u64) -> Self {
        self.gas_ceil = gas_ceil;
        self
    }

    /// Set the extra-data vanity.
    pub fn with_extra_data(mut self, extra_data: Bytes) -> Self {
        self.extra_data = extra_data;
        self
    }

    /// Set the recommit interval.
    pub fn with_recommit(mut self, recommit: Duration) -> Self {
        self.recommit = recommit;
        self
    }

    /// Set the payload-building allowance.
    pub fn with_new_payload_timeout(mut self, timeout: Duration) -> Self {
        self.new_payload_timeout = timeout;
        self
    }

    /// Enable or disable commit interruption.
    pub fn with_commit_interrupt(mut self, enabled: bool) -> Self {
        self.commit_interrupt = enabled;
        self
    }

    /// Configure bundle production.
    pub fn with_bundle_mode(mut self, max_merged_bundles: u64) -> Self {
        self.bundle_mode = true;
        self.max_merged_bundles = max_merged_bundles;
        self
    }

    /// Clamp out-of-range settings, logging what was adjusted.
    pub fn sanitize(mut self) -> Self {
        if self.recommit < MIN_RECOMMIT_INTERVAL {
            warn!(
                target: "miner",
                provided = ?self.recommit,
                updated = ?MIN_RECOMMIT_INTERVAL,
                "Sanitizing miner recommit interval"
            );
            self.recommit = MIN_RECOMMIT_INTERVAL;
        }
        if self.new_payload_timeout.is_zero() {
            warn!(
                target: "miner",
                updated = ?DEFAULT_NEW_PAYLOAD_TIMEOUT,
                "Sanitizing new payload timeout to default"
            );
            self.new_payload_timeout = DEFAULT_NEW_PAYLOAD_TIMEOUT;
        }
        if self.new_payload_timeout < Duration::from_millis(100) {
            warn!(
                target: "miner",
                provided = ?self.new_payload_timeout,
                "Low payload timeout may cause high amount of non-full blocks"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps_recommit() {
        let config = MinerConfig::new(Address::ZERO)
            .with_recommit(Duration::from_millis(10))
            .sanitize();
        assert_eq!(config.recommit, MIN_RECOMMIT_INTERVAL);
    }

    #[test]
    fn test_sanitize_defaults_zero_timeout() {
        let config = MinerConfig::new(Address::ZERO)
            .with_new_payload_timeout(Duration::ZERO)
            .sanitize();
        assert_eq!(config.new_payload_timeout, DEFAULT_NEW_PAYLOAD_TIMEOUT);
    }

    #[test]
    fn test_builder_round_trip() {
        let config = MinerConfig::new(Address::repeat_byte(1))
            .with_gas_ceil(10_000_000)
            .with_recommit(Duration::from_secs(5))
            .with_bundle_mode(3);
        assert_eq!(config.gas_ceil, 10_000_000);
        assert_eq!(config.recommit, Duration::from_secs(5));
        assert!(config.bundle_mode);
        assert_eq!(config.max_merged_bundles, 3);
    }
}
