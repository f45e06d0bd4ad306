//! Block gas accounting.

use thiserror::Error;

/// Intrinsic gas of a plain transfer; the floor below which no further
/// transaction can fit in a block.
pub const TX_GAS: u64 = 21_000;

/// Raised when a gas pool cannot cover a requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("gas limit reached")]
pub struct GasLimitReached;

/// Tracks the gas remaining for transactions in a block under
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPool(u64);

impl GasPool {
    /// Create a pool holding `amount` gas.
    pub fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Gas remaining in the pool.
    pub fn gas(&self) -> u64 {
        self.0
    }

    /// Return gas to the pool.
    pub fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }

    /// Consume gas from the pool.
    pub fn sub_gas(&mut self, amount: u64) -> Result<(), GasLimitReached> {
        if self.0 < amount {
            return Err(GasLimitReached);
        }
        self.0 -= amount;
        Ok(())
    }

    /// Reset the pool to an absolute amount.
    pub fn set_gas(&mut self, amount: u64) {
        self.0 = amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_pool_accounting() {
        let mut pool = GasPool::new(100_000);
        assert!(pool.sub_gas(TX_GAS).is_ok());
        assert_eq!(pool.gas(), 79_000);

        pool.add_gas(1_000);
        assert_eq!(pool.gas(), 80_000);

        assert_eq!(pool.sub_gas(80_001), Err(GasLimitReached));
        assert_eq!(pool.gas(), 80_000);
    }
}
