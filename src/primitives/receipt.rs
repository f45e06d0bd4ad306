//! Execution receipts and logs.

use alloy_primitives::{Address, Bytes, B256};

/// A log emitted during transaction execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
    /// Hash of the containing block, filled in once sealed.
    pub block_hash: Option<B256>,
}

/// The outcome of executing one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the executed transaction.
    pub tx_hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas consumed by this transaction.
    pub gas_used: u64,
    /// Gas consumed by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
    /// Hash of the containing block, filled in once sealed.
    pub block_hash: Option<B256>,
    /// Height of the containing block, filled in once sealed.
    pub block_number: Option<u64>,
    /// Position within the block, filled in once sealed.
    pub transaction_index: Option<u64>,
}

impl Receipt {
    /// Deep-copy the receipt and stamp its block location. Logs are
    /// copied as well so the pending snapshot never observes sealed
    /// location fields.
    pub fn with_block_location(&self, block_hash: B256, block_number: u64, index: u64) -> Self {
        let mut receipt = self.clone();
        receipt.block_hash = Some(block_hash);
        receipt.block_number = Some(block_number);
        receipt.transaction_index = Some(index);
        for log in &mut receipt.logs {
            log.block_hash = Some(block_hash);
        }
        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_location_patching() {
        let receipt = Receipt {
            tx_hash: B256::repeat_byte(0x01),
            success: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            logs: vec![Log::default(), Log::default()],
            ..Default::default()
        };

        let hash = B256::repeat_byte(0xbb);
        let patched = receipt.with_block_location(hash, 7, 3);

        assert_eq!(patched.block_hash, Some(hash));
        assert_eq!(patched.block_number, Some(7));
        assert_eq!(patched.transaction_index, Some(3));
        assert!(patched.logs.iter().all(|l| l.block_hash == Some(hash)));
        // The original stays untouched.
        assert_eq!(receipt.block_hash, None);
        assert!(receipt.logs.iter().all(|l| l.block_hash.is_none()));
    }
}
