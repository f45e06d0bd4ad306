//! Block and header types.

use super::transaction::{ConditionViolation, Transaction};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::Encodable;
use std::sync::Arc;

/// A block header under construction or sealed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Fee recipient chosen by the sealer.
    pub coinbase: Address,
    /// Root of the post-state.
    pub state_root: B256,
    /// Root of the transaction list.
    pub transactions_root: B256,
    /// Root of the receipt list.
    pub receipts_root: B256,
    /// Sealing difficulty.
    pub difficulty: U256,
    /// Block height.
    pub number: u64,
    /// Gas ceiling of the block.
    pub gas_limit: u64,
    /// Total gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Unix timestamp.
    pub time: u64,
    /// Extra data: vanity prefix, application payload, seal suffix.
    pub extra: Bytes,
    /// Randomness contribution.
    pub mix_hash: B256,
    /// Sealer nonce field.
    pub nonce: u64,
    /// EIP-1559 base fee, absent before the fee-market fork.
    pub base_fee: Option<u128>,
}

impl Header {
    /// Hash of the RLP-encoded header.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.length());
        self.encode(&mut buf);
        keccak256(&buf)
    }

    /// Check conditional block-number bounds against this header.
    pub fn validate_block_number_bounds(
        &self,
        min: Option<u64>,
        max: Option<u64>,
    ) -> Result<(), ConditionViolation> {
        let below = min.is_some_and(|m| self.number < m);
        let above = max.is_some_and(|m| self.number > m);
        if below || above {
            return Err(ConditionViolation::BlockNumberOutOfRange { number: self.number, min, max });
        }
        Ok(())
    }

    /// Check conditional timestamp bounds against this header.
    pub fn validate_timestamp_bounds(
        &self,
        min: Option<u64>,
        max: Option<u64>,
    ) -> Result<(), ConditionViolation> {
        let below = min.is_some_and(|m| self.time < m);
        let above = max.is_some_and(|m| self.time > m);
        if below || above {
            return Err(ConditionViolation::TimestampOutOfRange { timestamp: self.time, min, max });
        }
        Ok(())
    }

    fn payload_length(&self) -> usize {
        let mut len = self.parent_hash.length()
            + self.coinbase.length()
            + self.state_root.length()
            + self.transactions_root.length()
            + self.receipts_root.length()
            + self.difficulty.length()
            + self.number.length()
            + self.gas_limit.length()
            + self.gas_used.length()
            + self.time.length()
            + self.extra.length()
            + self.mix_hash.length()
            + self.nonce.length();
        if let Some(fee) = self.base_fee {
            len += fee.length();
        }
        len
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.payload_length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.parent_hash.encode(out);
        self.coinbase.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.time.encode(out);
        self.extra.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        if let Some(fee) = self.base_fee {
            fee.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

/// A validator withdrawal included in a block body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Withdrawal {
    /// Monotonic withdrawal index.
    pub index: u64,
    /// Index of the withdrawing validator.
    pub validator_index: u64,
    /// Withdrawal target.
    pub address: Address,
    /// Amount in gwei.
    pub amount_gwei: u64,
}

/// The transactions and withdrawals carried by a block.
#[derive(Debug, Clone, Default)]
pub struct BlockBody {
    /// Ordered transaction list.
    pub transactions: Vec<Arc<Transaction>>,
    /// Withdrawals, when the fork is active.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

/// An assembled block.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// The block body.
    pub body: BlockBody,
}

impl Block {
    /// Assemble a block from a header and transactions.
    pub fn new(
        header: Header,
        transactions: Vec<Arc<Transaction>>,
        withdrawals: Option<Vec<Withdrawal>>,
    ) -> Self {
        Self { header, body: BlockBody { transactions, withdrawals } }
    }

    /// Block hash.
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Block height.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Parent hash.
    pub fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    /// Ordered transactions.
    pub fn transactions(&self) -> &[Arc<Transaction>] {
        &self.body.transactions
    }

    /// Whether the block carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.body.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_hash_changes_with_contents() {
        let mut header = Header { number: 1, gas_limit: 30_000_000, ..Default::default() };
        let a = header.hash();
        header.time = 12;
        assert_ne!(a, header.hash());
    }

    #[test]
    fn test_header_hash_base_fee_sensitivity() {
        let without = Header::default();
        let with = Header { base_fee: Some(7), ..Default::default() };
        assert_ne!(without.hash(), with.hash());
    }

    #[test]
    fn test_block_number_bounds() {
        let header = Header { number: 10, ..Default::default() };
        assert!(header.validate_block_number_bounds(None, None).is_ok());
        assert!(header.validate_block_number_bounds(Some(10), Some(10)).is_ok());
        assert!(header.validate_block_number_bounds(Some(11), None).is_err());
        assert!(header.validate_block_number_bounds(None, Some(9)).is_err());
    }

    #[test]
    fn test_timestamp_bounds() {
        let header = Header { time: 100, ..Default::default() };
        assert!(header.validate_timestamp_bounds(Some(100), Some(200)).is_ok());
        assert!(header.validate_timestamp_bounds(Some(101), None).is_err());
        assert!(header.validate_timestamp_bounds(None, Some(99)).is_err());
    }
}
