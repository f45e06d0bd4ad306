//! Transaction type and sender recovery.
//!
//! Signature handling is deliberately lightweight: transactions carry a
//! 65-byte envelope whose first 20 bytes are the author's address. Real
//! curve recovery lives outside this crate; the [`Signer`] seam is what
//! the worker depends on.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::Encodable;
use std::sync::Arc;
use thiserror::Error;

/// Length of the signature envelope carried by every transaction.
pub const SIGNATURE_LENGTH: usize = 65;

/// Transaction type identifier for dynamic-fee transactions.
const DYNAMIC_FEE_TX_TYPE: u8 = 2;

/// Errors raised by transaction-level accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// The max fee per gas is below the block base fee.
    #[error("max fee per gas below block base fee")]
    FeeCapTooLow,

    /// The priority fee exceeds the max fee per gas.
    #[error("max priority fee per gas higher than max fee per gas")]
    TipAboveFeeCap,

    /// The signature envelope is malformed.
    #[error("invalid signature envelope: {0} bytes")]
    InvalidSignature(usize),
}

/// A violated conditional-inclusion bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionViolation {
    /// Header number outside `[min, max]`.
    #[error("block number {number} outside bounds [{min:?}, {max:?}]")]
    BlockNumberOutOfRange {
        /// Current header number.
        number: u64,
        /// Inclusive lower bound, if any.
        min: Option<u64>,
        /// Inclusive upper bound, if any.
        max: Option<u64>,
    },

    /// Header timestamp outside `[min, max]`.
    #[error("timestamp {timestamp} outside bounds [{min:?}, {max:?}]")]
    TimestampOutOfRange {
        /// Current header timestamp.
        timestamp: u64,
        /// Inclusive lower bound, if any.
        min: Option<u64>,
        /// Inclusive upper bound, if any.
        max: Option<u64>,
    },

    /// A known-account precondition no longer holds.
    #[error("state of account {address} diverged from expectation")]
    AccountMismatch {
        /// The account that diverged.
        address: Address,
    },
}

/// Expected state of an account named in a conditional transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownAccount {
    /// The account's full storage root must match.
    StorageRoot(B256),
    /// Individual storage slots must match.
    Slots(Vec<(B256, B256)>),
}

/// Optional inclusion bounds carried by a transaction, in the spirit of
/// ERC-4337 block conditions. The worker drops the transaction without
/// execution when any bound is violated for the header under
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalOptions {
    /// Inclusive minimum block number.
    pub block_number_min: Option<u64>,
    /// Inclusive maximum block number.
    pub block_number_max: Option<u64>,
    /// Inclusive minimum timestamp.
    pub timestamp_min: Option<u64>,
    /// Inclusive maximum timestamp.
    pub timestamp_max: Option<u64>,
    /// Account-state preconditions, keyed by address.
    pub known_accounts: Vec<(Address, KnownAccount)>,
}

/// A dynamic-fee transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Chain id for replay protection; `None` marks a pre-EIP-155
    /// unprotected transaction.
    pub chain_id: Option<u64>,
    /// Sender nonce.
    pub nonce: u64,
    /// Gas limit for execution.
    pub gas_limit: u64,
    /// Max fee per gas, in wei.
    pub gas_fee_cap: u128,
    /// Max priority fee per gas, in wei.
    pub gas_tip_cap: u128,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: U256,
    /// Call data.
    pub input: Bytes,
    /// Transaction type identifier.
    pub tx_type: u8,
    /// Conditional inclusion bounds, if any.
    pub options: Option<ConditionalOptions>,
    /// 65-byte signature envelope.
    pub signature: Bytes,
    hash: B256,
}

impl Transaction {
    /// Start building a transaction.
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder::default()
    }

    /// Transaction hash, computed once at construction.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// Whether the transaction is replay protected.
    pub fn protected(&self) -> bool {
        self.chain_id.is_some()
    }

    /// The miner-retained fee per gas against the given base fee:
    /// `min(gas_tip_cap, gas_fee_cap - base_fee)`. Errors when the fee
    /// cap cannot cover the base fee.
    pub fn effective_gas_tip(&self, base_fee: Option<u128>) -> Result<u128, TxError> {
        match base_fee {
            None => Ok(self.gas_tip_cap),
            Some(base) => {
                if self.gas_fee_cap < base {
                    return Err(TxError::FeeCapTooLow);
                }
                Ok(self.gas_tip_cap.min(self.gas_fee_cap - base))
            }
        }
    }

    /// Sanity-check the fee cap ordering of a dynamic-fee transaction.
    pub fn check_fee_caps(&self) -> Result<(), TxError> {
        if self.tx_type == DYNAMIC_FEE_TX_TYPE && self.gas_tip_cap > self.gas_fee_cap {
            return Err(TxError::TipAboveFeeCap);
        }
        Ok(())
    }

    /// Recover the sender from the signature envelope.
    pub fn recover_sender(&self) -> Result<Address, TxError> {
        if self.signature.len() != SIGNATURE_LENGTH {
            return Err(TxError::InvalidSignature(self.signature.len()));
        }
        Ok(Address::from_slice(&self.signature[..20]))
    }

    /// Build the signature envelope for the given author.
    pub fn placeholder_signature(author: Address) -> Bytes {
        let mut sig = vec![0u8; SIGNATURE_LENGTH];
        sig[..20].copy_from_slice(author.as_slice());
        Bytes::from(sig)
    }

    fn compute_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(128);
        self.chain_id.unwrap_or_default().encode(&mut buf);
        self.nonce.encode(&mut buf);
        self.gas_limit.encode(&mut buf);
        self.gas_fee_cap.encode(&mut buf);
        self.gas_tip_cap.encode(&mut buf);
        match self.to {
            Some(to) => to.encode(&mut buf),
            None => buf.push(alloy_rlp::EMPTY_STRING_CODE),
        }
        self.value.encode(&mut buf);
        self.input.encode(&mut buf);
        self.signature.encode(&mut buf);
        keccak256(&buf)
    }
}

/// Builder for [`Transaction`]; computes the hash on `build`.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    chain_id: Option<u64>,
    nonce: u64,
    gas_limit: u64,
    gas_fee_cap: u128,
    gas_tip_cap: u128,
    to: Option<Address>,
    value: U256,
    input: Bytes,
    tx_type: Option<u8>,
    options: Option<ConditionalOptions>,
    signature: Option<Bytes>,
}

impl TransactionBuilder {
    /// Set the chain id (marks the transaction replay protected).
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Set the sender nonce.
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Set the execution gas limit.
    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Set the max fee and max priority fee per gas.
    pub fn fee_caps(mut self, gas_fee_cap: u128, gas_tip_cap: u128) -> Self {
        self.gas_fee_cap = gas_fee_cap;
        self.gas_tip_cap = gas_tip_cap;
        self
    }

    /// Set the recipient.
    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    /// Set the transferred value.
    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Set the call data.
    pub fn input(mut self, input: Bytes) -> Self {
        self.input = input;
        self
    }

    /// Override the transaction type identifier.
    pub fn tx_type(mut self, tx_type: u8) -> Self {
        self.tx_type = Some(tx_type);
        self
    }

    /// Attach conditional inclusion bounds.
    pub fn options(mut self, options: ConditionalOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Sign with the placeholder envelope for `author`.
    pub fn signed_by(mut self, author: Address) -> Self {
        self.signature = Some(Transaction::placeholder_signature(author));
        self
    }

    /// Attach a raw signature envelope.
    pub fn signature(mut self, signature: Bytes) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Finalize the transaction.
    pub fn build(self) -> Transaction {
        let mut tx = Transaction {
            chain_id: self.chain_id,
            nonce: self.nonce,
            gas_limit: self.gas_limit,
            gas_fee_cap: self.gas_fee_cap,
            gas_tip_cap: self.gas_tip_cap,
            to: self.to,
            value: self.value,
            input: self.input,
            tx_type: self.tx_type.unwrap_or(DYNAMIC_FEE_TX_TYPE),
            options: self.options,
            signature: self.signature.unwrap_or_else(|| Bytes::from(vec![0u8; SIGNATURE_LENGTH])),
            hash: B256::ZERO,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Finalize behind an [`Arc`], the form the pool hands out.
    pub fn build_arc(self) -> Arc<Transaction> {
        Arc::new(self.build())
    }
}

/// Derives transaction senders. The worker never validates signatures
/// itself; it only needs a stable sender per transaction.
pub trait Signer: Send + Sync {
    /// Recover the sender of a transaction.
    fn sender(&self, tx: &Transaction) -> Result<Address, TxError>;
}

/// Signer over the placeholder signature envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderSigner;

impl Signer for PlaceholderSigner {
    fn sender(&self, tx: &Transaction) -> Result<Address, TxError> {
        tx.recover_sender()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_with_caps(fee_cap: u128, tip_cap: u128) -> Transaction {
        Transaction::builder()
            .chain_id(1)
            .gas_limit(21_000)
            .fee_caps(fee_cap, tip_cap)
            .signed_by(Address::repeat_byte(0xaa))
            .build()
    }

    #[test]
    fn test_effective_gas_tip() {
        let tx = tx_with_caps(100, 5);

        // No base fee: the tip cap stands alone.
        assert_eq!(tx.effective_gas_tip(None), Ok(5));
        // Base fee leaves more headroom than the tip cap.
        assert_eq!(tx.effective_gas_tip(Some(90)), Ok(5));
        // Base fee squeezes the tip below the cap.
        assert_eq!(tx.effective_gas_tip(Some(97)), Ok(3));
        // Base fee above the fee cap is an error.
        assert_eq!(tx.effective_gas_tip(Some(101)), Err(TxError::FeeCapTooLow));
    }

    #[test]
    fn test_fee_cap_ordering() {
        assert!(tx_with_caps(100, 5).check_fee_caps().is_ok());
        assert_eq!(
            tx_with_caps(5, 100).check_fee_caps(),
            Err(TxError::TipAboveFeeCap)
        );
    }

    #[test]
    fn test_sender_recovery() {
        let author = Address::repeat_byte(0x42);
        let tx = Transaction::builder().signed_by(author).build();
        assert_eq!(tx.recover_sender(), Ok(author));
        assert_eq!(PlaceholderSigner.sender(&tx), Ok(author));
    }

    #[test]
    fn test_hash_distinguishes_fields() {
        let a = Transaction::builder().nonce(0).build();
        let b = Transaction::builder().nonce(1).build();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_unprotected_transaction() {
        let tx = Transaction::builder().build();
        assert!(!tx.protected());
        assert!(tx_with_caps(1, 1).protected());
    }
}
