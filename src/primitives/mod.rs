//! Core chain primitives shared by the worker, the pool and the
//! consensus seams.

mod block;
mod bundle;
mod extra;
mod gas;
mod receipt;
mod transaction;

pub use block::{Block, BlockBody, Header, Withdrawal};
pub use bundle::MevBundle;
pub use extra::{
    decode_extra_data, encode_extra_data, BlockExtraData, ExtraDataError, EXTRA_SEAL, EXTRA_VANITY,
};
pub use gas::{GasLimitReached, GasPool, TX_GAS};
pub use receipt::{Log, Receipt};
pub use transaction::{
    ConditionViolation, ConditionalOptions, KnownAccount, PlaceholderSigner, Signer, Transaction,
    TransactionBuilder, TxError, SIGNATURE_LENGTH,
};
