// Lodestone Core - Block entity, canonical encoding, and action evaluation
//
// This crate holds everything that must agree byte-for-byte across nodes:
// the canonical value encoding, block construction and hashing, the
// deterministic transaction ordering, structural validation, and the
// per-transaction action evaluation pipeline. The proof-of-work search
// itself lives in the consensus crate.

pub mod action;
pub mod block;
pub mod codec;
pub mod error;
pub mod header;
pub mod raw;
pub mod state;
pub mod timestamp;
pub mod transaction;

pub use action::{Action, ActionContext, ActionEvaluation};
pub use block::{Block, BlockEvaluation};
pub use codec::{decode, encode, Value};
pub use error::CoreError;
pub use header::{satisfies_difficulty, BlockHeader, MAX_TIMESTAMP_SKEW_SECS};
pub use raw::{BlockDigest, RawBlock};
pub use state::{
    null_state_getter, zero_balance_getter, AccountStateDelta, BalanceGetter, Currency,
    StateGetter, StateTrie,
};
pub use transaction::{address_of, Transaction};

/// A 20-byte account address.
pub type Address = [u8; 20];

/// A 32-byte SHA-256 digest.
pub type Hash256 = [u8; 32];

/// A transaction identifier: SHA-256 of the signed serialization.
pub type TxId = Hash256;

pub(crate) fn array_from<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], error::CoreError> {
    bytes.try_into().map_err(|_| {
        error::CoreError::Decoding(format!("{what}: expected {N} bytes, got {}", bytes.len()))
    })
}
