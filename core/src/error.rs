// Error types for Lodestone Core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("negative block index {0}")]
    InvalidBlockIndex(i64),

    #[error("invalid difficulty {difficulty} for block index {index}")]
    InvalidBlockDifficulty { index: i64, difficulty: i64 },

    #[error("block nonce does not satisfy difficulty {difficulty}")]
    InvalidBlockNonce { difficulty: i64 },

    #[error("block timestamp {timestamp} is more than {max_skew_secs}s ahead of {current_time}")]
    InvalidBlockTimestamp {
        timestamp: String,
        current_time: String,
        max_skew_secs: i64,
    },

    #[error("block at index {index} has a missing or spurious previous hash")]
    InvalidBlockPreviousHash { index: i64 },

    #[error("transaction fingerprint mismatch: header carries {stored}, computed {computed}")]
    InvalidBlockTxHash { stored: String, computed: String },

    #[error("block hash mismatch: stored {stored}, computed {computed}")]
    InvalidBlockHash { stored: String, computed: String },

    #[error("transactions are not in the canonical evaluation order")]
    InvalidBlockTxOrder,

    #[error("invalid transaction signature")]
    InvalidTxSignature,

    #[error("transaction public key does not match its signer")]
    InvalidTxPublicKey,

    #[error("invalid transaction nonce {0}")]
    InvalidTxNonce(i64),

    #[error("transaction touched addresses outside its declared set: {}", .excess.join(", "))]
    InvalidTxUpdatedAddresses { excess: Vec<String> },

    #[error("block has no miner to credit action execution to")]
    MissingMiner,

    #[error("action execution failed: {0}")]
    ActionFailed(String),
}
