// Block header: flat wire-level record and structural validation
//
// Byte-sequence fields hold raw wire values; an empty sequence stands for
// an absent field. The stored timestamp string participates in the hash
// input verbatim and is never re-formatted.
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use num_bigint::{BigInt, Sign};
use primitive_types::U256;
use sha2::{Digest, Sha256};

use crate::codec::{encode, Value};
use crate::error::CoreError;
use crate::{timestamp, Hash256};

/// Maximum allowed clock skew for an incoming block's timestamp.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 15;

/// Whether a digest, read as a big-endian unsigned integer, beats the
/// difficulty: `digest < 2^256 / difficulty`. Difficulty zero or below is
/// beaten by anything.
pub fn satisfies_difficulty(digest: &Hash256, difficulty: i64) -> bool {
    if difficulty <= 0 {
        return true;
    }
    // digest < 2^256 / d  <=>  d * digest <= 2^256 - 1
    U256::from_big_endian(digest) <= U256::MAX / U256::from(difficulty as u64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub index: i64,
    pub timestamp: String,
    pub nonce: Vec<u8>,
    pub miner: Vec<u8>,
    pub difficulty: i64,
    pub total_difficulty: U256,
    pub previous_hash: Vec<u8>,
    pub tx_hash: Vec<u8>,
    pub hash: Vec<u8>,
    pub pre_evaluation_hash: Vec<u8>,
    pub state_root_hash: Vec<u8>,
}

impl BlockHeader {
    /// Canonical hash input carrying this header's own state root
    /// (post-evaluation form).
    pub fn hash_input(&self) -> Vec<u8> {
        self.hash_input_with(&self.state_root_hash)
    }

    /// Canonical hash input with the state root omitted; its SHA-256 must
    /// reproduce `pre_evaluation_hash`.
    pub fn pre_evaluation_input(&self) -> Vec<u8> {
        self.hash_input_with(b"")
    }

    fn hash_input_with(&self, state_root_hash: &[u8]) -> Vec<u8> {
        encode(&Value::Dict(self.base_fields(state_root_hash)))
    }

    fn base_fields(&self, state_root_hash: &[u8]) -> BTreeMap<Vec<u8>, Value> {
        let mut fields = BTreeMap::new();
        fields.insert(b"difficulty".to_vec(), Value::from(self.difficulty));
        fields.insert(b"index".to_vec(), Value::from(self.index));
        fields.insert(b"nonce".to_vec(), Value::bytes(self.nonce.clone()));
        if !self.previous_hash.is_empty() {
            fields.insert(b"previous_hash".to_vec(), Value::bytes(self.previous_hash.clone()));
        }
        if !self.miner.is_empty() {
            fields.insert(b"reward_beneficiary".to_vec(), Value::bytes(self.miner.clone()));
        }
        if !state_root_hash.is_empty() {
            fields.insert(b"state_root_hash".to_vec(), Value::bytes(state_root_hash));
        }
        fields.insert(
            b"timestamp".to_vec(),
            Value::bytes(self.timestamp.as_bytes()),
        );
        if !self.tx_hash.is_empty() {
            fields.insert(
                b"transaction_fingerprint".to_vec(),
                Value::bytes(self.tx_hash.clone()),
            );
        }
        fields
    }

    /// Structural validation: index, difficulty, timestamp skew, previous
    /// hash presence, and the proof-of-work check against this header's
    /// own canonical bytes.
    pub fn validate(&self, current_time: DateTime<Utc>) -> Result<(), CoreError> {
        if self.index < 0 {
            return Err(CoreError::InvalidBlockIndex(self.index));
        }
        if self.difficulty < 0 || (self.index == 0) != (self.difficulty == 0) {
            return Err(CoreError::InvalidBlockDifficulty {
                index: self.index,
                difficulty: self.difficulty,
            });
        }
        let stamped = timestamp::parse(&self.timestamp)?;
        if stamped > current_time + Duration::seconds(MAX_TIMESTAMP_SKEW_SECS) {
            return Err(CoreError::InvalidBlockTimestamp {
                timestamp: self.timestamp.clone(),
                current_time: timestamp::format(&current_time),
                max_skew_secs: MAX_TIMESTAMP_SKEW_SECS,
            });
        }
        if (self.index == 0) != self.previous_hash.is_empty() {
            return Err(CoreError::InvalidBlockPreviousHash { index: self.index });
        }
        let digest: Hash256 = Sha256::digest(self.pre_evaluation_input()).into();
        if digest.as_slice() != self.pre_evaluation_hash
            || !satisfies_difficulty(&digest, self.difficulty)
        {
            return Err(CoreError::InvalidBlockNonce {
                difficulty: self.difficulty,
            });
        }
        Ok(())
    }

    /// Wire form: the hash-input fields plus the derived hashes and the
    /// cumulative difficulty.
    pub fn to_canonical_value(&self) -> Value {
        let mut fields = self.base_fields(&self.state_root_hash);
        fields.insert(b"hash".to_vec(), Value::bytes(self.hash.clone()));
        fields.insert(
            b"pre_evaluation_hash".to_vec(),
            Value::bytes(self.pre_evaluation_hash.clone()),
        );
        fields.insert(
            b"total_difficulty".to_vec(),
            Value::Integer(u256_to_bigint(&self.total_difficulty)),
        );
        Value::Dict(fields)
    }

    pub fn from_canonical_value(value: &Value) -> Result<Self, CoreError> {
        let bytes = |key: &str| -> Result<Vec<u8>, CoreError> {
            match value.field_opt(key) {
                Some(item) => Ok(item.expect_bytes()?.to_vec()),
                None => Ok(Vec::new()),
            }
        };
        let timestamp_text = value.field("timestamp")?.expect_bytes()?;
        Ok(Self {
            index: value.field("index")?.expect_i64()?,
            timestamp: String::from_utf8(timestamp_text.to_vec())
                .map_err(|_| CoreError::Decoding("timestamp is not UTF-8".into()))?,
            nonce: bytes("nonce")?,
            miner: bytes("reward_beneficiary")?,
            difficulty: value.field("difficulty")?.expect_i64()?,
            total_difficulty: bigint_to_u256(value.field("total_difficulty")?.expect_integer()?)?,
            previous_hash: bytes("previous_hash")?,
            tx_hash: bytes("transaction_fingerprint")?,
            hash: bytes("hash")?,
            pre_evaluation_hash: bytes("pre_evaluation_hash")?,
            state_root_hash: bytes("state_root_hash")?,
        })
    }
}

fn u256_to_bigint(value: &U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

fn bigint_to_u256(value: &BigInt) -> Result<U256, CoreError> {
    let (sign, bytes) = value.to_bytes_be();
    if sign == Sign::Minus {
        return Err(CoreError::Decoding("total_difficulty is negative".into()));
    }
    if bytes.len() > 32 {
        return Err(CoreError::Decoding("total_difficulty exceeds 256 bits".into()));
    }
    Ok(U256::from_big_endian(&bytes))
}
