// Wire projections: RawBlock (round-trip) and BlockDigest (propagation)
//
// Both pin the id-sorted transaction order; the evaluation order is a
// derived property and never travels.
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::action::Action;
use crate::block::{id_sorted, Block};
use crate::codec::{decode, encode, Value};
use crate::error::CoreError;
use crate::header::BlockHeader;
use crate::transaction::Transaction;
use crate::{array_from, timestamp, Address, Hash256, TxId};

/// Header plus fully serialized signed transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub header: BlockHeader,
    pub transactions: Vec<Vec<u8>>,
}

/// Header plus transaction ids only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDigest {
    pub header: BlockHeader,
    pub transaction_ids: Vec<TxId>,
}

impl RawBlock {
    pub fn to_canonical_value(&self) -> Value {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(b"header".to_vec(), self.header.to_canonical_value());
        fields.insert(
            b"transactions".to_vec(),
            Value::List(self.transactions.iter().map(|tx| Value::bytes(tx.clone())).collect()),
        );
        Value::Dict(fields)
    }

    pub fn from_canonical_value(value: &Value) -> Result<Self, CoreError> {
        let header = BlockHeader::from_canonical_value(value.field("header")?)?;
        let transactions = value
            .field("transactions")?
            .expect_list()?
            .iter()
            .map(|item| Ok(item.expect_bytes()?.to_vec()))
            .collect::<Result<Vec<_>, CoreError>>()?;
        Ok(Self { header, transactions })
    }
}

impl BlockDigest {
    pub fn to_canonical_value(&self) -> Value {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(b"header".to_vec(), self.header.to_canonical_value());
        fields.insert(
            b"transaction_ids".to_vec(),
            Value::List(self.transaction_ids.iter().map(|id| Value::bytes(*id)).collect()),
        );
        Value::Dict(fields)
    }

    pub fn from_canonical_value(value: &Value) -> Result<Self, CoreError> {
        let header = BlockHeader::from_canonical_value(value.field("header")?)?;
        let transaction_ids = value
            .field("transaction_ids")?
            .expect_list()?
            .iter()
            .map(|item| array_from(item.expect_bytes()?, "transaction id"))
            .collect::<Result<Vec<TxId>, _>>()?;
        Ok(Self { header, transaction_ids })
    }
}

impl Block {
    /// Round-trip projection: header + id-sorted signed serializations.
    pub fn to_raw(&self) -> RawBlock {
        RawBlock {
            header: self.header(),
            transactions: id_sorted(self.transactions())
                .into_iter()
                .map(|tx| tx.serialize(true))
                .collect(),
        }
    }

    /// Propagation projection: header + id-sorted transaction ids.
    pub fn to_digest(&self) -> BlockDigest {
        BlockDigest {
            header: self.header(),
            transaction_ids: id_sorted(self.transactions())
                .into_iter()
                .map(Transaction::id)
                .collect(),
        }
    }

    /// Canonical wire bytes; memoises `bytes_length`.
    pub fn serialize(&self) -> Vec<u8> {
        let bytes = encode(&self.to_raw().to_canonical_value());
        let _ = self.bytes_length.set(bytes.len());
        bytes
    }

    /// Length of the canonical serialization, computed on first use.
    pub fn bytes_length(&self) -> usize {
        *self
            .bytes_length
            .get_or_init(|| encode(&self.to_raw().to_canonical_value()).len())
    }

    /// Decode canonical wire bytes back into a block. All hashes and the
    /// evaluation order are re-derived by the constructor; `bytes_length`
    /// is seeded with the input length.
    pub fn deserialize<F>(bytes: &[u8], decode_action: &F) -> Result<Block, CoreError>
    where
        F: Fn(&Value) -> Result<Arc<dyn Action>, CoreError>,
    {
        let value = decode(bytes)?;
        let raw = RawBlock::from_canonical_value(&value)?;
        let block = Block::from_raw(raw, decode_action)?;
        let _ = block.bytes_length.set(bytes.len());
        Ok(block)
    }

    /// Rebuild a block from its wire projection.
    pub fn from_raw<F>(raw: RawBlock, decode_action: &F) -> Result<Block, CoreError>
    where
        F: Fn(&Value) -> Result<Arc<dyn Action>, CoreError>,
    {
        let header = &raw.header;
        let transactions = raw
            .transactions
            .iter()
            .map(|bytes| Transaction::from_canonical_value(&decode(bytes)?, decode_action))
            .collect::<Result<Vec<_>, _>>()?;
        let timestamp: DateTime<Utc> = timestamp::parse(&header.timestamp)?;
        let miner: Option<Address> = optional(&header.miner, "reward_beneficiary")?;
        let previous_hash: Option<Hash256> = optional(&header.previous_hash, "previous_hash")?;
        let state_root_hash: Option<Hash256> = optional(&header.state_root_hash, "state_root_hash")?;
        Ok(Block::new(
            header.index,
            header.difficulty,
            header.total_difficulty,
            header.nonce.clone(),
            miner,
            previous_hash,
            timestamp,
            transactions,
            state_root_hash,
        ))
    }
}

/// Empty wire bytes mean absent; anything else must have the exact width.
fn optional<const N: usize>(bytes: &[u8], what: &str) -> Result<Option<[u8; N]>, CoreError> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(array_from(bytes, what)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionContext;
    use crate::state::AccountStateDelta;
    use chrono::TimeZone;
    use ed25519_dalek::SigningKey;
    use primitive_types::U256;
    use std::collections::BTreeSet;

    #[derive(Debug)]
    struct Tag(Vec<u8>);

    impl Action for Tag {
        fn to_canonical_value(&self) -> Value {
            Value::bytes(self.0.clone())
        }

        fn execute(&self, context: ActionContext) -> Result<AccountStateDelta, CoreError> {
            Ok(context.previous_states)
        }
    }

    fn decode_tag(value: &Value) -> Result<Arc<dyn Action>, CoreError> {
        Ok(Arc::new(Tag(value.expect_bytes()?.to_vec())))
    }

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()
    }

    fn sample_block() -> Block {
        let txs = (1u8..=3)
            .map(|seed| {
                let key = SigningKey::from_bytes(&[seed; 32]);
                let signer = crate::transaction::address_of(&key.verifying_key().to_bytes());
                Transaction::sign(
                    &key,
                    0,
                    BTreeSet::from([signer]),
                    vec![Arc::new(Tag(vec![seed]))],
                    when(),
                )
            })
            .collect();
        Block::new(
            0,
            0,
            U256::zero(),
            Vec::new(),
            Some([0u8; 20]),
            None,
            when(),
            txs,
            None,
        )
    }

    #[test]
    fn test_raw_transactions_are_id_sorted() {
        let block = sample_block();
        let raw = block.to_raw();
        let mut ids: Vec<TxId> = block.transactions().iter().map(Transaction::id).collect();
        ids.sort();
        let raw_ids: Vec<TxId> = raw
            .transactions
            .iter()
            .map(|bytes| {
                let value = decode(bytes).unwrap();
                Transaction::from_canonical_value(&value, &decode_tag).unwrap().id()
            })
            .collect();
        assert_eq!(raw_ids, ids);
    }

    #[test]
    fn test_digest_carries_ids_only() {
        let block = sample_block();
        let digest = block.to_digest();
        let mut ids: Vec<TxId> = block.transactions().iter().map(Transaction::id).collect();
        ids.sort();
        assert_eq!(digest.transaction_ids, ids);
        let revived = BlockDigest::from_canonical_value(&digest.to_canonical_value()).unwrap();
        assert_eq!(revived, digest);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let block = sample_block();
        let bytes = block.serialize();
        let revived = Block::deserialize(&bytes, &decode_tag).unwrap();
        assert_eq!(revived, block);
        assert_eq!(revived.bytes_length(), bytes.len());
        assert_eq!(block.bytes_length(), bytes.len());
    }

    #[test]
    fn test_deserialize_rejects_malformed_shapes() {
        assert!(matches!(
            Block::deserialize(b"i1e", &decode_tag),
            Err(CoreError::Decoding(_)),
        ));
        assert!(matches!(
            Block::deserialize(b"de", &decode_tag),
            Err(CoreError::Decoding(_)),
        ));
        assert!(matches!(
            Block::deserialize(b"not canonical at all", &decode_tag),
            Err(CoreError::Decoding(_)),
        ));
    }

    #[test]
    fn test_bytes_length_lazy_without_serialize() {
        let block = sample_block();
        let expected = block.serialize().len();
        let fresh = sample_block();
        assert_eq!(fresh.bytes_length(), expected);
    }
}
