// Signed transaction carrier with canonical serialization
//
// The unsigned serialization is the signing input; the signed serialization
// is the identity input (the transaction id is its SHA-256).
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::action::{Action, ActionContext, ActionEvaluation};
use crate::codec::{encode, Value};
use crate::error::CoreError;
use crate::state::{AccountStateDelta, StateTrie};
use crate::{array_from, timestamp, Address, Hash256, TxId};

/// Derive an account address from an ed25519 verifying key.
pub fn address_of(public_key: &[u8; 32]) -> Address {
    let digest = Sha256::digest(public_key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[..20]);
    address
}

#[derive(Clone)]
pub struct Transaction {
    id: TxId,
    signer: Address,
    public_key: [u8; 32],
    nonce: i64,
    updated_addresses: BTreeSet<Address>,
    actions: Vec<Arc<dyn Action>>,
    timestamp: DateTime<Utc>,
    signature: Vec<u8>,
}

impl Transaction {
    /// Construct and sign a transaction with the given key.
    pub fn sign(
        key: &SigningKey,
        nonce: i64,
        updated_addresses: BTreeSet<Address>,
        actions: Vec<Arc<dyn Action>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let public_key = key.verifying_key().to_bytes();
        let mut tx = Self {
            id: [0u8; 32],
            signer: address_of(&public_key),
            public_key,
            nonce,
            updated_addresses,
            actions,
            timestamp: timestamp::truncate_to_micros(timestamp),
            signature: Vec::new(),
        };
        tx.signature = key.sign(&tx.serialize(false)).to_bytes().to_vec();
        tx.id = Sha256::digest(tx.serialize(true)).into();
        tx
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn nonce(&self) -> i64 {
        self.nonce
    }

    pub fn updated_addresses(&self) -> &BTreeSet<Address> {
        &self.updated_addresses
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn to_canonical_value(&self, signed: bool) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert(
            b"actions".to_vec(),
            Value::List(self.actions.iter().map(|a| a.to_canonical_value()).collect()),
        );
        fields.insert(b"nonce".to_vec(), Value::from(self.nonce));
        fields.insert(b"public_key".to_vec(), Value::bytes(self.public_key));
        if signed {
            fields.insert(b"signature".to_vec(), Value::bytes(self.signature.clone()));
        }
        fields.insert(b"signer".to_vec(), Value::bytes(self.signer));
        fields.insert(
            b"timestamp".to_vec(),
            Value::bytes(timestamp::format(&self.timestamp).into_bytes()),
        );
        fields.insert(
            b"updated_addresses".to_vec(),
            Value::List(
                self.updated_addresses
                    .iter()
                    .map(|address| Value::bytes(*address))
                    .collect(),
            ),
        );
        Value::Dict(fields)
    }

    pub fn serialize(&self, signed: bool) -> Vec<u8> {
        encode(&self.to_canonical_value(signed))
    }

    /// Rebuild a transaction from its canonical dictionary. Action payloads
    /// are opaque, so reviving them takes a decoder capability.
    pub fn from_canonical_value<F>(value: &Value, decode_action: &F) -> Result<Self, CoreError>
    where
        F: Fn(&Value) -> Result<Arc<dyn Action>, CoreError>,
    {
        let actions = value
            .field("actions")?
            .expect_list()?
            .iter()
            .map(decode_action)
            .collect::<Result<Vec<_>, _>>()?;
        let public_key: [u8; 32] = array_from(value.field("public_key")?.expect_bytes()?, "public_key")?;
        let signer: Address = array_from(value.field("signer")?.expect_bytes()?, "signer")?;
        let timestamp_text = value.field("timestamp")?.expect_bytes()?;
        let timestamp_text = std::str::from_utf8(timestamp_text)
            .map_err(|_| CoreError::Decoding("timestamp is not UTF-8".into()))?;
        let updated_addresses = value
            .field("updated_addresses")?
            .expect_list()?
            .iter()
            .map(|item| array_from(item.expect_bytes()?, "updated address"))
            .collect::<Result<BTreeSet<Address>, _>>()?;
        let mut tx = Self {
            id: [0u8; 32],
            signer,
            public_key,
            nonce: value.field("nonce")?.expect_i64()?,
            updated_addresses,
            actions,
            timestamp: timestamp::parse(timestamp_text)?,
            signature: value.field("signature")?.expect_bytes()?.to_vec(),
        };
        tx.id = Sha256::digest(tx.serialize(true)).into();
        Ok(tx)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.nonce < 0 {
            return Err(CoreError::InvalidTxNonce(self.nonce));
        }
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| CoreError::InvalidTxPublicKey)?;
        if address_of(&self.public_key) != self.signer {
            return Err(CoreError::InvalidTxPublicKey);
        }
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| CoreError::InvalidTxSignature)?;
        key.verify(&self.serialize(false), &signature)
            .map_err(|_| CoreError::InvalidTxSignature)
    }

    /// Lazily execute this transaction's actions, one evaluation per action.
    /// Each action sees the delta produced by the previous one; the stream
    /// ends after the first failing action.
    pub fn evaluate_actions_gradually<'a>(
        &'a self,
        pre_evaluation_hash: Hash256,
        block_index: i64,
        delta: AccountStateDelta,
        miner: Address,
        previous_states_trie: Option<Arc<dyn StateTrie>>,
    ) -> impl Iterator<Item = Result<ActionEvaluation, CoreError>> + 'a {
        let mut states = delta;
        let mut failed = false;
        self.actions.iter().filter_map(move |action| {
            if failed {
                return None;
            }
            let context = ActionContext {
                signer: self.signer,
                miner,
                block_index,
                pre_evaluation_hash,
                previous_states: states.clone(),
                previous_states_trie: previous_states_trie.clone(),
            };
            match action.execute(context) {
                Ok(output) => {
                    states = output.clone();
                    Some(Ok(ActionEvaluation {
                        action: Arc::clone(action),
                        signer: self.signer,
                        block_index,
                        output_states: output,
                    }))
                }
                Err(error) => {
                    failed = true;
                    Some(Err(error))
                }
            }
        })
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &hex::encode(self.id))
            .field("signer", &hex::encode(self.signer))
            .field("nonce", &self.nonce)
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}
