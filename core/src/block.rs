// Block entity: construction, canonical hashing, transaction ordering,
// validation, and the per-transaction action evaluation driver
//
// A block is write-once. Every construction path (mining, deserialization,
// re-wrapping with a state root) funnels through `Block::new`, which
// re-derives the transaction fingerprint, the pre-evaluation hash, the
// evaluation order, and the final hash from scratch.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use primitive_types::U256;
use sha2::{Digest, Sha256};

use crate::action::ActionEvaluation;
use crate::codec::{encode, Value};
use crate::error::CoreError;
use crate::header::BlockHeader;
use crate::state::{
    null_state_getter, zero_balance_getter, AccountStateDelta, BalanceGetter, StateGetter,
    StateTrie,
};
use crate::transaction::Transaction;
use crate::{timestamp, Address, Hash256};

pub struct Block {
    index: i64,
    difficulty: i64,
    total_difficulty: U256,
    nonce: Vec<u8>,
    miner: Option<Address>,
    previous_hash: Option<Hash256>,
    timestamp: DateTime<Utc>,
    transactions: Vec<Transaction>,
    tx_hash: Option<Hash256>,
    pre_evaluation_hash: Hash256,
    state_root_hash: Option<Hash256>,
    hash: Hash256,
    pub(crate) bytes_length: OnceLock<usize>,
}

impl Block {
    /// Assemble a block from its raw ingredients, deriving everything else.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: i64,
        difficulty: i64,
        total_difficulty: U256,
        nonce: Vec<u8>,
        miner: Option<Address>,
        previous_hash: Option<Hash256>,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        state_root_hash: Option<Hash256>,
    ) -> Block {
        let tx_hash = compute_tx_hash(&transactions);
        let mut block = Block {
            index,
            difficulty,
            total_difficulty,
            nonce,
            miner,
            previous_hash,
            timestamp: timestamp::truncate_to_micros(timestamp),
            transactions,
            tx_hash,
            pre_evaluation_hash: [0u8; 32],
            state_root_hash,
            hash: [0u8; 32],
            bytes_length: OnceLock::new(),
        };
        block.pre_evaluation_hash = Sha256::digest(block.serialize_for_hash(None)).into();
        block.transactions =
            order_for_evaluation(std::mem::take(&mut block.transactions), &block.pre_evaluation_hash);
        block.hash = Sha256::digest(
            block.serialize_for_hash(block.state_root_hash.as_ref()),
        )
        .into();
        block
    }

    /// Re-wrap with a freshly computed state root. The pre-evaluation hash
    /// and transaction order are unchanged; only the final hash moves.
    pub fn with_state_root_hash(&self, state_root_hash: Hash256) -> Block {
        Block::new(
            self.index,
            self.difficulty,
            self.total_difficulty,
            self.nonce.clone(),
            self.miner,
            self.previous_hash,
            self.timestamp,
            self.transactions.clone(),
            Some(state_root_hash),
        )
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn difficulty(&self) -> i64 {
        self.difficulty
    }

    pub fn total_difficulty(&self) -> U256 {
        self.total_difficulty
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn miner(&self) -> Option<Address> {
        self.miner
    }

    pub fn previous_hash(&self) -> Option<Hash256> {
        self.previous_hash
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Transactions in the canonical evaluation order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn tx_hash(&self) -> Option<Hash256> {
        self.tx_hash
    }

    pub fn pre_evaluation_hash(&self) -> Hash256 {
        self.pre_evaluation_hash
    }

    pub fn state_root_hash(&self) -> Option<Hash256> {
        self.state_root_hash
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// Canonical bytes whose SHA-256 is the block hash for the given state
    /// root (pre-evaluation hash when `None`).
    pub fn serialize_for_hash(&self, state_root_hash: Option<&Hash256>) -> Vec<u8> {
        self.base_header(state_root_hash).hash_input()
    }

    /// Project this block into its flat header record.
    pub fn header(&self) -> BlockHeader {
        let mut header = self.base_header(self.state_root_hash.as_ref());
        header.hash = self.hash.to_vec();
        header.pre_evaluation_hash = self.pre_evaluation_hash.to_vec();
        header
    }

    fn base_header(&self, state_root_hash: Option<&Hash256>) -> BlockHeader {
        BlockHeader {
            index: self.index,
            timestamp: timestamp::format(&self.timestamp),
            nonce: self.nonce.clone(),
            miner: self.miner.map(|m| m.to_vec()).unwrap_or_default(),
            difficulty: self.difficulty,
            total_difficulty: self.total_difficulty,
            previous_hash: self.previous_hash.map(|h| h.to_vec()).unwrap_or_default(),
            tx_hash: self.tx_hash.map(|h| h.to_vec()).unwrap_or_default(),
            hash: Vec::new(),
            pre_evaluation_hash: Vec::new(),
            state_root_hash: state_root_hash.map(|h| h.to_vec()).unwrap_or_default(),
        }
    }

    /// Full structural validation: header rules, every transaction's own
    /// validation, and agreement of all derived values.
    pub fn validate(&self, current_time: DateTime<Utc>) -> Result<(), CoreError> {
        self.header().validate(current_time)?;
        for tx in &self.transactions {
            tx.validate()?;
        }
        let recomputed_tx_hash = compute_tx_hash(&self.transactions);
        if recomputed_tx_hash != self.tx_hash {
            return Err(CoreError::InvalidBlockTxHash {
                stored: hex_or_absent(self.tx_hash.as_ref()),
                computed: hex_or_absent(recomputed_tx_hash.as_ref()),
            });
        }
        let recomputed_hash: Hash256 = Sha256::digest(
            self.serialize_for_hash(self.state_root_hash.as_ref()),
        )
        .into();
        if recomputed_hash != self.hash {
            return Err(CoreError::InvalidBlockHash {
                stored: hex::encode(self.hash),
                computed: hex::encode(recomputed_hash),
            });
        }
        let canonical =
            order_for_evaluation(self.transactions.clone(), &self.pre_evaluation_hash);
        if canonical.iter().map(Transaction::id).ne(self.transactions.iter().map(Transaction::id))
        {
            return Err(CoreError::InvalidBlockTxOrder);
        }
        Ok(())
    }

    /// Lazily evaluate every action of every transaction, in order.
    ///
    /// Each transaction starts from the states left behind by the previous
    /// one; each action within a transaction starts from the delta of the
    /// one before it. Fails up front when there is no miner to credit.
    pub fn evaluate_actions_per_tx(
        &self,
        state_getter: Option<StateGetter>,
        balance_getter: Option<BalanceGetter>,
        previous_states_trie: Option<Arc<dyn StateTrie>>,
    ) -> Result<BlockEvaluation<'_>, CoreError> {
        let miner = self.miner.ok_or(CoreError::MissingMiner)?;
        Ok(BlockEvaluation {
            block: self,
            miner,
            state_getter: state_getter.unwrap_or_else(null_state_getter),
            balance_getter: balance_getter.unwrap_or_else(zero_balance_getter),
            trie: previous_states_trie,
            next_tx: 0,
            current: None,
            last_output: None,
            done: false,
        })
    }

    /// Validate, run every action, and enforce each transaction's declared
    /// updated-address set. Returns the flat evaluation sequence.
    pub fn evaluate(
        &self,
        current_time: DateTime<Utc>,
        state_getter: Option<StateGetter>,
        balance_getter: Option<BalanceGetter>,
        previous_states_trie: Option<Arc<dyn StateTrie>>,
    ) -> Result<Vec<ActionEvaluation>, CoreError> {
        self.validate(current_time)?;
        let mut evaluations = Vec::new();
        let mut current: Option<(&Transaction, AccountStateDelta)> = None;
        for item in self.evaluate_actions_per_tx(state_getter, balance_getter, previous_states_trie)? {
            let (tx, evaluation) = item?;
            if let Some((previous, delta)) = current.take() {
                if previous.id() != tx.id() {
                    check_updated_addresses(previous, &delta)?;
                }
            }
            current = Some((tx, evaluation.output_states.clone()));
            evaluations.push(evaluation);
        }
        if let Some((tx, delta)) = current {
            check_updated_addresses(tx, &delta)?;
        }
        Ok(evaluations)
    }
}

fn check_updated_addresses(tx: &Transaction, last: &AccountStateDelta) -> Result<(), CoreError> {
    let excess: Vec<String> = last
        .updated_addresses()
        .difference(tx.updated_addresses())
        .map(hex::encode)
        .collect();
    if excess.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidTxUpdatedAddresses { excess })
    }
}

fn hex_or_absent(hash: Option<&Hash256>) -> String {
    hash.map(hex::encode).unwrap_or_else(|| "absent".into())
}

/// Transaction fingerprint: SHA-256 of the canonical list of signed
/// transaction values, id-sorted; absent for an empty block.
fn compute_tx_hash(transactions: &[Transaction]) -> Option<Hash256> {
    if transactions.is_empty() {
        return None;
    }
    let list = Value::List(
        id_sorted(transactions)
            .into_iter()
            .map(|tx| tx.to_canonical_value(true))
            .collect(),
    );
    Some(Sha256::digest(encode(&list)).into())
}

pub(crate) fn id_sorted(transactions: &[Transaction]) -> Vec<&Transaction> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|tx| tx.id());
    sorted
}

/// The deterministic-but-unpredictable evaluation order: signers sort by
/// their XOR-flattened transaction ids mixed with the pre-evaluation hash,
/// and each signer's transactions sort by nonce.
fn order_for_evaluation(
    mut transactions: Vec<Transaction>,
    pre_evaluation_hash: &Hash256,
) -> Vec<Transaction> {
    // Id-sort first so every downstream tie resolves the same way
    // regardless of input order.
    transactions.sort_by_key(Transaction::id);
    let mix = U256::from_big_endian(pre_evaluation_hash);
    let mut groups: BTreeMap<Address, Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        groups.entry(tx.signer()).or_default().push(tx);
    }
    let mut keyed: Vec<(U256, Address, Vec<Transaction>)> = groups
        .into_iter()
        .map(|(signer, group)| {
            let flattened = group
                .iter()
                .fold(U256::zero(), |acc, tx| acc ^ U256::from_big_endian(&tx.id()));
            (flattened ^ mix, signer, group)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let mut ordered = Vec::new();
    for (_, _, mut group) in keyed {
        group.sort_by_key(Transaction::nonce);
        ordered.append(&mut group);
    }
    ordered
}

/// Lazy per-transaction action stream; see `Block::evaluate_actions_per_tx`.
pub struct BlockEvaluation<'a> {
    block: &'a Block,
    miner: Address,
    state_getter: StateGetter,
    balance_getter: BalanceGetter,
    trie: Option<Arc<dyn StateTrie>>,
    next_tx: usize,
    current: Option<(
        usize,
        Box<dyn Iterator<Item = Result<ActionEvaluation, CoreError>> + 'a>,
    )>,
    last_output: Option<AccountStateDelta>,
    done: bool,
}

impl<'a> Iterator for BlockEvaluation<'a> {
    type Item = Result<(&'a Transaction, ActionEvaluation), CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some((tx_index, evaluations)) = self.current.as_mut() {
                match evaluations.next() {
                    Some(Ok(evaluation)) => {
                        self.last_output = Some(evaluation.output_states.clone());
                        let tx = &self.block.transactions[*tx_index];
                        return Some(Ok((tx, evaluation)));
                    }
                    Some(Err(error)) => {
                        self.done = true;
                        return Some(Err(error));
                    }
                    None => {
                        // Transaction finished: whatever it left behind is
                        // the base state for the next one.
                        if let Some(delta) = self.last_output.take() {
                            self.state_getter = delta.to_state_getter();
                            self.balance_getter = delta.to_balance_getter();
                        }
                        self.current = None;
                    }
                }
            }
            if self.current.is_none() {
                if self.next_tx >= self.block.transactions.len() {
                    return None;
                }
                let tx_index = self.next_tx;
                self.next_tx += 1;
                let tx = &self.block.transactions[tx_index];
                let delta = AccountStateDelta::new(
                    self.state_getter.clone(),
                    self.balance_getter.clone(),
                    tx.signer(),
                );
                let evaluations = tx.evaluate_actions_gradually(
                    self.block.pre_evaluation_hash,
                    self.block.index,
                    delta,
                    self.miner,
                    self.trie.clone(),
                );
                self.current = Some((tx_index, Box::new(evaluations)));
            }
        }
    }
}

impl Clone for Block {
    fn clone(&self) -> Self {
        Block {
            index: self.index,
            difficulty: self.difficulty,
            total_difficulty: self.total_difficulty,
            nonce: self.nonce.clone(),
            miner: self.miner,
            previous_hash: self.previous_hash,
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
            tx_hash: self.tx_hash,
            pre_evaluation_hash: self.pre_evaluation_hash,
            state_root_hash: self.state_root_hash,
            hash: self.hash,
            bytes_length: self.bytes_length.clone(),
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.difficulty == other.difficulty
            && self.total_difficulty == other.total_difficulty
            && self.nonce == other.nonce
            && self.miner == other.miner
            && self.previous_hash == other.previous_hash
            && self.timestamp == other.timestamp
            && self.transactions == other.transactions
            && self.tx_hash == other.tx_hash
            && self.pre_evaluation_hash == other.pre_evaluation_hash
            && self.state_root_hash == other.state_root_hash
            && self.hash == other.hash
    }
}

impl Eq for Block {}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.index)
            .field("hash", &hex::encode(self.hash))
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block #{} [{}]", self.index, hex::encode(self.hash))
    }
}
