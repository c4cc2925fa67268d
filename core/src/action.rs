// Action capability surface driven by block evaluation
use std::fmt;
use std::sync::Arc;

use crate::codec::Value;
use crate::error::CoreError;
use crate::state::{AccountStateDelta, StateTrie};
use crate::{Address, Hash256};

/// Everything an action sees while it executes.
#[derive(Clone)]
pub struct ActionContext {
    pub signer: Address,
    pub miner: Address,
    pub block_index: i64,
    pub pre_evaluation_hash: Hash256,
    pub previous_states: AccountStateDelta,
    pub previous_states_trie: Option<Arc<dyn StateTrie>>,
}

/// The capability set the block core requires of an action: a canonical
/// serialization and a state transition.
pub trait Action: fmt::Debug + Send + Sync {
    fn to_canonical_value(&self) -> Value;

    /// Execute against `context.previous_states`, returning the resulting
    /// delta. The returned delta must be derived from the input delta so
    /// that writes accumulate across a transaction's actions.
    fn execute(&self, context: ActionContext) -> Result<AccountStateDelta, CoreError>;
}

/// Record of a single executed action.
#[derive(Debug, Clone)]
pub struct ActionEvaluation {
    pub action: Arc<dyn Action>,
    pub signer: Address,
    pub block_index: i64,
    pub output_states: AccountStateDelta,
}
