// Account state overlays threaded through action evaluation
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::Value;
use crate::Address;

/// Resolves an account's state; `None` means the account has no state yet.
pub type StateGetter = Arc<dyn Fn(&Address) -> Option<Value> + Send + Sync>;

/// Resolves an account's balance in a currency.
pub type BalanceGetter = Arc<dyn Fn(&Address, &Currency) -> u64 + Send + Sync>;

/// Default state getter: every account is absent.
pub fn null_state_getter() -> StateGetter {
    Arc::new(|_| None)
}

/// Default balance getter: every balance is the currency's zero.
pub fn zero_balance_getter() -> BalanceGetter {
    Arc::new(|_, _| 0)
}

/// A balance denomination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub ticker: String,
    pub decimals: u8,
}

/// Abstract contract for the state trie of the previous block.
///
/// The block core never walks the trie itself; it only hands the reference
/// through to actions.
pub trait StateTrie: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// Functional overlay over base state/balance getters.
///
/// Reads fall through to the base getters unless an update shadows them;
/// updates produce a new delta, never mutate. Cloning is cheap enough to
/// thread a delta from one action to the next.
#[derive(Clone)]
pub struct AccountStateDelta {
    state_getter: StateGetter,
    balance_getter: BalanceGetter,
    signer: Address,
    updated_states: BTreeMap<Address, Value>,
    updated_balances: BTreeMap<(Address, Currency), u64>,
}

impl AccountStateDelta {
    pub fn new(state_getter: StateGetter, balance_getter: BalanceGetter, signer: Address) -> Self {
        Self {
            state_getter,
            balance_getter,
            signer,
            updated_states: BTreeMap::new(),
            updated_balances: BTreeMap::new(),
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn get_state(&self, address: &Address) -> Option<Value> {
        self.updated_states
            .get(address)
            .cloned()
            .or_else(|| (self.state_getter)(address))
    }

    pub fn set_state(&self, address: Address, state: Value) -> Self {
        let mut next = self.clone();
        next.updated_states.insert(address, state);
        next
    }

    pub fn get_balance(&self, address: &Address, currency: &Currency) -> u64 {
        self.updated_balances
            .get(&(*address, currency.clone()))
            .copied()
            .unwrap_or_else(|| (self.balance_getter)(address, currency))
    }

    pub fn set_balance(&self, address: Address, currency: Currency, amount: u64) -> Self {
        let mut next = self.clone();
        next.updated_balances.insert((address, currency), amount);
        next
    }

    /// Every address this delta has written a state or balance for.
    pub fn updated_addresses(&self) -> BTreeSet<Address> {
        self.updated_states
            .keys()
            .copied()
            .chain(self.updated_balances.keys().map(|(address, _)| *address))
            .collect()
    }

    pub fn updated_states(&self) -> &BTreeMap<Address, Value> {
        &self.updated_states
    }

    pub fn updated_balances(&self) -> &BTreeMap<(Address, Currency), u64> {
        &self.updated_balances
    }

    /// Freeze this delta into the state getter for a successor delta.
    pub fn to_state_getter(&self) -> StateGetter {
        let snapshot = self.clone();
        Arc::new(move |address| snapshot.get_state(address))
    }

    /// Freeze this delta into the balance getter for a successor delta.
    pub fn to_balance_getter(&self) -> BalanceGetter {
        let snapshot = self.clone();
        Arc::new(move |address, currency| snapshot.get_balance(address, currency))
    }
}

impl fmt::Debug for AccountStateDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountStateDelta")
            .field("signer", &hex::encode(self.signer))
            .field("updated_states", &self.updated_states)
            .field("updated_balances", &self.updated_balances)
            .finish_non_exhaustive()
    }
}
