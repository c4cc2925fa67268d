// Mining scenarios: correctness, input-order insensitivity, cancellation,
// and a loose statistical check on difficulty.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use primitive_types::U256;

use lodestone_consensus::{hashcash, mine, ConsensusError};
use lodestone_core::{
    address_of, AccountStateDelta, Action, ActionContext, CoreError, Transaction, Value,
};

#[derive(Debug)]
struct Noop;

impl Action for Noop {
    fn to_canonical_value(&self) -> Value {
        Value::bytes(*b"noop")
    }

    fn execute(&self, context: ActionContext) -> Result<AccountStateDelta, CoreError> {
        Ok(context.previous_states)
    }
}

fn when() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()
}

fn tx(seed: u8, nonce: i64) -> Transaction {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let signer = address_of(&key.verifying_key().to_bytes());
    Transaction::sign(&key, nonce, BTreeSet::from([signer]), vec![Arc::new(Noop)], when())
}

#[test]
fn test_mined_block_validates() {
    let cancel = AtomicBool::new(false);
    let block = mine(
        1,
        8,
        U256::zero(),
        Some([5u8; 20]),
        Some([1u8; 32]),
        when(),
        vec![tx(1, 0), tx(2, 0)],
        &cancel,
    )
    .unwrap();
    block.validate(block.timestamp()).unwrap();
    assert_eq!(block.index(), 1);
    assert_eq!(block.difficulty(), 8);
    assert_eq!(block.total_difficulty(), U256::from(8u64));
}

#[test]
fn test_mining_is_insensitive_to_input_order() {
    let txs = vec![tx(1, 0), tx(1, 1), tx(2, 0), tx(3, 0)];
    let mut reversed = txs.clone();
    reversed.reverse();
    let cancel = AtomicBool::new(false);
    let forward = mine(
        1,
        4,
        U256::zero(),
        Some([5u8; 20]),
        Some([1u8; 32]),
        when(),
        txs,
        &cancel,
    )
    .unwrap();
    let backward = mine(
        1,
        4,
        U256::zero(),
        Some([5u8; 20]),
        Some([1u8; 32]),
        when(),
        reversed,
        &cancel,
    )
    .unwrap();
    assert_eq!(forward.hash(), backward.hash());
    assert_eq!(
        forward.transactions().iter().map(|tx| tx.id()).collect::<Vec<_>>(),
        backward.transactions().iter().map(|tx| tx.id()).collect::<Vec<_>>(),
    );
}

#[test]
fn test_cancellation_aborts_mining() {
    let cancel = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&cancel);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.store(true, Ordering::Relaxed);
    });
    // 2^40 is far beyond what this test could grind through honestly.
    let result = mine(
        1,
        1i64 << 40,
        U256::zero(),
        Some([5u8; 20]),
        Some([1u8; 32]),
        when(),
        Vec::new(),
        &cancel,
    );
    handle.join().unwrap();
    assert!(matches!(result, Err(ConsensusError::Cancelled)));
}

#[test]
fn test_higher_difficulty_needs_more_attempts_on_average() {
    let attempts_for = |difficulty: i64| -> u64 {
        let mut total = 0u64;
        for seed in 0u8..16 {
            let mut attempts = 0u64;
            let cancel = AtomicBool::new(false);
            let nonce = hashcash::answer(
                |nonce| {
                    attempts += 1;
                    let mut bytes = vec![seed];
                    bytes.extend_from_slice(nonce);
                    bytes
                },
                difficulty,
                &cancel,
            )
            .unwrap();
            assert!(lodestone_core::satisfies_difficulty(
                &hashcash::hash(&{
                    let mut bytes = vec![seed];
                    bytes.extend_from_slice(&nonce);
                    bytes
                }),
                difficulty,
            ));
            total += attempts;
        }
        total
    };
    // Statistical, with a wide margin: expected ~32 total attempts at
    // difficulty 2 versus ~4096 at difficulty 256.
    assert!(attempts_for(256) > attempts_for(2));
}
