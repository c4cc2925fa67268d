// Property tests over block construction and the wire round-trip.
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use primitive_types::U256;
use proptest::collection::vec;
use proptest::prelude::*;

use lodestone_core::{
    address_of, AccountStateDelta, Action, ActionContext, Block, CoreError, Transaction, Value,
};

#[derive(Debug)]
struct Payload(Vec<u8>);

impl Action for Payload {
    fn to_canonical_value(&self) -> Value {
        Value::bytes(self.0.clone())
    }

    fn execute(&self, context: ActionContext) -> Result<AccountStateDelta, CoreError> {
        Ok(context.previous_states)
    }
}

fn decode_payload(value: &Value) -> Result<Arc<dyn Action>, CoreError> {
    Ok(Arc::new(Payload(value.expect_bytes()?.to_vec())))
}

fn when() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

fn transaction(seed: u8, nonce: i64, payload: Vec<u8>) -> Transaction {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let signer = address_of(&key.verifying_key().to_bytes());
    Transaction::sign(
        &key,
        nonce,
        BTreeSet::from([signer]),
        vec![Arc::new(Payload(payload))],
        when(),
    )
}

prop_compose! {
    fn arb_transactions()(
        seeds in vec((1u8..=6, 0i64..4, vec(any::<u8>(), 0..8)), 0..6)
    ) -> Vec<Transaction> {
        seeds
            .into_iter()
            .map(|(seed, nonce, payload)| transaction(seed, nonce, payload))
            .collect()
    }
}

prop_compose! {
    fn arb_block()(
        txs in arb_transactions(),
        genesis in any::<bool>(),
        nonce in vec(any::<u8>(), 0..6),
        difficulty in 1i64..1_000_000,
        total in any::<u64>(),
        with_miner in any::<bool>(),
        with_root in any::<bool>(),
        micros in 0i64..1_000_000,
    ) -> Block {
        let (index, difficulty, previous_hash) = if genesis {
            (0, 0, None)
        } else {
            (1, difficulty, Some([0x42u8; 32]))
        };
        Block::new(
            index,
            difficulty,
            U256::from(total),
            nonce,
            with_miner.then_some([7u8; 20]),
            previous_hash,
            when() + chrono::Duration::microseconds(micros),
            txs,
            with_root.then_some([0x0fu8; 32]),
        )
    }
}

proptest! {
    #[test]
    fn prop_serialize_roundtrip(block in arb_block()) {
        let bytes = block.serialize();
        let revived = Block::deserialize(&bytes, &decode_payload).unwrap();
        prop_assert_eq!(&revived, &block);
        prop_assert_eq!(revived.bytes_length(), bytes.len());
    }

    #[test]
    fn prop_input_order_is_irrelevant(txs in arb_transactions(), rotation in 0usize..6) {
        let forward = Block::new(
            0, 0, U256::zero(), Vec::new(), Some([7u8; 20]), None, when(), txs.clone(), None,
        );
        let mut rotated = txs;
        if !rotated.is_empty() {
            let pivot = rotation % rotated.len();
            rotated.rotate_left(pivot);
        }
        let shuffled = Block::new(
            0, 0, U256::zero(), Vec::new(), Some([7u8; 20]), None, when(), rotated, None,
        );
        prop_assert_eq!(&shuffled, &forward);
        let forward_ids: Vec<_> = forward.transactions().iter().map(|tx| tx.id()).collect();
        let shuffled_ids: Vec<_> = shuffled.transactions().iter().map(|tx| tx.id()).collect();
        prop_assert_eq!(shuffled_ids, forward_ids);
    }

    #[test]
    fn prop_xor_flatten_is_order_independent(ids in vec(any::<[u8; 32]>(), 1..8)) {
        let forward = ids
            .iter()
            .fold(U256::zero(), |acc, id| acc ^ U256::from_big_endian(id));
        let mut reversed = ids;
        reversed.reverse();
        let backward = reversed
            .iter()
            .fold(U256::zero(), |acc, id| acc ^ U256::from_big_endian(id));
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn prop_mined_shape_validates(block in arb_block()) {
        // Construction is not mining, so only shape-level rules are
        // guaranteed; proof of work may legitimately fail for a random
        // nonce. Everything else must hold.
        match block.validate(block.timestamp()) {
            Ok(()) => {}
            Err(CoreError::InvalidBlockNonce { .. }) => {}
            Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
        }
    }
}
