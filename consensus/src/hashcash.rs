// Hashcash: SHA-256 proof-of-work search
use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};

use lodestone_core::{satisfies_difficulty, Hash256};

use crate::error::ConsensusError;

/// SHA-256 of a byte buffer.
pub fn hash(bytes: &[u8]) -> Hash256 {
    Sha256::digest(bytes).into()
}

/// Search for the shortest nonce whose stamped hash beats the difficulty.
///
/// Nonces are tried in length order starting from the empty nonce; within
/// a length the nonce counts up as a big-endian unsigned integer from
/// zero. The cancel flag is polled on every attempt; cancellation aborts
/// with no partial result. Difficulty zero or below is satisfied by the
/// empty nonce without stamping anything.
pub fn answer<F>(
    mut stamp: F,
    difficulty: i64,
    cancel: &AtomicBool,
) -> Result<Vec<u8>, ConsensusError>
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    if difficulty <= 0 {
        return Ok(Vec::new());
    }
    let mut nonce: Vec<u8> = Vec::new();
    let mut attempts: u64 = 0;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(ConsensusError::Cancelled);
        }
        if satisfies_difficulty(&hash(&stamp(&nonce)), difficulty) {
            return Ok(nonce);
        }
        attempts += 1;
        if attempts % 65_536 == 0 {
            tracing::debug!(attempts, difficulty, nonce_len = nonce.len(), "still searching");
        }
        if !increment(&mut nonce) {
            let next_len = nonce.len() + 1;
            nonce.clear();
            nonce.resize(next_len, 0);
        }
    }
}

/// Big-endian increment; false on overflow of the current width.
fn increment(nonce: &mut [u8]) -> bool {
    for byte in nonce.iter_mut().rev() {
        if *byte == u8::MAX {
            *byte = 0;
        } else {
            *byte += 1;
            return true;
        }
    }
    false
}
