use crate::crypto::double_hash;
use crate::pow::{check_proof_of_work, target, with_nonce, Cancellation, PowError};
use crate::{Block, Hash};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Mines `block` in place: commits the merkle root, searches the nonce space in
/// parallel until the header hash meets `header.difficulty`, then finalizes.
///
/// On error the block's nonce and hash are left untouched.
pub fn mine_block(block: &mut Block, cancel: &Cancellation) -> Result<Hash, PowError> {
    let difficulty = block.header.difficulty;
    if target(difficulty) == 0 {
        return Err(PowError::UnreachableDifficulty(difficulty));
    }
    block.header.merkle_root = block.compute_merkle_root();
    let prefix = block.header.hash_bytes_without_nonce();
    let attempts = AtomicU64::new(0);
    let stopped = AtomicBool::new(false);
    let meets =
        |nonce: u32| check_proof_of_work(&double_hash(&with_nonce(&prefix, nonce)), difficulty);

    // Rayon splits the range across threads. Cancellation is sticky, so once a
    // worker observes it every worker short-circuits.
    let found = (0..=u32::MAX).into_par_iter().find_any(|nonce| {
        if cancel.is_cancelled() {
            stopped.store(true, Ordering::Relaxed);
            return true;
        }
        attempts.fetch_add(1, Ordering::Relaxed);
        meets(*nonce)
    });

    let attempts = attempts.into_inner();
    let nonce = settle(found, stopped.into_inner(), attempts, difficulty, meets)?;

    block.header.nonce = nonce;
    block.finalize();
    info!(
        height = block.height,
        nonce,
        attempts,
        hash = %hex::encode(block.hash()),
        "mined block"
    );
    Ok(block.hash())
}

/// Decides the outcome of a search. A nonce survives a cancellation only if it
/// was actually hashed and meets the target.
fn settle(
    found: Option<u32>,
    stopped: bool,
    attempts: u64,
    difficulty: u32,
    meets: impl Fn(u32) -> bool,
) -> Result<u32, PowError> {
    match found {
        Some(nonce) if !stopped => Ok(nonce),
        Some(nonce) if attempts > 0 && meets(nonce) => Ok(nonce),
        _ if stopped => Err(PowError::Cancelled { attempts }),
        _ => Err(PowError::NonceSpaceExhausted(difficulty)),
    }
}
