//! Proof-of-work with a one-byte target: a hash passes when its first byte is
//! strictly below `256 - difficulty`.
//!
//! The target is computed in `u16`, so difficulty 0 yields 256 (every hash
//! passes) and difficulty 256 or more yields 0 (no hash passes).

use crate::crypto::double_hash;
use crate::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowError {
    #[error("proof-of-work search cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
    #[error("difficulty {0} has an empty target; no hash can satisfy it")]
    UnreachableDifficulty(u32),
    #[error("nonce space exhausted at difficulty {0}")]
    NonceSpaceExhausted(u32),
}

pub fn target(difficulty: u32) -> u16 {
    256u32.saturating_sub(difficulty) as u16
}

pub fn check_proof_of_work(hash: &Hash, difficulty: u32) -> bool {
    u16::from(hash[0]) < target(difficulty)
}

/// Cooperative stop signal for the nonce search: an explicit flag, an optional
/// deadline, or both. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Preimage for one attempt: the header bytes without nonce, followed by the
/// little-endian nonce.
pub(crate) fn with_nonce(prefix: &[u8], nonce: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(prefix.len() + 4);
    bytes.extend_from_slice(prefix);
    bytes.extend_from_slice(&nonce.to_le_bytes());
    bytes
}

/// Brute-force search from nonce 0 upward until the double hash of
/// `prefix ++ nonce` satisfies `difficulty`, or `cancel` fires.
pub fn find_proof_of_work(
    header_without_nonce: &[u8],
    difficulty: u32,
    cancel: &Cancellation,
) -> Result<(u32, Hash), PowError> {
    if target(difficulty) == 0 {
        return Err(PowError::UnreachableDifficulty(difficulty));
    }
    let mut bytes = with_nonce(header_without_nonce, 0);
    let nonce_at = header_without_nonce.len();
    let mut attempts = 0u64;
    for nonce in 0..=u32::MAX {
        if cancel.is_cancelled() {
            return Err(PowError::Cancelled { attempts });
        }
        bytes[nonce_at..].copy_from_slice(&nonce.to_le_bytes());
        let hash = double_hash(&bytes);
        attempts += 1;
        if check_proof_of_work(&hash, difficulty) {
            return Ok((nonce, hash));
        }
    }
    Err(PowError::NonceSpaceExhausted(difficulty))
}
