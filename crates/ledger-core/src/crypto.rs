//! Hashing, P-256 ECDSA keys and the Merkle commitment used by the ledger.
//!
//! Public keys travel as SEC1 uncompressed points (65 bytes, `0x04` prefix);
//! that one encoding is used for hashing, signing and address derivation.

use crate::constants::{ADDRESS_SIZE, PUBLIC_KEY_SIZE};
use crate::Hash;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub type Address = [u8; ADDRESS_SIZE];

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// SHA-256 applied twice. Used for all content hashing.
pub fn double_hash(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

/// Generates a fresh P-256 key pair from the OS entropy source.
pub fn generate_key_pair() -> Result<(PrivateKey, PublicKey), KeyError> {
    let mut seed = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| KeyError::Generation(e.to_string()))?;
    // A seed outside [1, n) is astronomically unlikely; surface it rather than loop.
    let private = PrivateKey::from_bytes(&seed)
        .map_err(|e| KeyError::Generation(format!("rejected scalar: {e}")))?;
    let public = private.public_key();
    Ok((private, public))
}

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key =
            SigningKey::from_slice(bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes().into()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.key.verifying_key().clone(),
        }
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PublicKey {
    /// Parses a SEC1 uncompressed point. Compressed or truncated encodings are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_KEY_SIZE || bytes[0] != 0x04 {
            return Err(KeyError::InvalidKey(format!(
                "public key must be {PUBLIC_KEY_SIZE} bytes uncompressed, got {} bytes",
                bytes.len()
            )));
        }
        let key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.key.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn address(&self) -> Address {
        address_from_public_key(self)
    }
}

/// DER-encoded ECDSA signature over `message` (RFC 6979 nonces, SHA-256 prehash).
pub fn sign(private: &PrivateKey, message: &[u8]) -> Result<Vec<u8>, KeyError> {
    let signature: Signature = private
        .key
        .try_sign(message)
        .map_err(|e| KeyError::Signing(e.to_string()))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// True iff `signature` is a valid DER signature of `message` under `public`.
/// Malformed signatures yield `false`.
pub fn verify(public: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    match Signature::from_der(signature) {
        Ok(sig) => public.key.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}

/// First 20 bytes of SHA-256 over the uncompressed point encoding.
pub fn address_from_public_key(public: &PublicKey) -> Address {
    let digest = Sha256::digest(public.to_bytes());
    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&digest[..ADDRESS_SIZE]);
    address
}

/// Binary Merkle root over `hashes`; odd levels duplicate their last node and
/// pairs combine as `double_hash(left ++ right)`.
///
/// At least one pairing round always runs, so a single hash is combined with
/// itself. An empty input yields `double_hash(&[])`, not the zero hash.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return double_hash(&[]);
    }
    let mut level: Vec<Hash> = hashes.to_vec();
    loop {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (pair[0], pair[1])
            } else {
                (pair[0], pair[0])
            };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&a);
            buf[32..].copy_from_slice(&b);
            next.push(double_hash(&buf));
        }
        level = next;
        if level.len() == 1 {
            return level[0];
        }
    }
}
