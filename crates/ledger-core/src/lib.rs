pub mod chain;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod mine;
pub mod pow;
pub mod store;

use constants::{BLOCK_VERSION, HEADER_HASH_BYTES};
use crypto::{double_hash, KeyError, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use chain::Chain;
pub use error::{ChainError, ErrorKind, ValidationError};
pub use store::{BlockStore, MemoryStore, StoreError};

pub type Hash = [u8; 32];

pub const ZERO_HASH: Hash = [0u8; 32];

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Reference to a prior output plus the key and signature authorizing the spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prev_tx_hash: Hash,
    pub output_index: u32,
    /// SEC1 uncompressed public key.
    pub public_key: Vec<u8>,
    /// DER signature over the owning transaction's hash.
    pub signature: Vec<u8>,
}

impl TransactionInput {
    pub fn new(prev_tx_hash: Hash, output_index: u32, public_key: &PublicKey) -> Self {
        Self {
            prev_tx_hash,
            output_index,
            public_key: public_key.to_bytes(),
            signature: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: u64,
    /// Recipient address (20-byte public-key hash).
    pub recipient: Vec<u8>,
}

impl TransactionOutput {
    pub fn new(amount: u64, recipient: crypto::Address) -> Self {
        Self {
            amount,
            recipient: recipient.to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    /// Earliest admission time, Unix seconds.
    pub lock_time: u32,
    pub hash: Hash,
}

impl Transaction {
    pub fn new(
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        lock_time: u32,
    ) -> Self {
        let mut tx = Self {
            version: 1,
            inputs,
            outputs,
            lock_time,
            hash: ZERO_HASH,
        };
        tx.finalize();
        tx
    }

    /// Hash preimage. Signatures are left out because they sign this hash.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(&input.prev_tx_hash);
            bytes.extend_from_slice(&input.output_index.to_le_bytes());
            bytes.extend_from_slice(&(input.public_key.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&input.public_key);
        }
        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.to_le_bytes());
            bytes.extend_from_slice(&(output.recipient.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&output.recipient);
        }
        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }

    pub fn compute_hash(&self) -> Hash {
        double_hash(&self.hash_bytes())
    }

    pub fn finalize(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Signs input `index` over the transaction hash. The hash is refreshed
    /// first so the signature covers the current content.
    pub fn sign_input(&mut self, index: usize, key: &PrivateKey) -> Result<(), KeyError> {
        self.finalize();
        let signature = crypto::sign(key, &self.hash)?;
        let input = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| KeyError::Signing(format!("no input at index {index}")))?;
        input.signature = signature;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    /// Unix seconds.
    pub timestamp: u64,
    pub difficulty: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(previous_hash: Hash, difficulty: u32) -> Self {
        Self {
            version: BLOCK_VERSION,
            previous_hash,
            merkle_root: ZERO_HASH,
            timestamp: unix_now(),
            difficulty,
            nonce: 0,
        }
    }

    /// Fixed-width little-endian preimage of the block hash:
    /// version, previous hash, merkle root, timestamp, difficulty, nonce.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = self.hash_bytes_without_nonce();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Everything but the trailing nonce; the proof-of-work search appends it.
    pub fn hash_bytes_without_nonce(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_HASH_BYTES);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.previous_hash);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.difficulty.to_le_bytes());
        bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    hash: Hash,
    pub height: u64,
}

impl Block {
    /// An unfinalized block; call [`Block::finalize`] or mine it before admission.
    pub fn new(height: u64, previous_hash: Hash, txs: Vec<Transaction>, difficulty: u32) -> Self {
        Self::from_parts(BlockHeader::new(previous_hash, difficulty), txs, height)
    }

    pub fn from_parts(header: BlockHeader, txs: Vec<Transaction>, height: u64) -> Self {
        Self {
            header,
            txs,
            hash: ZERO_HASH,
            height,
        }
    }

    /// Declared hash, as set by the last [`Block::finalize`] (or as stored).
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn compute_hash(&self) -> Hash {
        double_hash(&self.header.hash_bytes())
    }

    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.txs.iter().map(|tx| tx.hash).collect()
    }

    pub fn compute_merkle_root(&self) -> Hash {
        crypto::merkle_root(&self.tx_hashes())
    }

    /// Sets the merkle root, then the hash (which covers the merkle root).
    pub fn finalize(&mut self) {
        self.header.merkle_root = self.compute_merkle_root();
        self.hash = self.compute_hash();
    }

    #[cfg(test)]
    pub(crate) fn set_declared_hash(&mut self, hash: Hash) {
        self.hash = hash;
    }
}
