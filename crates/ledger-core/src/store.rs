//! Persistence port consumed by [`crate::Chain`], plus an in-memory adapter.
//!
//! The trait lives in `ledger-core` so storage crates can implement it
//! without a circular dependency.

use crate::{Block, Hash};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Keyed block storage. Blocks are keyed by height; `save_block` must make
/// the block visible to every subsequent read.
pub trait BlockStore: Send + Sync {
    fn save_block(&self, block: &Block) -> Result<(), StoreError>;
    fn get_block(&self, height: u64) -> Result<Block, StoreError>;
    fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StoreError>;
    fn get_latest_block(&self) -> Result<Block, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    blocks: BTreeMap<u64, Block>,
    by_hash: HashMap<Hash, u64>,
}

/// Volatile store for tests and ephemeral chains.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().blocks.is_empty()
    }
}

impl BlockStore for MemoryStore {
    fn save_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(old) = inner.blocks.insert(block.height, block.clone()) {
            inner.by_hash.remove(&old.hash());
        }
        inner.by_hash.insert(block.hash(), block.height);
        Ok(())
    }

    fn get_block(&self, height: u64) -> Result<Block, StoreError> {
        self.inner
            .read()
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("block at height {height}")))
    }

    fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StoreError> {
        let inner = self.inner.read();
        inner
            .by_hash
            .get(hash)
            .and_then(|h| inner.blocks.get(h))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("block with hash {}", hex::encode(hash))))
    }

    fn get_latest_block(&self) -> Result<Block, StoreError> {
        self.inner
            .read()
            .blocks
            .last_key_value()
            .map(|(_, b)| b.clone())
            .ok_or_else(|| StoreError::NotFound("no blocks stored".into()))
    }
}
