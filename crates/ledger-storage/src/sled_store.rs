use anyhow::{anyhow, Context};
use ledger_core::{Block, BlockStore, Hash, StoreError};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const TREE_HASH_INDEX: &str = "hash_index";

/// Block records keyed by big-endian height (so iteration order is height
/// order), plus a hash -> height secondary index updated in the same
/// transaction.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  hash_index: Tree,
}

fn height_key(height: u64) -> [u8; 8] {
  height.to_be_bytes()
}

fn decode_height(key: &[u8]) -> Result<u64, StoreError> {
  let arr: [u8; 8] = key.try_into().map_err(|_| StoreError::Corrupt {
    key: hex::encode(key),
    reason: format!("height key is {} bytes", key.len()),
  })?;
  Ok(u64::from_be_bytes(arr))
}

fn decode_block(key: &str, bytes: &IVec) -> Result<Block, StoreError> {
  bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt {
    key: key.to_string(),
    reason: e.to_string(),
  })
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled db at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    let hash_index = db.open_tree(TREE_HASH_INDEX)?;
    let store = Self {
      db,
      blocks,
      hash_index,
    };
    if store.hash_index.is_empty() && !store.blocks.is_empty() {
      store.reindex()?;
    }
    info!(path = %path.display(), blocks = store.blocks.len(), "sled store opened");
    Ok(store)
  }

  /// Rebuilds the hash index from the block records. Returns the number of
  /// blocks indexed.
  pub fn reindex(&self) -> Result<usize, StoreError> {
    self.hash_index.clear().map_err(backend)?;
    let mut count = 0;
    for entry in self.blocks.iter() {
      let (key, value) = entry.map_err(backend)?;
      let height = decode_height(&key)?;
      let block = decode_block(&format!("height {height}"), &value)?;
      self
        .hash_index
        .insert(block.hash(), key.clone())
        .map_err(backend)?;
      count += 1;
    }
    self.hash_index.flush().map_err(backend)?;
    info!(count, "hash index rebuilt");
    Ok(count)
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  pub fn flush(&self) -> Result<(), StoreError> {
    self.db.flush().map_err(backend)?;
    Ok(())
  }

  /// Drops every record. Used by tests and tooling to reset a data dir.
  pub fn clear(&self) -> Result<(), StoreError> {
    self.blocks.clear().map_err(backend)?;
    self.hash_index.clear().map_err(backend)?;
    self.flush()
  }
}

fn backend(e: sled::Error) -> StoreError {
  StoreError::Backend(e.into())
}

impl BlockStore for SledStore {
  fn save_block(&self, block: &Block) -> Result<(), StoreError> {
    let key = height_key(block.height);
    let hash = block.hash();
    let bytes = bincode::serialize(block).map_err(|e| StoreError::Backend(e.into()))?;

    (&self.blocks, &self.hash_index)
      .transaction(|(blocks, index)| {
        if let Some(old) = blocks.insert(&key[..], bytes.as_slice())? {
          // Overwriting a height must not leave the old hash resolvable.
          if let Ok(old) = bincode::deserialize::<Block>(&old) {
            index.remove(&old.hash()[..])?;
          }
        }
        index.insert(&hash[..], &key[..])?;
        Ok::<(), ConflictableTransactionError<()>>(())
      })
      .map_err(|e: TransactionError<()>| {
        StoreError::Backend(anyhow!("save_block at height {}: {e:?}", block.height))
      })?;

    self.db.flush().map_err(backend)?;
    debug!(height = block.height, hash = %hex::encode(hash), "block saved");
    Ok(())
  }

  fn get_block(&self, height: u64) -> Result<Block, StoreError> {
    let key = format!("height {height}");
    match self.blocks.get(height_key(height)).map_err(backend)? {
      Some(bytes) => decode_block(&key, &bytes),
      None => Err(StoreError::NotFound(format!("block at {key}"))),
    }
  }

  fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StoreError> {
    let height = match self.hash_index.get(hash).map_err(backend)? {
      Some(key) => decode_height(&key)?,
      None => {
        return Err(StoreError::NotFound(format!(
          "block with hash {}",
          hex::encode(hash)
        )))
      }
    };
    self.get_block(height)
  }

  fn get_latest_block(&self) -> Result<Block, StoreError> {
    match self.blocks.last().map_err(backend)? {
      Some((key, bytes)) => {
        let height = decode_height(&key)?;
        decode_block(&format!("height {height}"), &bytes)
      }
      None => Err(StoreError::NotFound("no blocks stored".into())),
    }
  }
}
