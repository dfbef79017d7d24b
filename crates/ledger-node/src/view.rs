use ledger_core::{Block, Transaction};
use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct Head {
    pub height: u64,
    pub hash: String,
}

#[derive(Serialize)]
pub(crate) struct TxView {
    pub hash: String,
    pub inputs: usize,
    pub outputs: usize,
    /// `None` when the output amounts overflow `u64`.
    pub total_out: Option<u64>,
    pub lock_time: u32,
}

impl From<&Transaction> for TxView {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: hex::encode(tx.hash),
            inputs: tx.inputs.len(),
            outputs: tx.outputs.len(),
            total_out: tx
                .outputs
                .iter()
                .try_fold(0u64, |acc, o| acc.checked_add(o.amount)),
            lock_time: tx.lock_time,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct BlockView {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub merkle_root: String,
    pub version: i32,
    pub timestamp: u64,
    pub difficulty: u32,
    pub nonce: u32,
    pub txs: Vec<TxView>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            height: block.height,
            hash: hex::encode(block.hash()),
            previous_hash: hex::encode(block.header.previous_hash),
            merkle_root: hex::encode(block.header.merkle_root),
            version: block.header.version,
            timestamp: block.header.timestamp,
            difficulty: block.header.difficulty,
            nonce: block.header.nonce,
            txs: block.txs.iter().map(TxView::from).collect(),
        }
    }
}

impl std::fmt::Display for BlockView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Block Height: {}", self.height)?;
        writeln!(f, "Block Hash: {}", self.hash)?;
        writeln!(f, "Previous Block Hash: {}", self.previous_hash)?;
        writeln!(f, "Merkle Root: {}", self.merkle_root)?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Difficulty: {}", self.difficulty)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(f, "Number of Transactions: {}", self.txs.len())
    }
}
