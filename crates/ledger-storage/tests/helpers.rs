#![allow(dead_code)]

use std::fs;

use ledger_core::crypto::generate_key_pair;
use ledger_core::{Block, Transaction, TransactionInput, TransactionOutput, ZERO_HASH};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn signed_tx(amount: u64) -> Transaction {
    let (private, public) = generate_key_pair().expect("keygen");
    let mut tx = Transaction::new(
        vec![TransactionInput::new([amount as u8; 32], 0, &public)],
        vec![TransactionOutput::new(amount, public.address())],
        0,
    );
    tx.sign_input(0, &private).expect("sign");
    tx
}

/// Hash-linked, finalized blocks 0..n. Not mined; the store does not check work.
pub fn linked_blocks(n: u64, txs_per_block: usize) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for height in 0..n {
        let prev = blocks.last().map(|b| b.hash()).unwrap_or(ZERO_HASH);
        let txs = (0..txs_per_block).map(|i| signed_tx(i as u64 + 1)).collect();
        let mut block = Block::new(height, prev, txs, 1);
        block.finalize();
        blocks.push(block);
    }
    blocks
}
