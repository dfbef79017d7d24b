//! The chain orchestrator: owns the tip, runs the admission pipeline and
//! serializes writers behind a reader/writer lock.

use crate::constants::{ADDRESS_SIZE, BLOCK_VERSION, GENESIS_DIFFICULTY};
use crate::crypto::{self, PublicKey};
use crate::error::{ChainError, ValidationError};
use crate::pow::check_proof_of_work;
use crate::store::{BlockStore, StoreError};
use crate::{unix_now, Block, BlockHeader, Hash, ZERO_HASH};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Height and hash of the most recently admitted block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tip {
    pub height: u64,
    pub hash: Hash,
}

/// Single-writer chain over a [`BlockStore`].
///
/// `add_block` holds the write lock for validation, persistence and the tip
/// update, so readers never see a half-advanced tip. Share it as `Arc<Chain<S>>`.
pub struct Chain<S: BlockStore> {
    store: Arc<S>,
    tip: RwLock<Option<Tip>>,
}

impl<S: BlockStore> Chain<S> {
    /// Restores the tip from the store's latest block, or creates and admits
    /// a genesis block when the store is empty. Stored history is trusted and
    /// not re-validated.
    pub fn open(store: Arc<S>) -> Result<Self, ChainError> {
        let chain = Self {
            store,
            tip: RwLock::new(None),
        };
        match chain.store.get_latest_block() {
            Ok(latest) => {
                let tip = Tip {
                    height: latest.height,
                    hash: latest.hash(),
                };
                info!(height = tip.height, hash = %hex::encode(tip.hash), "chain restored");
                *chain.tip.write() = Some(tip);
            }
            Err(StoreError::NotFound(_)) => {
                let tip = chain.add_block(genesis_block())?;
                info!(hash = %hex::encode(tip.hash), "genesis block created");
            }
            Err(e) => return Err(ChainError::store("get_latest_block", "tip", e)),
        }
        Ok(chain)
    }

    /// Validates, finalizes, persists and adopts `block` as the new tip.
    /// Any failure leaves both the store and the in-memory tip unchanged.
    pub fn add_block(&self, mut block: Block) -> Result<Tip, ChainError> {
        let mut tip = self.tip.write();
        if let Err(e) = self.validate_against(&block, *tip) {
            warn!(height = block.height, error = %e, "block rejected");
            return Err(e);
        }

        block.finalize();
        self.store.save_block(&block).map_err(|e| {
            ChainError::store("save_block", format!("height {}", block.height), e)
        })?;

        let next = Tip {
            height: block.height,
            hash: block.hash(),
        };
        *tip = Some(next);
        info!(
            height = next.height,
            hash = %hex::encode(next.hash),
            txs = block.txs.len(),
            "block added"
        );
        Ok(next)
    }

    /// Runs the admission pipeline against the current tip without admitting.
    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip.read();
        self.validate_against(block, *tip)
    }

    fn validate_against(&self, block: &Block, tip: Option<Tip>) -> Result<(), ChainError> {
        validate_structure(block)?;

        match tip {
            None => {
                if block.height != 0 {
                    return Err(ValidationError::InvalidGenesis(format!(
                        "empty chain expects height 0, got {}",
                        block.height
                    ))
                    .into());
                }
                if block.header.previous_hash != ZERO_HASH {
                    return Err(ValidationError::InvalidGenesis(
                        "genesis block must have zero previous hash".into(),
                    )
                    .into());
                }
            }
            Some(tip) => {
                let prev = self.store.get_block(tip.height).map_err(|e| {
                    ChainError::store("get_block", format!("height {}", tip.height), e)
                })?;
                let expected = prev.height + 1;
                if block.height != expected {
                    return Err(ValidationError::InvalidHeight {
                        expected,
                        actual: block.height,
                    }
                    .into());
                }
                if block.header.previous_hash != prev.hash() {
                    return Err(ValidationError::InvalidLink {
                        expected: hex::encode(prev.hash()),
                        actual: hex::encode(block.header.previous_hash),
                    }
                    .into());
                }
            }
        }
        debug!(height = block.height, "linkage ok");

        validate_commitments(block)?;

        // The genesis block is built locally with nonce 0 and is not mined.
        if tip.is_some() && !check_proof_of_work(&block.hash(), block.header.difficulty) {
            return Err(ValidationError::InsufficientWork {
                hash: hex::encode(block.hash()),
                difficulty: block.header.difficulty,
            }
            .into());
        }

        validate_signatures(block)?;
        debug!(height = block.height, "block valid");
        Ok(())
    }

    pub fn get_block(&self, height: u64) -> Result<Block, ChainError> {
        let _guard = self.tip.read();
        self.store
            .get_block(height)
            .map_err(|e| ChainError::store("get_block", format!("height {height}"), e))
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, ChainError> {
        let _guard = self.tip.read();
        self.store
            .get_block_by_hash(hash)
            .map_err(|e| ChainError::store("get_block_by_hash", hex::encode(hash), e))
    }

    pub fn get_latest_block(&self) -> Result<Block, ChainError> {
        let tip = self.tip.read();
        let height = tip.map(|t| t.height).ok_or_else(|| {
            ChainError::store(
                "get_latest_block",
                "tip",
                StoreError::NotFound("chain is empty".into()),
            )
        })?;
        self.store
            .get_block(height)
            .map_err(|e| ChainError::store("get_latest_block", format!("height {height}"), e))
    }

    /// In-memory height; 0 for both an empty chain and a genesis-only chain.
    pub fn height(&self) -> u64 {
        self.tip.read().map(|t| t.height).unwrap_or(0)
    }

    pub fn tip(&self) -> Option<Tip> {
        *self.tip.read()
    }

    pub fn is_empty(&self) -> bool {
        self.tip.read().is_none()
    }

    #[cfg(test)]
    fn uninitialized(store: Arc<S>) -> Self {
        Self {
            store,
            tip: RwLock::new(None),
        }
    }
}

fn validate_structure(block: &Block) -> Result<(), ValidationError> {
    for (i, tx) in block.txs.iter().enumerate() {
        for (j, out) in tx.outputs.iter().enumerate() {
            if out.recipient.len() != ADDRESS_SIZE {
                return Err(ValidationError::InvalidBlock(format!(
                    "transaction {i} output {j} recipient is {} bytes, want {ADDRESS_SIZE}",
                    out.recipient.len()
                )));
            }
        }
    }
    Ok(())
}

fn validate_commitments(block: &Block) -> Result<(), ValidationError> {
    let computed = block.compute_merkle_root();
    if block.header.merkle_root != computed {
        return Err(ValidationError::InvalidMerkleRoot {
            declared: hex::encode(block.header.merkle_root),
            computed: hex::encode(computed),
        });
    }
    if let Some(index) = block.txs.iter().position(|tx| tx.compute_hash() != tx.hash) {
        return Err(ValidationError::InvalidTransactionHash { index });
    }
    let computed = block.compute_hash();
    if block.hash() != computed {
        return Err(ValidationError::InvalidHash {
            declared: hex::encode(block.hash()),
            computed: hex::encode(computed),
        });
    }
    Ok(())
}

fn validate_signatures(block: &Block) -> Result<(), ValidationError> {
    for (i, tx) in block.txs.iter().enumerate() {
        for (j, input) in tx.inputs.iter().enumerate() {
            let key = PublicKey::from_bytes(&input.public_key).map_err(|source| {
                ValidationError::InvalidPublicKey {
                    tx: i,
                    input: j,
                    source,
                }
            })?;
            if !crypto::verify(&key, &tx.hash, &input.signature) {
                return Err(ValidationError::InvalidSignature { tx: i, input: j });
            }
        }
    }
    Ok(())
}

/// Height-0 block: zero previous hash, no transactions, current time, the
/// fixed genesis difficulty and nonce 0, finalized.
pub fn genesis_block() -> Block {
    let header = BlockHeader {
        version: BLOCK_VERSION,
        previous_hash: ZERO_HASH,
        merkle_root: ZERO_HASH,
        timestamp: unix_now(),
        difficulty: GENESIS_DIFFICULTY,
        nonce: 0,
    };
    let mut genesis = Block::from_parts(header, vec![], 0);
    genesis.finalize();
    genesis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{double_hash, generate_key_pair};
    use crate::error::ErrorKind;
    use crate::mine::mine_block;
    use crate::pow::Cancellation;
    use crate::store::MemoryStore;
    use crate::{Transaction, TransactionInput, TransactionOutput};

    fn open_chain() -> Chain<MemoryStore> {
        Chain::open(Arc::new(MemoryStore::new())).unwrap()
    }

    fn signed_tx(amount: u64) -> Transaction {
        let (private, public) = generate_key_pair().unwrap();
        let mut tx = Transaction::new(
            vec![TransactionInput::new([3u8; 32], 1, &public)],
            vec![TransactionOutput::new(amount, public.address())],
            0,
        );
        tx.sign_input(0, &private).unwrap();
        tx
    }

    fn child_of<S: BlockStore>(chain: &Chain<S>, txs: Vec<Transaction>) -> Block {
        let tip = chain.get_latest_block().unwrap();
        let mut block = Block::new(tip.height + 1, tip.hash(), txs, 1);
        mine_block(&mut block, &Cancellation::new()).unwrap();
        block
    }

    fn rejected_kind(err: &ChainError) -> ErrorKind {
        err.kind().expect("validation error")
    }

    #[test]
    fn open_creates_genesis() {
        let chain = open_chain();
        assert_eq!(chain.height(), 0);
        assert!(!chain.is_empty());
        let genesis = chain.get_latest_block().unwrap();
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.header.previous_hash, ZERO_HASH);
        assert_eq!(genesis.header.merkle_root, double_hash(&[]));
        assert_eq!(genesis.header.difficulty, GENESIS_DIFFICULTY);
        assert!(genesis.txs.is_empty());
        assert_eq!(chain.tip().unwrap().hash, genesis.hash());
        assert_eq!(genesis.hash(), genesis.compute_hash());
    }

    #[test]
    fn open_restores_tip_without_revalidating() {
        let store = Arc::new(MemoryStore::new());
        let first = Chain::open(store.clone()).unwrap();
        first.add_block(child_of(&first, vec![])).unwrap();

        // Not a valid successor, but stored history is trusted on load.
        let mut bogus = Block::new(2, [0xEE; 32], vec![], 1);
        bogus.finalize();
        store.save_block(&bogus).unwrap();

        let reopened = Chain::open(store).unwrap();
        assert_eq!(reopened.height(), 2);
        assert_eq!(reopened.tip().unwrap().hash, bogus.hash());
    }

    #[test]
    fn add_child_block() {
        let chain = open_chain();
        let genesis = chain.get_latest_block().unwrap();
        let child = child_of(&chain, vec![signed_tx(10), signed_tx(20), signed_tx(30)]);
        let tip = chain.add_block(child.clone()).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(tip.hash, child.hash());

        let saved = chain.get_block(1).unwrap();
        assert_eq!(saved.hash(), child.hash());
        assert_eq!(saved.header.previous_hash, genesis.hash());
        assert_eq!(chain.get_block_by_hash(&child.hash()).unwrap(), saved);
    }

    #[test]
    fn every_block_links_to_its_parent() {
        let chain = open_chain();
        for _ in 0..5 {
            let block = child_of(&chain, vec![signed_tx(1)]);
            chain.add_block(block).unwrap();
        }
        assert_eq!(chain.height(), 5);
        for h in 1..=5 {
            let block = chain.get_block(h).unwrap();
            let parent = chain.get_block(h - 1).unwrap();
            assert_eq!(block.header.previous_hash, parent.hash());
        }
    }

    #[test]
    fn resubmitted_block_is_rejected() {
        let chain = open_chain();
        let child = child_of(&chain, vec![]);
        chain.add_block(child.clone()).unwrap();
        let err = chain.add_block(child).unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InvalidHeight {
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(rejected_kind(&err), ErrorKind::Linkage);
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn zero_previous_hash_breaks_link() {
        let chain = open_chain();
        let mut block = Block::new(1, ZERO_HASH, vec![], 1);
        mine_block(&mut block, &Cancellation::new()).unwrap();
        let err = chain.add_block(block).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidLink { .. })));
        assert_eq!(rejected_kind(&err), ErrorKind::Linkage);
    }

    #[test]
    fn wrong_height_is_rejected_before_link() {
        let chain = open_chain();
        let mut block = Block::new(5, ZERO_HASH, vec![], 1);
        block.finalize();
        let err = chain.validate_block(&block).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidHeight { .. })));
    }

    #[test]
    fn merkle_mismatch_is_not_persisted() {
        let chain = open_chain();
        let mut block = child_of(&chain, vec![signed_tx(1), signed_tx(2)]);
        block.txs.pop();
        let err = chain.add_block(block).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidMerkleRoot { .. })));
        assert_eq!(rejected_kind(&err), ErrorKind::Commitment);
        assert_eq!(chain.height(), 0);
        assert!(chain.get_block(1).unwrap_err().is_not_found());
    }

    #[test]
    fn tampered_transaction_hash_is_rejected() {
        let chain = open_chain();
        let tip = chain.get_latest_block().unwrap();
        let mut tx = signed_tx(9);
        tx.outputs[0].amount = 9_000;
        let mut block = Block::new(1, tip.hash(), vec![tx], 1);
        mine_block(&mut block, &Cancellation::new()).unwrap();
        let err = chain.add_block(block).unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InvalidTransactionHash { index: 0 })
        ));
        assert_eq!(rejected_kind(&err), ErrorKind::Commitment);
    }

    #[test]
    fn declared_hash_mismatch_is_rejected() {
        let chain = open_chain();
        let mut block = child_of(&chain, vec![]);
        block.set_declared_hash([0u8; 32]);
        let err = chain.add_block(block).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidHash { .. })));

        let mut block = child_of(&chain, vec![]);
        block.header.nonce = block.header.nonce.wrapping_add(1);
        let err = chain.add_block(block).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidHash { .. })));
    }

    #[test]
    fn insufficient_work_is_rejected() {
        let chain = open_chain();
        let tip = chain.get_latest_block().unwrap();
        let mut block = Block::new(1, tip.hash(), vec![], 255);
        block.finalize();
        while block.hash()[0] == 0 {
            block.header.nonce += 1;
            block.finalize();
        }
        let err = chain.add_block(block).unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InsufficientWork { difficulty: 255, .. })
        ));
        assert_eq!(rejected_kind(&err), ErrorKind::ProofOfWork);
    }

    #[test]
    fn signature_for_other_message_is_rejected() {
        let chain = open_chain();
        let (private, public) = generate_key_pair().unwrap();
        let mut tx = Transaction::new(
            vec![TransactionInput::new([1u8; 32], 0, &public)],
            vec![TransactionOutput::new(5, public.address())],
            0,
        );
        tx.inputs[0].signature = crypto::sign(&private, b"some other message").unwrap();
        let err = chain.add_block(child_of(&chain, vec![tx])).unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InvalidSignature { tx: 0, input: 0 })
        ));
        assert_eq!(rejected_kind(&err), ErrorKind::Signature);
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn malformed_public_key_is_rejected() {
        let chain = open_chain();
        let mut tx = signed_tx(4);
        tx.inputs[0].public_key.truncate(33);
        tx.finalize();
        let err = chain.add_block(child_of(&chain, vec![tx])).unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::InvalidPublicKey { tx: 0, input: 0, .. })
        ));
        assert_eq!(rejected_kind(&err), ErrorKind::Signature);
    }

    #[test]
    fn malformed_recipient_is_structural() {
        let chain = open_chain();
        let mut tx = signed_tx(4);
        tx.outputs[0].recipient = vec![1, 2, 3];
        let err = chain.add_block(child_of(&chain, vec![tx])).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidBlock(_))));
        assert_eq!(rejected_kind(&err), ErrorKind::Structural);
    }

    #[test]
    fn empty_chain_requires_genesis_shape() {
        let chain = Chain::uninitialized(Arc::new(MemoryStore::new()));
        assert!(chain.is_empty());
        assert_eq!(chain.height(), 0);

        let mut wrong_height = Block::new(1, ZERO_HASH, vec![], 1);
        wrong_height.finalize();
        let err = chain.add_block(wrong_height).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidGenesis(_))));

        let mut wrong_prev = Block::new(0, [1u8; 32], vec![], 1);
        wrong_prev.finalize();
        let err = chain.add_block(wrong_prev).unwrap_err();
        assert!(matches!(err.validation(), Some(ValidationError::InvalidGenesis(_))));
        assert!(chain.is_empty());

        chain.add_block(genesis_block()).unwrap();
        assert!(!chain.is_empty());
    }

    #[test]
    fn empty_chain_has_no_latest_block() {
        let chain = Chain::uninitialized(Arc::new(MemoryStore::new()));
        assert!(chain.get_latest_block().unwrap_err().is_not_found());
    }

    #[test]
    fn genesis_block_is_finalized() {
        let genesis = genesis_block();
        let mut again = genesis.clone();
        again.finalize();
        assert_eq!(again, genesis);
        assert_eq!(genesis.header.nonce, 0);
    }

    struct FailingStore {
        inner: MemoryStore,
    }

    impl BlockStore for FailingStore {
        fn save_block(&self, block: &Block) -> Result<(), StoreError> {
            if block.height > 0 {
                return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
            }
            self.inner.save_block(block)
        }
        fn get_block(&self, height: u64) -> Result<Block, StoreError> {
            self.inner.get_block(height)
        }
        fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StoreError> {
            self.inner.get_block_by_hash(hash)
        }
        fn get_latest_block(&self) -> Result<Block, StoreError> {
            self.inner.get_latest_block()
        }
    }

    #[test]
    fn store_failure_leaves_tip_untouched() {
        let chain = Chain::open(Arc::new(FailingStore {
            inner: MemoryStore::new(),
        }))
        .unwrap();
        let before = chain.tip();
        let err = chain.add_block(child_of(&chain, vec![])).unwrap_err();
        match err {
            ChainError::Store { op, ref key, .. } => {
                assert_eq!(op, "save_block");
                assert_eq!(key, "height 1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(chain.tip(), before);
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn readers_never_see_a_torn_tip() {
        let chain = Arc::new(open_chain());
        let blocks: Vec<Block> = {
            // Pre-mine a run of blocks on a scratch chain sharing the same genesis.
            let scratch_store = MemoryStore::new();
            scratch_store.save_block(&chain.get_block(0).unwrap()).unwrap();
            let scratch = Chain::open(Arc::new(scratch_store)).unwrap();
            (0..10)
                .map(|_| {
                    let b = child_of(&scratch, vec![]);
                    scratch.add_block(b.clone()).unwrap();
                    b
                })
                .collect()
        };

        std::thread::scope(|s| {
            for _ in 0..4 {
                let chain = Arc::clone(&chain);
                s.spawn(move || {
                    for _ in 0..200 {
                        let tip = chain.tip().unwrap();
                        let stored = chain.get_block(tip.height).unwrap();
                        assert_eq!(stored.hash(), tip.hash);
                    }
                });
            }
            let writer = Arc::clone(&chain);
            s.spawn(move || {
                for b in blocks {
                    writer.add_block(b).unwrap();
                }
            });
        });
        assert_eq!(chain.height(), 10);
    }
}
