use crate::crypto::KeyError;
use crate::store::StoreError;
use thiserror::Error;

/// Coarse failure classes for block admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Linkage,
    Commitment,
    ProofOfWork,
    Signature,
}

/// One variant per rule of the admission pipeline. Rules run in order and the
/// first violation is returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("invalid genesis block: {0}")]
    InvalidGenesis(String),
    #[error("invalid block height: expected {expected}, got {actual}")]
    InvalidHeight { expected: u64, actual: u64 },
    #[error("invalid previous block hash: expected {expected}, got {actual}")]
    InvalidLink { expected: String, actual: String },
    #[error("invalid merkle root: declared {declared}, computed {computed}")]
    InvalidMerkleRoot { declared: String, computed: String },
    #[error("invalid hash for transaction {index}")]
    InvalidTransactionHash { index: usize },
    #[error("invalid block hash: declared {declared}, computed {computed}")]
    InvalidHash { declared: String, computed: String },
    #[error("proof of work not met: hash {hash} at difficulty {difficulty}")]
    InsufficientWork { hash: String, difficulty: u32 },
    #[error("invalid public key in transaction {tx} input {input}: {source}")]
    InvalidPublicKey {
        tx: usize,
        input: usize,
        #[source]
        source: KeyError,
    },
    #[error("invalid signature in transaction {tx} input {input}")]
    InvalidSignature { tx: usize, input: usize },
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidBlock(_) => ErrorKind::Structural,
            Self::InvalidGenesis(_) | Self::InvalidHeight { .. } | Self::InvalidLink { .. } => {
                ErrorKind::Linkage
            }
            Self::InvalidMerkleRoot { .. }
            | Self::InvalidTransactionHash { .. }
            | Self::InvalidHash { .. } => ErrorKind::Commitment,
            Self::InsufficientWork { .. } => ErrorKind::ProofOfWork,
            Self::InvalidPublicKey { .. } | Self::InvalidSignature { .. } => ErrorKind::Signature,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("store {op} failed for {key}: {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl ChainError {
    pub(crate) fn store(op: &'static str, key: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            op,
            key: key.into(),
            source,
        }
    }

    /// The admission rule that rejected the block, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.validation().map(ValidationError::kind)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store {
                source: StoreError::NotFound(_),
                ..
            }
        )
    }
}
