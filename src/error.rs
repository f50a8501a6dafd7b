use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Snapshot already exists: {0}")]
    SnapshotExists(String),

    #[error("Snapshot no longer matches its capture: {0}")]
    SnapshotModified(String),

    #[error("Snapshot already anchored as entry #{entry_id} (tx {tx_hash})")]
    AlreadyAnchored { entry_id: u64, tx_hash: String },

    #[error("Snapshot is not ready for anchoring: {}", .0.join("; "))]
    NotReady(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Chain id mismatch: configured {expected}, node reports {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Timed out after {secs}s waiting for receipt of {tx_hash}")]
    ReceiptTimeout { tx_hash: String, secs: u64 },

    #[error("Receipt for {0} contains no Logged event from the registry")]
    MissingEvent(String),
}

impl LedgerError {
    /// Failures the operator may resolve by re-invoking the anchor action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Rpc(_) | LedgerError::Reverted(_) | LedgerError::ReceiptTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
