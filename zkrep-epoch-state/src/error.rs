use thiserror::Error;

/// Errors raised by the accumulators, the lifecycle tracker and the
/// nullifier ledger. All of them are local rejections: they never imply
/// that a replicated projection is inconsistent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("tree full: capacity of {capacity} leaves reached")]
    TreeFull { capacity: u64 },

    #[error("nullifier {0} already consumed")]
    DuplicateNullifier(String),

    #[error("epoch mismatch: {0}")]
    EpochMismatch(String),

    #[error("epoch {epoch} has ended but is not sealed")]
    UnsealedEpochReference { epoch: u64 },

    #[error("leaf index {index} out of range (tree holds {len} leaves)")]
    LeafIndexOutOfRange { index: u64, len: u64 },

    #[error("invalid input: {0}")]
    Invalid(String),
}
