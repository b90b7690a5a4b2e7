use serde::{Deserialize, Serialize};
use thiserror::Error;
use zkrep_common::{ProofError, ProverError, SettingsError};
use zkrep_epoch_state::StateError;

/// Errors surfaced by the synchronizer.
///
/// Fatal variants stop the writer until a resync; transient ones are retried
/// with backoff without advancing the cursor.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("out-of-order event at {block_number}:{log_index}: {detail}")]
    OutOfOrderEvent {
        block_number: u64,
        log_index: u64,
        detail: String,
    },

    #[error("cursor gap: source head {head} is behind synced block {synced}")]
    CursorGap { head: u64, synced: u64 },

    #[error("root mismatch: {0}")]
    RootMismatch(String),

    #[error("leaf index mismatch: expected at most {expected}, ledger reported {actual}")]
    LeafIndexMismatch { expected: u64, actual: u64 },

    #[error("projection inconsistent with storage: {0}")]
    Inconsistent(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("event source error: {0}")]
    Source(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown attester {0}")]
    UnknownAttester(String),

    #[error("synchronizer halted: {0}")]
    Halted(String),

    #[error("synchronizer stopped")]
    Stopped,

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error("invalid proof: {0}")]
    InvalidProof(String),
}

impl SyncError {
    /// Consistency violations that stop ingestion.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::OutOfOrderEvent { .. }
                | SyncError::CursorGap { .. }
                | SyncError::RootMismatch(_)
                | SyncError::LeafIndexMismatch { .. }
                | SyncError::Inconsistent(_)
        )
    }

    /// Failures worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::Source(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            // Replaying the same write cannot succeed later.
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                SyncError::Inconsistent(format!("constraint violation: {err}"))
            }
            _ => SyncError::Storage(err.to_string()),
        }
    }
}

impl From<SettingsError> for SyncError {
    fn from(err: SettingsError) -> Self {
        SyncError::Config(err.to_string())
    }
}

/// Why an event's state effect was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    TreeFull,
    DuplicateNullifier,
    EpochMismatch,
    UnsealedEpochReference,
    Unauthorized,
    InvalidEvent,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::TreeFull => "tree_full",
            RejectionCode::DuplicateNullifier => "duplicate_nullifier",
            RejectionCode::EpochMismatch => "epoch_mismatch",
            RejectionCode::UnsealedEpochReference => "unsealed_epoch_reference",
            RejectionCode::Unauthorized => "unauthorized",
            RejectionCode::InvalidEvent => "invalid_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "tree_full" => RejectionCode::TreeFull,
            "duplicate_nullifier" => RejectionCode::DuplicateNullifier,
            "epoch_mismatch" => RejectionCode::EpochMismatch,
            "unsealed_epoch_reference" => RejectionCode::UnsealedEpochReference,
            "unauthorized" => RejectionCode::Unauthorized,
            "invalid_event" => RejectionCode::InvalidEvent,
            _ => return None,
        })
    }
}

/// A local rejection recorded against an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectionCode,
    pub detail: String,
}

impl Rejection {
    pub fn new(code: RejectionCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::new(RejectionCode::InvalidEvent, detail)
    }
}

impl From<StateError> for Rejection {
    fn from(err: StateError) -> Self {
        let code = match &err {
            StateError::TreeFull { .. } => RejectionCode::TreeFull,
            StateError::DuplicateNullifier(_) => RejectionCode::DuplicateNullifier,
            StateError::EpochMismatch(_) => RejectionCode::EpochMismatch,
            StateError::UnsealedEpochReference { .. } => RejectionCode::UnsealedEpochReference,
            StateError::LeafIndexOutOfRange { .. } | StateError::Invalid(_) => {
                RejectionCode::InvalidEvent
            }
        };
        Rejection::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::CursorGap { head: 1, synced: 2 }.is_fatal());
        assert!(SyncError::RootMismatch("x".into()).is_fatal());
        assert!(!SyncError::Storage("x".into()).is_fatal());
        assert!(SyncError::Storage("x".into()).is_transient());
        assert!(!SyncError::State(StateError::TreeFull { capacity: 1 }).is_fatal());
    }

    #[test]
    fn sqlite_constraint_failures_are_fatal() {
        let unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: nullifiers.value".into()),
        );
        let err = SyncError::from(unique);
        assert!(matches!(err, SyncError::Inconsistent(_)));
        assert!(err.is_fatal());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(SyncError::from(busy).is_transient());
    }

    #[test]
    fn state_errors_map_to_codes() {
        let rejection = Rejection::from(StateError::UnsealedEpochReference { epoch: 3 });
        assert_eq!(rejection.code, RejectionCode::UnsealedEpochReference);
        for code in [
            RejectionCode::TreeFull,
            RejectionCode::DuplicateNullifier,
            RejectionCode::EpochMismatch,
            RejectionCode::UnsealedEpochReference,
            RejectionCode::Unauthorized,
            RejectionCode::InvalidEvent,
        ] {
            assert_eq!(RejectionCode::parse(code.as_str()), Some(code));
        }
    }
}
