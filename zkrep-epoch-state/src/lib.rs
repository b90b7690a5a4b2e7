//! Per-attester epoch state: the append-only state tree, the sealed epoch
//! tree, data-vector aggregation, the epoch lifecycle and the nullifier
//! ledger.

pub mod data;
pub mod error;
pub mod lifecycle;
pub mod nullifier;
pub mod ordered_tree;
pub mod state_tree;

pub use data::{DataVector, EpochTreePreimage};
pub use error::StateError;
pub use lifecycle::{EpochClock, EpochLifecycle, EpochPhase, EpochRecord, SealerPolicy};
pub use nullifier::NullifierLedger;
pub use ordered_tree::{OrderedTree, RangeCheck, RangeProof, MAX_LEAF, MIN_LEAF, R_BASE};
pub use state_tree::{IncrementalMerkleTree, MerkleProof};
