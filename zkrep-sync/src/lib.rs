//! Ledger synchronizer for zkrep.
//!
//! Pulls the ledger's event log in order, folds every event into a SQLite
//! backed projection of per-attester state trees, epoch aggregates, epoch
//! lifecycles and nullifiers, and serves consistent snapshot reads of it.

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod handlers;
pub mod projection;
pub mod source;
pub mod synchronizer;

pub use config::{parse_sealer_policy, RetryConfig, SyncConfig};
pub use db::{EventOutcome, ProjectionDb};
pub use error::{Rejection, RejectionCode, SyncError};
pub use event::{ChainHead, EventId, EventKind, LedgerEvent};
pub use handlers::{plan, Plan, PlanContext};
pub use projection::{AttesterState, Change, EpochAggregate, Projection};
pub use source::{EventSource, JsonLinesEventSource, MemoryEventSource};
pub use synchronizer::{PollReport, RunState, SyncStatus, Synchronizer};
