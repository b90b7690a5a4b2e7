//! Epoch timing and the Active → Ended → Sealed state machine.

use std::collections::BTreeMap;

use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use tracing::info;
use zkrep_common::{fr_to_hex, AttesterId};

use crate::StateError;

/// Epoch timing of one attester.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClock {
    pub start_timestamp: u64,
    pub epoch_length: u64,
}

impl EpochClock {
    pub fn new(start_timestamp: u64, epoch_length: u64) -> Result<Self, StateError> {
        if epoch_length == 0 {
            return Err(StateError::Invalid("epoch length must be non-zero".into()));
        }
        Ok(Self {
            start_timestamp,
            epoch_length,
        })
    }

    pub fn epoch_at(&self, timestamp: u64) -> u64 {
        timestamp.saturating_sub(self.start_timestamp) / self.epoch_length
    }

    pub fn epoch_start(&self, epoch: u64) -> u64 {
        self.start_timestamp
            .saturating_add(epoch.saturating_mul(self.epoch_length))
    }

    pub fn epoch_end(&self, epoch: u64) -> u64 {
        self.epoch_start(epoch.saturating_add(1))
    }

    /// Seconds left in the epoch containing `timestamp`.
    pub fn remaining(&self, timestamp: u64) -> u64 {
        self.epoch_end(self.epoch_at(timestamp))
            .saturating_sub(timestamp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochPhase {
    Active,
    Ended,
    Sealed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpochRecord {
    pub ended_observed: bool,
    pub sealed_root: Option<Fr>,
}

/// Lifecycle of every epoch of one attester.
///
/// `now` is always a ledger block timestamp so replays see the same phases.
#[derive(Clone, Debug)]
pub struct EpochLifecycle {
    clock: EpochClock,
    epochs: BTreeMap<u64, EpochRecord>,
}

impl EpochLifecycle {
    pub fn new(clock: EpochClock) -> Self {
        Self {
            clock,
            epochs: BTreeMap::new(),
        }
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    pub fn current_epoch(&self, now: u64) -> u64 {
        self.clock.epoch_at(now)
    }

    pub fn record(&self, epoch: u64) -> Option<&EpochRecord> {
        self.epochs.get(&epoch)
    }

    pub fn phase(&self, epoch: u64, now: u64) -> EpochPhase {
        let record = self.epochs.get(&epoch);
        if record.and_then(|r| r.sealed_root).is_some() {
            EpochPhase::Sealed
        } else if record.map_or(false, |r| r.ended_observed) || epoch < self.current_epoch(now) {
            EpochPhase::Ended
        } else {
            EpochPhase::Active
        }
    }

    /// `epoch` must be the attester's current, still active epoch.
    pub fn require_active(&self, epoch: u64, now: u64) -> Result<(), StateError> {
        let current = self.current_epoch(now);
        if epoch != current {
            return Err(StateError::EpochMismatch(format!(
                "epoch {epoch} is not the current epoch {current}"
            )));
        }
        match self.phase(epoch, now) {
            EpochPhase::Active => Ok(()),
            phase => Err(StateError::EpochMismatch(format!(
                "epoch {epoch} is {phase:?}, not active"
            ))),
        }
    }

    /// Root of a sealed epoch.
    pub fn require_sealed(&self, epoch: u64, now: u64) -> Result<Fr, StateError> {
        match self.phase(epoch, now) {
            EpochPhase::Sealed => self
                .sealed_root(epoch)
                .ok_or(StateError::UnsealedEpochReference { epoch }),
            EpochPhase::Ended => Err(StateError::UnsealedEpochReference { epoch }),
            EpochPhase::Active => Err(StateError::EpochMismatch(format!(
                "epoch {epoch} is still active"
            ))),
        }
    }

    pub fn sealed_root(&self, epoch: u64) -> Option<Fr> {
        self.epochs.get(&epoch).and_then(|r| r.sealed_root)
    }

    /// Record that the ledger closed `epoch`. Returns `false` if already known.
    pub fn mark_ended(&mut self, epoch: u64, now: u64) -> Result<bool, StateError> {
        let current = self.current_epoch(now);
        if epoch >= current {
            return Err(StateError::EpochMismatch(format!(
                "epoch {epoch} cannot end before epoch {current} starts"
            )));
        }
        let record = self.epochs.entry(epoch).or_default();
        if record.ended_observed {
            return Ok(false);
        }
        record.ended_observed = true;
        Ok(true)
    }

    pub fn seal(&mut self, epoch: u64, root: Fr, now: u64) -> Result<(), StateError> {
        match self.phase(epoch, now) {
            EpochPhase::Ended => {}
            EpochPhase::Sealed => {
                return Err(StateError::EpochMismatch(format!(
                    "epoch {epoch} is already sealed"
                )))
            }
            EpochPhase::Active => {
                return Err(StateError::EpochMismatch(format!(
                    "epoch {epoch} is still active"
                )))
            }
        }
        let record = self.epochs.entry(epoch).or_default();
        record.ended_observed = true;
        record.sealed_root = Some(root);
        info!("epoch {} sealed with root {}", epoch, fr_to_hex(&root));
        Ok(())
    }

    /// Reinstate a persisted record when rebuilding from storage.
    pub fn restore(&mut self, epoch: u64, record: EpochRecord) {
        self.epochs.insert(epoch, record);
    }
}

/// Who may submit the seal of an attester's epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "sealers", rename_all = "snake_case")]
pub enum SealerPolicy {
    #[default]
    Anyone,
    AttesterOnly,
    Allowlist(Vec<AttesterId>),
}

impl SealerPolicy {
    pub fn permits(&self, attester_id: &AttesterId, sealer: &AttesterId) -> bool {
        match self {
            SealerPolicy::Anyone => true,
            SealerPolicy::AttesterOnly => attester_id == sealer,
            SealerPolicy::Allowlist(list) => attester_id == sealer || list.contains(sealer),
        }
    }
}
