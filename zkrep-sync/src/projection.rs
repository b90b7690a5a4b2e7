//! In-memory projection of the replicated ledger state.
//!
//! The projection is a cache over the SQLite tables: every change is first
//! committed to storage and only then applied here, so a reload from storage
//! always reproduces it.

use std::collections::{BTreeMap, HashMap, HashSet};

use halo2curves_axiom::bn256::Fr;
use zkrep_common::{fr_to_bytes, fr_to_hex, AttesterId, Settings};
use zkrep_epoch_state::{
    DataVector, EpochClock, EpochLifecycle, EpochTreePreimage, IncrementalMerkleTree,
    NullifierLedger, StateError,
};

use crate::{error::SyncError, event::EventId};

fn inconsistent(err: StateError) -> SyncError {
    SyncError::Inconsistent(err.to_string())
}

/// Epoch-key aggregates of one epoch, in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct EpochAggregate {
    keys: Vec<Fr>,
    data: HashMap<[u8; 32], DataVector>,
}

impl EpochAggregate {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, epoch_key: &Fr) -> Option<&DataVector> {
        self.data.get(&fr_to_bytes(epoch_key))
    }

    pub fn upsert(&mut self, epoch_key: Fr, data: DataVector) {
        if self.data.insert(fr_to_bytes(&epoch_key), data).is_none() {
            self.keys.push(epoch_key);
        }
    }

    pub fn preimages(&self) -> Vec<EpochTreePreimage> {
        self.keys
            .iter()
            .filter_map(|key| {
                self.get(key).map(|data| EpochTreePreimage {
                    epoch_key: *key,
                    data: data.clone(),
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct AttesterState {
    pub lifecycle: EpochLifecycle,
    pub registered_block: u64,
    /// Attestations seen so far; the next one uses this as its replication nonce.
    pub attestation_count: u64,
    state_trees: BTreeMap<u64, IncrementalMerkleTree>,
    state_roots: BTreeMap<u64, HashSet<[u8; 32]>>,
    epoch_data: BTreeMap<u64, EpochAggregate>,
}

impl AttesterState {
    pub fn new(clock: EpochClock, registered_block: u64) -> Self {
        Self {
            lifecycle: EpochLifecycle::new(clock),
            registered_block,
            attestation_count: 0,
            state_trees: BTreeMap::new(),
            state_roots: BTreeMap::new(),
            epoch_data: BTreeMap::new(),
        }
    }

    pub fn clock(&self) -> &EpochClock {
        self.lifecycle.clock()
    }

    pub fn state_tree(&self, epoch: u64) -> Option<&IncrementalMerkleTree> {
        self.state_trees.get(&epoch)
    }

    /// Leaf count of the epoch's state tree.
    pub fn state_tree_len(&self, epoch: u64) -> u64 {
        self.state_trees.get(&epoch).map_or(0, |t| t.len())
    }

    pub fn state_root_exists(&self, epoch: u64, root: &Fr) -> bool {
        self.state_roots
            .get(&epoch)
            .map_or(false, |roots| roots.contains(&fr_to_bytes(root)))
    }

    pub fn epoch_data(&self, epoch: u64) -> Option<&EpochAggregate> {
        self.epoch_data.get(&epoch)
    }

    fn tree_mut(&mut self, epoch: u64, depth: u32) -> &mut IncrementalMerkleTree {
        self.state_trees
            .entry(epoch)
            .or_insert_with(|| IncrementalMerkleTree::new(depth))
    }

    fn insert_leaf(&mut self, epoch: u64, index: u64, leaf: Fr, depth: u32) -> Result<Fr, SyncError> {
        let tree = self.tree_mut(epoch, depth);
        if tree.len() != index {
            return Err(SyncError::Inconsistent(format!(
                "state tree of epoch {epoch} holds {} leaves, cannot place leaf {index}",
                tree.len()
            )));
        }
        tree.insert(leaf).map_err(inconsistent)?;
        let root = tree.root();
        self.state_roots
            .entry(epoch)
            .or_default()
            .insert(fr_to_bytes(&root));
        Ok(root)
    }

    pub(crate) fn restore_root(&mut self, epoch: u64, root: &Fr) {
        self.state_roots
            .entry(epoch)
            .or_default()
            .insert(fr_to_bytes(root));
    }

    pub(crate) fn restore_leaf(&mut self, epoch: u64, index: u64, leaf: Fr, depth: u32) -> Result<(), SyncError> {
        self.insert_leaf(epoch, index, leaf, depth).map(|_| ())
    }

    pub(crate) fn restore_aggregate(&mut self, epoch: u64, epoch_key: Fr, data: DataVector) {
        self.epoch_data
            .entry(epoch)
            .or_default()
            .upsert(epoch_key, data);
    }
}

/// A single state mutation produced by an event handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    AttesterRegistered {
        attester_id: AttesterId,
        clock: EpochClock,
    },
    SignUp {
        attester_id: AttesterId,
        epoch: u64,
        commitment: Fr,
        leaf_index: u64,
    },
    StateLeaf {
        attester_id: AttesterId,
        epoch: u64,
        index: u64,
        leaf: Fr,
        /// Root after inserting `leaf`.
        root: Fr,
    },
    Attestation {
        attester_id: AttesterId,
        epoch: u64,
        epoch_key: Fr,
        field_index: usize,
        value: Fr,
        nonce: u64,
        /// Aggregate after applying the attestation.
        data: DataVector,
        leaf: Fr,
        /// Position among the epoch's keys when the key is new.
        first_seen: Option<u64>,
    },
    EpochEnded {
        attester_id: AttesterId,
        epoch: u64,
    },
    EpochSealed {
        attester_id: AttesterId,
        epoch: u64,
        root: Fr,
    },
    Nullifiers {
        attester_id: AttesterId,
        epoch: u64,
        values: Vec<Fr>,
    },
    Transition {
        attester_id: AttesterId,
        from_epoch: u64,
        to_epoch: u64,
        leaf_index: u64,
        leaf: Fr,
    },
}

/// Replicated state of every tracked attester plus the global nullifier set.
#[derive(Clone, Debug)]
pub struct Projection {
    settings: Settings,
    attesters: BTreeMap<AttesterId, AttesterState>,
    nullifiers: NullifierLedger,
    signups: HashSet<([u8; 32], AttesterId)>,
    pub cursor: Option<EventId>,
    pub synced_block: Option<u64>,
}

impl Projection {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            attesters: BTreeMap::new(),
            nullifiers: NullifierLedger::new(),
            signups: HashSet::new(),
            cursor: None,
            synced_block: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn attester(&self, attester_id: &AttesterId) -> Option<&AttesterState> {
        self.attesters.get(attester_id)
    }

    pub fn attesters(&self) -> impl Iterator<Item = (&AttesterId, &AttesterState)> {
        self.attesters.iter()
    }

    pub fn nullifiers(&self) -> &NullifierLedger {
        &self.nullifiers
    }

    pub fn is_signed_up(&self, commitment: &Fr, attester_id: &AttesterId) -> bool {
        self.signups
            .contains(&(fr_to_bytes(commitment), attester_id.clone()))
    }

    pub(crate) fn attester_mut(&mut self, attester_id: &AttesterId) -> Result<&mut AttesterState, SyncError> {
        self.attesters
            .get_mut(attester_id)
            .ok_or_else(|| SyncError::Inconsistent(format!("attester {attester_id} not registered")))
    }

    pub(crate) fn register(&mut self, attester_id: AttesterId, state: AttesterState) {
        self.attesters.insert(attester_id, state);
    }

    pub(crate) fn restore_signup(&mut self, commitment: &Fr, attester_id: AttesterId) {
        self.signups.insert((fr_to_bytes(commitment), attester_id));
    }

    pub(crate) fn restore_nullifier(&mut self, value: &Fr, block: u64) -> Result<(), SyncError> {
        self.nullifiers.record(value, block).map_err(inconsistent)
    }

    /// Apply already-committed changes of the event at `id`.
    pub fn apply(&mut self, id: EventId, timestamp: u64, changes: &[Change]) -> Result<(), SyncError> {
        let state_depth = self.settings.state_tree_depth;
        for change in changes {
            match change {
                Change::AttesterRegistered { attester_id, clock } => {
                    self.register(attester_id.clone(), AttesterState::new(*clock, id.block_number));
                }
                Change::SignUp {
                    attester_id,
                    commitment,
                    ..
                } => {
                    self.restore_signup(commitment, attester_id.clone());
                }
                Change::StateLeaf {
                    attester_id,
                    epoch,
                    index,
                    leaf,
                    root,
                } => {
                    let state = self.attester_mut(attester_id)?;
                    let actual = state.insert_leaf(*epoch, *index, *leaf, state_depth)?;
                    if actual != *root {
                        return Err(SyncError::Inconsistent(format!(
                            "planned root {} but computed {}",
                            fr_to_hex(root),
                            fr_to_hex(&actual)
                        )));
                    }
                }
                Change::Attestation {
                    attester_id,
                    epoch,
                    epoch_key,
                    nonce,
                    data,
                    ..
                } => {
                    let state = self.attester_mut(attester_id)?;
                    state
                        .epoch_data
                        .entry(*epoch)
                        .or_default()
                        .upsert(*epoch_key, data.clone());
                    state.attestation_count = nonce + 1;
                }
                Change::EpochEnded { attester_id, epoch } => {
                    let state = self.attester_mut(attester_id)?;
                    state
                        .lifecycle
                        .mark_ended(*epoch, timestamp)
                        .map_err(inconsistent)?;
                }
                Change::EpochSealed {
                    attester_id,
                    epoch,
                    root,
                } => {
                    let state = self.attester_mut(attester_id)?;
                    state
                        .lifecycle
                        .seal(*epoch, *root, timestamp)
                        .map_err(inconsistent)?;
                }
                Change::Nullifiers { values, .. } => {
                    self.nullifiers
                        .record_all(values, id.block_number)
                        .map_err(inconsistent)?;
                }
                Change::Transition { .. } => {}
            }
        }
        self.cursor = Some(id);
        Ok(())
    }
}
