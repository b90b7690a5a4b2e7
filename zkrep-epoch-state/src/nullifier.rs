//! Consumed-nullifier set.

use std::collections::{HashMap, HashSet};

use halo2curves_axiom::bn256::Fr;
use zkrep_common::{fr_to_bytes, fr_to_hex};

use crate::StateError;

/// Every nullifier ever consumed, with the block that consumed it.
///
/// The ledger is owned by the single writer, so `&mut self` makes each
/// check-and-insert atomic.
#[derive(Clone, Debug, Default)]
pub struct NullifierLedger {
    consumed: HashMap<[u8; 32], u64>,
}

impl NullifierLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }

    pub fn contains(&self, nullifier: &Fr) -> bool {
        self.consumed.contains_key(&fr_to_bytes(nullifier))
    }

    pub fn consumed_at(&self, nullifier: &Fr) -> Option<u64> {
        self.consumed.get(&fr_to_bytes(nullifier)).copied()
    }

    /// Fail with `DuplicateNullifier` if any of `nullifiers` is already
    /// consumed or repeated within the batch.
    pub fn check_all(&self, nullifiers: &[Fr]) -> Result<(), StateError> {
        let mut batch = HashSet::with_capacity(nullifiers.len());
        for nullifier in nullifiers {
            let key = fr_to_bytes(nullifier);
            if self.consumed.contains_key(&key) || !batch.insert(key) {
                return Err(StateError::DuplicateNullifier(fr_to_hex(nullifier)));
            }
        }
        Ok(())
    }

    pub fn record(&mut self, nullifier: &Fr, block: u64) -> Result<(), StateError> {
        self.record_all(std::slice::from_ref(nullifier), block)
    }

    /// Record every nullifier or none of them.
    pub fn record_all(&mut self, nullifiers: &[Fr], block: u64) -> Result<(), StateError> {
        self.check_all(nullifiers)?;
        for nullifier in nullifiers {
            self.consumed.insert(fr_to_bytes(nullifier), block);
        }
        Ok(())
    }
}
