//! Ledger event model.

use std::fmt;

use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use zkrep_common::{serde_fr, serde_fr_vec, AttesterId};

/// Stable identity of a ledger event and the unit of the sync cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub block_number: u64,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub block_timestamp: u64,
    pub attester_id: AttesterId,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AttesterSignedUp {
        epoch_length: u64,
    },
    UserSignedUp {
        epoch: u64,
        #[serde(with = "serde_fr")]
        identity_commitment: Fr,
        leaf_index: u64,
        #[serde(default, with = "serde_fr_vec")]
        initial_data: Vec<Fr>,
    },
    Attestation {
        epoch: u64,
        #[serde(with = "serde_fr")]
        epoch_key: Fr,
        field_index: usize,
        #[serde(with = "serde_fr")]
        value: Fr,
    },
    StateTreeLeaf {
        epoch: u64,
        index: u64,
        #[serde(with = "serde_fr")]
        leaf: Fr,
    },
    EpochTreeLeaf {
        epoch: u64,
        #[serde(with = "serde_fr")]
        epoch_key: Fr,
        #[serde(with = "serde_fr")]
        leaf: Fr,
    },
    EpochSealed {
        epoch: u64,
        #[serde(with = "serde_fr")]
        root: Fr,
        sealer: AttesterId,
    },
    UserStateTransitioned {
        from_epoch: u64,
        to_epoch: u64,
        leaf_index: u64,
        #[serde(with = "serde_fr")]
        state_tree_leaf: Fr,
        #[serde(with = "serde_fr_vec")]
        nullifiers: Vec<Fr>,
    },
    EpochEnded {
        epoch: u64,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AttesterSignedUp { .. } => "attester_signed_up",
            EventKind::UserSignedUp { .. } => "user_signed_up",
            EventKind::Attestation { .. } => "attestation",
            EventKind::StateTreeLeaf { .. } => "state_tree_leaf",
            EventKind::EpochTreeLeaf { .. } => "epoch_tree_leaf",
            EventKind::EpochSealed { .. } => "epoch_sealed",
            EventKind::UserStateTransitioned { .. } => "user_state_transitioned",
            EventKind::EpochEnded { .. } => "epoch_ended",
        }
    }
}

impl LedgerEvent {
    pub fn new(
        block_number: u64,
        log_index: u64,
        block_timestamp: u64,
        attester_id: AttesterId,
        kind: EventKind,
    ) -> Self {
        Self {
            block_number,
            log_index,
            block_timestamp,
            attester_id,
            kind,
        }
    }

    pub fn id(&self) -> EventId {
        EventId {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    /// blake3 of the canonical JSON encoding, used to recognise redeliveries.
    pub fn digest(&self) -> [u8; 32] {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        *blake3::hash(&bytes).as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape() {
        let event = LedgerEvent::new(
            7,
            2,
            1_700,
            AttesterId::from(5u64),
            EventKind::StateTreeLeaf {
                epoch: 0,
                index: 3,
                leaf: Fr::from(9u64),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "state_tree_leaf");
        assert_eq!(json["attester_id"], "5");
        let back: LedgerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.digest(), event.digest());
    }

    #[test]
    fn digest_changes_with_content() {
        let a = LedgerEvent::new(1, 0, 0, AttesterId::from(1u64), EventKind::EpochEnded { epoch: 0 });
        let mut b = a.clone();
        b.kind = EventKind::EpochEnded { epoch: 1 };
        assert_ne!(a.digest(), b.digest());
        assert!(a.id() < EventId { block_number: 1, log_index: 1 });
    }
}
