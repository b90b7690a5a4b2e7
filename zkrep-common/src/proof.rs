//! Proof wrappers and the external prover capability.
//!
//! A [`Proof`] is what a prover returns: public signals plus opaque proof
//! bytes. [`ZkProof`] projects the signals of each circuit into typed fields.

use std::fmt;

use async_trait::async_trait;
use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    attester::AttesterId,
    codec::{EpochKeyControl, ReputationControl, SignupControl, TransitionControl},
    field::{fr_to_u64, serde_fr_vec},
    settings::Settings,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    Signup,
    EpochKey,
    EpochKeyLite,
    Reputation,
    UserStateTransition,
    BuildOrderedTree,
}

impl CircuitKind {
    /// Number of public signals the circuit exposes under `settings`.
    pub fn signal_count(&self, settings: &Settings) -> usize {
        match self {
            CircuitKind::Signup => 3,
            CircuitKind::EpochKey => 4,
            CircuitKind::EpochKeyLite => 3,
            CircuitKind::Reputation => 6,
            CircuitKind::UserStateTransition => 5 + settings.num_epoch_key_nonce_per_epoch,
            CircuitKind::BuildOrderedTree => 2,
        }
    }
}

impl fmt::Display for CircuitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitKind::Signup => "signup",
            CircuitKind::EpochKey => "epoch_key",
            CircuitKind::EpochKeyLite => "epoch_key_lite",
            CircuitKind::Reputation => "reputation",
            CircuitKind::UserStateTransition => "user_state_transition",
            CircuitKind::BuildOrderedTree => "build_ordered_tree",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("{kind} proof expects {expected} public signals, got {actual}")]
    SignalCount {
        kind: CircuitKind,
        expected: usize,
        actual: usize,
    },

    #[error("invalid public signal: {0}")]
    InvalidSignal(String),
}

#[derive(Debug, Error)]
pub enum ProverError {
    #[error("prover does not support {0} circuits")]
    Unsupported(CircuitKind),

    #[error("invalid prover inputs: {0}")]
    InvalidInputs(String),

    #[error("prover backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    #[serde(with = "serde_fr_vec")]
    pub public_signals: Vec<Fr>,
    #[serde(with = "hex_bytes")]
    pub raw_proof: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignupProof {
    pub identity_commitment: Fr,
    pub state_tree_leaf: Fr,
    pub control: SignupControl,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochKeyProof {
    pub epoch_key: Fr,
    pub state_tree_root: Fr,
    pub control: EpochKeyControl,
    pub data: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochKeyLiteProof {
    pub control: EpochKeyControl,
    pub epoch_key: Fr,
    pub data: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReputationProof {
    pub epoch_key: Fr,
    pub state_tree_root: Fr,
    pub control: EpochKeyControl,
    pub rep_control: ReputationControl,
    pub graffiti: Fr,
    pub data: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserStateTransitionProof {
    pub from_epoch: u64,
    pub from_state_tree_root: Fr,
    pub from_epoch_tree_root: Fr,
    pub state_tree_leaf: Fr,
    pub control: TransitionControl,
    pub epoch_key_nullifiers: Vec<Fr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOrderedTreeProof {
    pub root: Fr,
    pub checksum: Fr,
}

/// Typed view over a proof's public signals, one variant per circuit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZkProof {
    Signup(SignupProof, Proof),
    EpochKey(EpochKeyProof, Proof),
    EpochKeyLite(EpochKeyLiteProof, Proof),
    Reputation(ReputationProof, Proof),
    UserStateTransition(UserStateTransitionProof, Proof),
    BuildOrderedTree(BuildOrderedTreeProof, Proof),
}

impl ZkProof {
    pub fn parse(kind: CircuitKind, proof: Proof, settings: &Settings) -> Result<Self, ProofError> {
        let expected = kind.signal_count(settings);
        let s = &proof.public_signals;
        if s.len() != expected {
            return Err(ProofError::SignalCount {
                kind,
                expected,
                actual: s.len(),
            });
        }
        let layout = &settings.control;
        let parsed = match kind {
            CircuitKind::Signup => ZkProof::Signup(
                SignupProof {
                    identity_commitment: s[0],
                    state_tree_leaf: s[1],
                    control: SignupControl::decode(&s[2], layout),
                },
                proof,
            ),
            CircuitKind::EpochKey => ZkProof::EpochKey(
                EpochKeyProof {
                    epoch_key: s[0],
                    state_tree_root: s[1],
                    control: EpochKeyControl::decode(&s[2], layout),
                    data: s[3],
                },
                proof,
            ),
            CircuitKind::EpochKeyLite => ZkProof::EpochKeyLite(
                EpochKeyLiteProof {
                    control: EpochKeyControl::decode(&s[0], layout),
                    epoch_key: s[1],
                    data: s[2],
                },
                proof,
            ),
            CircuitKind::Reputation => ZkProof::Reputation(
                ReputationProof {
                    epoch_key: s[0],
                    state_tree_root: s[1],
                    control: EpochKeyControl::decode(&s[2], layout),
                    rep_control: ReputationControl::decode(&s[3], layout),
                    graffiti: s[4],
                    data: s[5],
                },
                proof,
            ),
            CircuitKind::UserStateTransition => {
                let from_epoch = fr_to_u64(&s[0])
                    .map_err(|e| ProofError::InvalidSignal(format!("from_epoch: {e}")))?;
                ZkProof::UserStateTransition(
                    UserStateTransitionProof {
                        from_epoch,
                        from_state_tree_root: s[1],
                        from_epoch_tree_root: s[2],
                        state_tree_leaf: s[3],
                        control: TransitionControl::decode(&s[4], layout),
                        epoch_key_nullifiers: s[5..].to_vec(),
                    },
                    proof,
                )
            }
            CircuitKind::BuildOrderedTree => ZkProof::BuildOrderedTree(
                BuildOrderedTreeProof {
                    root: s[0],
                    checksum: s[1],
                },
                proof,
            ),
        };
        Ok(parsed)
    }

    pub fn kind(&self) -> CircuitKind {
        match self {
            ZkProof::Signup(..) => CircuitKind::Signup,
            ZkProof::EpochKey(..) => CircuitKind::EpochKey,
            ZkProof::EpochKeyLite(..) => CircuitKind::EpochKeyLite,
            ZkProof::Reputation(..) => CircuitKind::Reputation,
            ZkProof::UserStateTransition(..) => CircuitKind::UserStateTransition,
            ZkProof::BuildOrderedTree(..) => CircuitKind::BuildOrderedTree,
        }
    }

    pub fn proof(&self) -> &Proof {
        match self {
            ZkProof::Signup(_, p)
            | ZkProof::EpochKey(_, p)
            | ZkProof::EpochKeyLite(_, p)
            | ZkProof::Reputation(_, p)
            | ZkProof::UserStateTransition(_, p)
            | ZkProof::BuildOrderedTree(_, p) => p,
        }
    }

    /// Attester the proof is bound to, when the circuit exposes one.
    pub fn attester_id(&self) -> Option<&AttesterId> {
        match self {
            ZkProof::Signup(p, _) => Some(&p.control.attester_id),
            ZkProof::EpochKey(p, _) => Some(&p.control.attester_id),
            ZkProof::EpochKeyLite(p, _) => Some(&p.control.attester_id),
            ZkProof::Reputation(p, _) => Some(&p.control.attester_id),
            ZkProof::UserStateTransition(p, _) => Some(&p.control.attester_id),
            ZkProof::BuildOrderedTree(..) => None,
        }
    }
}

/// Proving backend. zkrep prepares inputs and consumes outputs; the circuit
/// math lives behind this trait.
#[async_trait]
pub trait Prover: Send + Sync {
    async fn gen_proof(
        &self,
        kind: CircuitKind,
        inputs: serde_json::Value,
    ) -> Result<Proof, ProverError>;

    async fn verify_proof(
        &self,
        kind: CircuitKind,
        public_signals: &[Fr],
        raw_proof: &[u8],
    ) -> Result<bool, ProverError>;
}
