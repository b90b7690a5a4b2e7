//! Shared primitives for zkrep: BN254 field helpers, Poseidon hashing,
//! protocol settings, the control-field codec and proof wrappers.

pub mod attester;
pub mod codec;
pub mod crypto;
pub mod field;
pub mod hash;
pub mod proof;
pub mod settings;

pub use attester::AttesterId;
pub use codec::{
    pack, pack_replacement, unpack, unpack_replacement, CodecError, EpochKeyControl,
    ReputationControl, SignupControl, TransitionControl,
};
pub use crypto::{
    epoch_key, epoch_key_in_range, epoch_keys, epoch_nullifier, epoch_tree_leaf,
    identity_commitment, state_tree_leaf,
};
pub use field::{
    fr_cmp, fr_from_biguint, fr_from_bytes, fr_to_be_bytes, fr_to_biguint, fr_to_bytes,
    fr_to_hex, fr_to_u64, parse_fr, reduce_be_bytes_to_fr, reduce_biguint_to_fr, serde_fr,
    serde_fr_vec, FIELD_MODULUS, SAFE_FIELD_BITS,
};
pub use halo2curves_axiom::bn256::Fr;
pub use hash::{hash_node, poseidon_hash, poseidon_hash_many};
pub use proof::{
    BuildOrderedTreeProof, CircuitKind, EpochKeyLiteProof, EpochKeyProof, Proof, ProofError,
    Prover, ProverError, ReputationProof, SignupProof, UserStateTransitionProof, ZkProof,
};
pub use settings::{ControlLayout, Settings, SettingsError};
