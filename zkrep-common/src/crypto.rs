//! Identity, leaf, epoch-key and nullifier derivations.

use halo2curves_axiom::bn256::Fr;
use num_bigint::BigUint;

use crate::{
    attester::AttesterId,
    codec::EpochKeyControl,
    field::{fr_to_biguint, reduce_biguint_to_fr},
    hash::{poseidon_hash, poseidon_hash_many},
    settings::Settings,
};

pub fn identity_commitment(secret: &Fr) -> Fr {
    poseidon_hash([*secret])
}

/// `H(H(secret, attester, epoch), data...)`
pub fn state_tree_leaf(secret: &Fr, attester_id: &AttesterId, epoch: u64, data: &[Fr]) -> Fr {
    let owner = poseidon_hash([*secret, attester_id.to_fr(), Fr::from(epoch)]);
    let mut inputs = Vec::with_capacity(data.len() + 1);
    inputs.push(owner);
    inputs.extend_from_slice(data);
    poseidon_hash_many(&inputs)
}

/// `H(epoch_key, data...)`
pub fn epoch_tree_leaf(epoch_key: &Fr, data: &[Fr]) -> Fr {
    let mut inputs = Vec::with_capacity(data.len() + 1);
    inputs.push(*epoch_key);
    inputs.extend_from_slice(data);
    poseidon_hash_many(&inputs)
}

/// Epoch key for `nonce`, truncated to `epoch_key_bits`.
pub fn epoch_key(
    secret: &Fr,
    attester_id: &AttesterId,
    epoch: u64,
    nonce: u64,
    settings: &Settings,
) -> Fr {
    let control = EpochKeyControl {
        nonce,
        epoch,
        attester_id: attester_id.clone(),
        reveal_nonce: false,
        chain_id: settings.chain_id,
    }
    .encode(&settings.control);
    let digest = fr_to_biguint(&poseidon_hash([*secret, control]));
    let modulus = BigUint::from(1u32) << settings.epoch_key_bits;
    reduce_biguint_to_fr(&(digest % modulus))
}

/// All epoch keys an identity may use in one epoch.
pub fn epoch_keys(secret: &Fr, attester_id: &AttesterId, epoch: u64, settings: &Settings) -> Vec<Fr> {
    (0..settings.num_epoch_key_nonce_per_epoch as u64)
        .map(|nonce| epoch_key(secret, attester_id, epoch, nonce, settings))
        .collect()
}

/// Nullifier consumed when an identity transitions out of `epoch`.
pub fn epoch_nullifier(secret: &Fr, attester_id: &AttesterId, epoch: u64, chain_id: u64) -> Fr {
    poseidon_hash([
        attester_id.to_fr(),
        Fr::from(epoch),
        *secret,
        Fr::from(chain_id),
    ])
}

/// Whether `epoch_key` lies in the addressable epoch-key domain.
pub fn epoch_key_in_range(epoch_key: &Fr, settings: &Settings) -> bool {
    fr_to_biguint(epoch_key).bits() <= u64::from(settings.epoch_key_bits)
}
