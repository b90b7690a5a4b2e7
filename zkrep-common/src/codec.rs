//! Bit-packed control fields.
//!
//! Members are packed from bit 0 upwards in declaration order. Encoding
//! truncates each member modulo `2^width`; range checks are the caller's job.

use halo2curves_axiom::bn256::Fr;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    attester::AttesterId,
    field::{fr_to_biguint, reduce_biguint_to_fr},
    settings::{ControlLayout, Settings},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("replacement value needs {bits} bits, limit is {limit}")]
    ReplacementOverflow { bits: u64, limit: u32 },

    #[error("replication nonce {nonce} does not fit in {limit} bits")]
    NonceOverflow { nonce: u64, limit: u32 },
}

fn mask(width: u32) -> BigUint {
    (BigUint::from(1u32) << width) - 1u32
}

/// Pack `parts` into one integer using the given bit widths.
pub fn pack(widths: &[u32], parts: &[BigUint]) -> BigUint {
    let mut acc = BigUint::default();
    let mut offset = 0u32;
    for (width, part) in widths.iter().zip(parts) {
        acc += (part & mask(*width)) << offset;
        offset += width;
    }
    acc
}

/// Inverse of [`pack`].
pub fn unpack(widths: &[u32], packed: &BigUint) -> Vec<BigUint> {
    let mut parts = Vec::with_capacity(widths.len());
    let mut offset = 0u32;
    for width in widths {
        parts.push((packed >> offset) & mask(*width));
        offset += width;
    }
    parts
}

fn low_u64(value: &BigUint) -> u64 {
    value.iter_u64_digits().next().unwrap_or(0)
}

fn flag(value: &BigUint) -> bool {
    value.bits() != 0
}

fn encode_parts(widths: &[u32], parts: &[BigUint]) -> Fr {
    // Layouts are validated to fit in 253 bits, below the modulus.
    reduce_biguint_to_fr(&pack(widths, parts))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochKeyControl {
    pub nonce: u64,
    pub epoch: u64,
    pub attester_id: AttesterId,
    pub reveal_nonce: bool,
    pub chain_id: u64,
}

impl EpochKeyControl {
    pub fn encode(&self, layout: &ControlLayout) -> Fr {
        encode_parts(
            &layout.epoch_key_widths(),
            &[
                BigUint::from(self.nonce),
                BigUint::from(self.epoch),
                self.attester_id.as_biguint().clone(),
                BigUint::from(self.reveal_nonce as u8),
                BigUint::from(self.chain_id),
            ],
        )
    }

    pub fn decode(control: &Fr, layout: &ControlLayout) -> Self {
        let parts = unpack(&layout.epoch_key_widths(), &fr_to_biguint(control));
        Self {
            nonce: low_u64(&parts[0]),
            epoch: low_u64(&parts[1]),
            attester_id: AttesterId::new(parts[2].clone()),
            reveal_nonce: flag(&parts[3]),
            chain_id: low_u64(&parts[4]),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationControl {
    pub min_rep: u64,
    pub max_rep: u64,
    pub prove_min_rep: bool,
    pub prove_max_rep: bool,
    pub prove_zero_rep: bool,
    pub prove_graffiti: bool,
}

impl ReputationControl {
    pub fn encode(&self, layout: &ControlLayout) -> Fr {
        encode_parts(
            &layout.reputation_widths(),
            &[
                BigUint::from(self.min_rep),
                BigUint::from(self.max_rep),
                BigUint::from(self.prove_min_rep as u8),
                BigUint::from(self.prove_max_rep as u8),
                BigUint::from(self.prove_zero_rep as u8),
                BigUint::from(self.prove_graffiti as u8),
            ],
        )
    }

    pub fn decode(control: &Fr, layout: &ControlLayout) -> Self {
        let parts = unpack(&layout.reputation_widths(), &fr_to_biguint(control));
        Self {
            min_rep: low_u64(&parts[0]),
            max_rep: low_u64(&parts[1]),
            prove_min_rep: flag(&parts[2]),
            prove_max_rep: flag(&parts[3]),
            prove_zero_rep: flag(&parts[4]),
            prove_graffiti: flag(&parts[5]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupControl {
    pub attester_id: AttesterId,
    pub epoch: u64,
    pub chain_id: u64,
}

impl SignupControl {
    pub fn encode(&self, layout: &ControlLayout) -> Fr {
        encode_parts(
            &layout.signup_widths(),
            &[
                self.attester_id.as_biguint().clone(),
                BigUint::from(self.epoch),
                BigUint::from(self.chain_id),
            ],
        )
    }

    pub fn decode(control: &Fr, layout: &ControlLayout) -> Self {
        let parts = unpack(&layout.signup_widths(), &fr_to_biguint(control));
        Self {
            attester_id: AttesterId::new(parts[0].clone()),
            epoch: low_u64(&parts[1]),
            chain_id: low_u64(&parts[2]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionControl {
    pub attester_id: AttesterId,
    pub to_epoch: u64,
    pub chain_id: u64,
}

impl TransitionControl {
    pub fn encode(&self, layout: &ControlLayout) -> Fr {
        encode_parts(
            &layout.transition_widths(),
            &[
                self.attester_id.as_biguint().clone(),
                BigUint::from(self.to_epoch),
                BigUint::from(self.chain_id),
            ],
        )
    }

    pub fn decode(control: &Fr, layout: &ControlLayout) -> Self {
        let parts = unpack(&layout.transition_widths(), &fr_to_biguint(control));
        Self {
            attester_id: AttesterId::new(parts[0].clone()),
            to_epoch: low_u64(&parts[1]),
            chain_id: low_u64(&parts[2]),
        }
    }
}

/// Pack a replacement-field write as `(value << repl_nonce_bits) + nonce`.
pub fn pack_replacement(value: &Fr, nonce: u64, settings: &Settings) -> Result<Fr, CodecError> {
    let value = fr_to_biguint(value);
    let limit = settings.repl_field_bits();
    if value.bits() > u64::from(limit) {
        return Err(CodecError::ReplacementOverflow {
            bits: value.bits(),
            limit,
        });
    }
    if settings.repl_nonce_bits < 64 && nonce >> settings.repl_nonce_bits != 0 {
        return Err(CodecError::NonceOverflow {
            nonce,
            limit: settings.repl_nonce_bits,
        });
    }
    let packed = (value << settings.repl_nonce_bits) + BigUint::from(nonce);
    Ok(reduce_biguint_to_fr(&packed))
}

/// Split a packed replacement field into `(value, nonce)`.
pub fn unpack_replacement(packed: &Fr, settings: &Settings) -> (Fr, u64) {
    let packed = fr_to_biguint(packed);
    let nonce = low_u64(&(&packed & mask(settings.repl_nonce_bits)));
    let value = packed >> settings.repl_nonce_bits;
    (reduce_biguint_to_fr(&value), nonce)
}
