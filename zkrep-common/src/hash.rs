//! Poseidon over BN254, width 6 / rate 5.

use halo2curves_axiom::{bn256::Fr, ff::Field};
use poseidon_primitives::poseidon::primitives::{
    ConstantLength, Hash as PoseidonHash, Spec, VariableLengthIden3,
};

pub const POSEIDON_T: usize = 6;
pub const POSEIDON_RATE: usize = 5;
pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;
pub const POSEIDON_CAPACITY: u128 = 1u128 << 64;

#[derive(Clone, Copy, Debug)]
pub struct ZkrepPoseidonSpec;

impl Spec<Fr, POSEIDON_T, POSEIDON_RATE> for ZkrepPoseidonSpec {
    fn full_rounds() -> usize {
        POSEIDON_FULL_ROUNDS
    }

    fn partial_rounds() -> usize {
        POSEIDON_PARTIAL_ROUNDS
    }

    fn sbox(val: Fr) -> Fr {
        val.pow_vartime([5])
    }

    fn secure_mds() -> usize {
        0
    }
}

/// Fixed-arity Poseidon hash.
pub fn poseidon_hash<const L: usize>(values: [Fr; L]) -> Fr {
    PoseidonHash::<Fr, ZkrepPoseidonSpec, ConstantLength<L>, POSEIDON_T, POSEIDON_RATE>::init()
        .hash(values)
}

/// Variable-length Poseidon hash (Iden3 padding).
pub fn poseidon_hash_many(inputs: &[Fr]) -> Fr {
    PoseidonHash::<Fr, ZkrepPoseidonSpec, VariableLengthIden3, POSEIDON_T, POSEIDON_RATE>::init()
        .hash_with_cap(inputs, POSEIDON_CAPACITY)
}

/// Two-to-one node hash used by every binary tree in zkrep.
pub fn hash_node(left: Fr, right: Fr) -> Fr {
    poseidon_hash([left, right])
}
