//! Sealed epoch tree.
//!
//! Leaves are sorted ascending and bracketed by two sentinels, `MIN = 0` and
//! `MAX = p - 1`, then padded with `MIN` up to the tree capacity. Because the
//! padding leaf equals the empty leaf, the root is that of an incremental tree
//! over the sorted sequence. Adjacent leaves give non-membership proofs.
//!
//! Each slot carries `R^i`, where `i` is the slot's position in the original
//! list `[MIN, leaves.., MAX]`. The external sorting proof uses these values
//! together with [`OrderedTree::checksum`] to show the output is a permutation
//! of the input.

use std::cmp::Ordering;

use halo2curves_axiom::{bn256::Fr, ff::Field};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use zkrep_common::{fr_cmp, fr_to_hex, reduce_be_bytes_to_fr, Settings};

use crate::{
    data::EpochTreePreimage,
    state_tree::{IncrementalMerkleTree, MerkleProof},
    StateError,
};

pub const MIN_LEAF: Fr = Fr::ZERO;

pub static MAX_LEAF: Lazy<Fr> = Lazy::new(|| -Fr::ONE);

/// Base of the R-value table.
pub static R_BASE: Lazy<Fr> = Lazy::new(|| {
    let digest = blake3::hash(b"zkrep/ordered-tree/r-value/v1");
    reduce_be_bytes_to_fr(digest.as_bytes())
});

/// Result of locating a value among the sorted leaves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RangeCheck {
    Member { index: u64 },
    /// `sorted[lower_index] < value < sorted[lower_index + 1]`
    NonMember { lower_index: u64, lower: Fr, upper: Fr },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeProof {
    Member(MerkleProof),
    NonMember { lower: MerkleProof, upper: MerkleProof },
}

impl RangeProof {
    /// Check the proof for `value` against `root`.
    pub fn verify(&self, value: &Fr, root: &Fr) -> bool {
        match self {
            RangeProof::Member(proof) => proof.leaf == *value && proof.root == *root && proof.verify(),
            RangeProof::NonMember { lower, upper } => {
                lower.root == *root
                    && upper.root == *root
                    && upper.index == lower.index + 1
                    && fr_cmp(&lower.leaf, value) == Ordering::Less
                    && fr_cmp(value, &upper.leaf) == Ordering::Less
                    && lower.verify()
                    && upper.verify()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrderedTree {
    depth: u32,
    /// `[MIN, leaves.., MAX]` in input order.
    original: Vec<Fr>,
    /// Sorted leaves including both sentinels, no padding.
    sorted: Vec<Fr>,
    r_values: Vec<Fr>,
    tree: IncrementalMerkleTree,
}

impl OrderedTree {
    /// Build from preimages. Their order only affects the R-value assignment.
    pub fn from_preimages(
        preimages: &[EpochTreePreimage],
        settings: &Settings,
    ) -> Result<Self, StateError> {
        let leaves = preimages.iter().map(EpochTreePreimage::leaf).collect();
        Self::from_leaves(leaves, settings.epoch_tree_depth)
    }

    pub fn from_leaves(leaves: Vec<Fr>, depth: u32) -> Result<Self, StateError> {
        let capacity = 1u64 << depth.clamp(1, 32);
        if leaves.len() as u64 + 2 > capacity {
            return Err(StateError::TreeFull { capacity });
        }

        let mut original = Vec::with_capacity(leaves.len() + 2);
        original.push(MIN_LEAF);
        original.extend(leaves);
        original.push(*MAX_LEAF);

        let mut order: Vec<usize> = (0..original.len()).collect();
        order.sort_by(|a, b| fr_cmp(&original[*a], &original[*b]));

        for pair in order.windows(2) {
            if fr_cmp(&original[pair[0]], &original[pair[1]]) != Ordering::Less {
                return Err(StateError::Invalid(format!(
                    "duplicate or sentinel leaf {}",
                    fr_to_hex(&original[pair[1]])
                )));
            }
        }

        let r_table = r_powers(original.len());
        let sorted: Vec<Fr> = order.iter().map(|&i| original[i]).collect();
        let r_values: Vec<Fr> = order.iter().map(|&i| r_table[i]).collect();
        let tree = IncrementalMerkleTree::from_leaves(depth, sorted.iter().copied())?;

        debug!(
            "built ordered tree with {} leaves, root {}",
            sorted.len() - 2,
            fr_to_hex(&tree.root())
        );
        Ok(Self {
            depth: tree.depth(),
            original,
            sorted,
            r_values,
            tree,
        })
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    /// Number of real (non-sentinel) leaves.
    pub fn leaf_count(&self) -> usize {
        self.sorted.len() - 2
    }

    pub fn sorted_leaves(&self) -> &[Fr] {
        &self.sorted
    }

    pub fn padded_leaves(&self) -> Vec<Fr> {
        let mut padded = self.sorted.clone();
        padded.resize(self.tree.capacity() as usize, MIN_LEAF);
        padded
    }

    /// R-value of each sorted slot.
    pub fn r_values(&self) -> &[Fr] {
        &self.r_values
    }

    /// `Σ R^i · original[i]`, invariant under the sort.
    pub fn checksum(&self) -> Fr {
        let r = *R_BASE;
        let mut power = Fr::ONE;
        let mut acc = Fr::ZERO;
        for leaf in &self.original {
            acc += power * leaf;
            power *= r;
        }
        acc
    }

    /// Inputs for the external ordered-tree proof.
    pub fn circuit_inputs(&self) -> serde_json::Value {
        let hex = |v: &[Fr]| v.iter().map(fr_to_hex).collect::<Vec<_>>();
        json!({
            "sorted_leaves": hex(&self.sorted),
            "padded_leaves": hex(&self.padded_leaves()),
            "r_values": hex(&self.r_values),
            "leaf_count": self.leaf_count(),
            "root": fr_to_hex(&self.root()),
            "checksum": fr_to_hex(&self.checksum()),
        })
    }

    pub fn range_check(&self, value: &Fr) -> RangeCheck {
        match self.sorted.binary_search_by(|entry| fr_cmp(entry, value)) {
            Ok(index) => RangeCheck::Member {
                index: index as u64,
            },
            // MIN is the smallest element and MAX the largest, so `index`
            // always lies in `1..sorted.len()`.
            Err(index) => RangeCheck::NonMember {
                lower_index: index as u64 - 1,
                lower: self.sorted[index - 1],
                upper: self.sorted[index],
            },
        }
    }

    pub fn range_proof(&self, value: &Fr) -> Result<RangeProof, StateError> {
        match self.range_check(value) {
            RangeCheck::Member { index } => Ok(RangeProof::Member(self.tree.proof(index)?)),
            RangeCheck::NonMember { lower_index, .. } => Ok(RangeProof::NonMember {
                lower: self.tree.proof(lower_index)?,
                upper: self.tree.proof(lower_index + 1)?,
            }),
        }
    }
}

fn r_powers(count: usize) -> Vec<Fr> {
    let r = *R_BASE;
    let mut powers = Vec::with_capacity(count);
    let mut power = Fr::ONE;
    for _ in 0..count {
        powers.push(power);
        power *= r;
    }
    powers
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{seq::SliceRandom, thread_rng};

    fn frs(values: &[u64]) -> Vec<Fr> {
        values.iter().copied().map(Fr::from).collect()
    }

    #[test]
    fn sorted_with_sentinels_regardless_of_input_order() {
        let mut rng = thread_rng();
        let mut input = frs(&[5, 2, 8]);
        let reference = OrderedTree::from_leaves(input.clone(), 3).unwrap();
        let expected = vec![MIN_LEAF, Fr::from(2u64), Fr::from(5u64), Fr::from(8u64), *MAX_LEAF];
        assert_eq!(reference.sorted_leaves(), expected.as_slice());
        let mut padded = expected.clone();
        padded.resize(8, MIN_LEAF);
        assert_eq!(reference.padded_leaves(), padded);

        for _ in 0..10 {
            input.shuffle(&mut rng);
            let tree = OrderedTree::from_leaves(input.clone(), 3).unwrap();
            assert_eq!(tree.sorted_leaves(), reference.sorted_leaves());
            assert_eq!(tree.root(), reference.root());
        }
    }

    #[test]
    fn r_values_follow_original_positions() {
        let tree = OrderedTree::from_leaves(frs(&[5, 2, 8]), 3).unwrap();
        let r = r_powers(5);
        // sorted: MIN(0), 2(pos 2), 5(pos 1), 8(pos 3), MAX(pos 4)
        assert_eq!(tree.r_values(), &[r[0], r[2], r[1], r[3], r[4]]);
        let sorted_sum = tree
            .sorted_leaves()
            .iter()
            .zip(tree.r_values())
            .fold(Fr::ZERO, |acc, (leaf, rv)| acc + *leaf * rv);
        assert_eq!(sorted_sum, tree.checksum());
    }

    #[test]
    fn range_checks_against_neighbours() {
        let tree = OrderedTree::from_leaves(frs(&[5, 2, 8]), 3).unwrap();
        assert_eq!(tree.range_check(&Fr::from(5u64)), RangeCheck::Member { index: 2 });
        assert_eq!(
            tree.range_check(&Fr::from(6u64)),
            RangeCheck::NonMember {
                lower_index: 2,
                lower: Fr::from(5u64),
                upper: Fr::from(8u64),
            }
        );

        let root = tree.root();
        let member = tree.range_proof(&Fr::from(5u64)).unwrap();
        assert!(member.verify(&Fr::from(5u64), &root));
        let non_member = tree.range_proof(&Fr::from(6u64)).unwrap();
        assert!(non_member.verify(&Fr::from(6u64), &root));
        assert!(!non_member.verify(&Fr::from(9u64), &root));
    }

    #[test]
    fn root_equals_incremental_tree_over_sorted_leaves() {
        let tree = OrderedTree::from_leaves(frs(&[5, 2, 8]), 3).unwrap();
        let plain = IncrementalMerkleTree::from_leaves(3, tree.padded_leaves()).unwrap();
        assert_eq!(tree.root(), plain.root());
    }

    #[test]
    fn capacity_includes_sentinels() {
        assert!(OrderedTree::from_leaves(frs(&[1, 2]), 2).is_ok());
        assert_eq!(
            OrderedTree::from_leaves(frs(&[1, 2, 3]), 2).unwrap_err(),
            StateError::TreeFull { capacity: 4 }
        );
    }

    #[test]
    fn empty_tree_holds_only_sentinels() {
        let tree = OrderedTree::from_leaves(Vec::new(), 2).unwrap();
        assert_eq!(tree.leaf_count(), 0);
        assert!(matches!(
            tree.range_check(&Fr::from(3u64)),
            RangeCheck::NonMember { lower_index: 0, .. }
        ));
    }

    #[test]
    fn duplicate_leaves_are_rejected() {
        assert!(matches!(
            OrderedTree::from_leaves(frs(&[4, 4]), 3),
            Err(StateError::Invalid(_))
        ));
    }

    proptest! {
        #[test]
        fn root_is_order_independent(
            values in proptest::collection::btree_set(1u64..1_000_000, 0..20),
            seed in any::<u64>(),
        ) {
            use rand::{rngs::StdRng, SeedableRng};
            let mut leaves = frs(&values.into_iter().collect::<Vec<_>>());
            let reference = OrderedTree::from_leaves(leaves.clone(), 5).unwrap();
            leaves.shuffle(&mut StdRng::seed_from_u64(seed));
            let shuffled = OrderedTree::from_leaves(leaves, 5).unwrap();
            prop_assert_eq!(shuffled.root(), reference.root());
            prop_assert_eq!(shuffled.sorted_leaves(), reference.sorted_leaves());
        }
    }
}
