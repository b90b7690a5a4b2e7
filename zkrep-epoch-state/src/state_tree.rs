//! Append-only binary Merkle tree with Poseidon node hashing.
//!
//! Only the filled prefix of every level is materialised; slots to the right
//! of it take the precomputed empty-subtree hash for their level.

use halo2curves_axiom::{bn256::Fr, ff::Field};
use serde::{Deserialize, Serialize};
use tracing::trace;
use zkrep_common::{hash_node, serde_fr, serde_fr_vec};

use crate::StateError;

/// Inclusion proof for one leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: u64,
    #[serde(with = "serde_fr")]
    pub leaf: Fr,
    /// Sibling hashes from the leaf level upwards.
    #[serde(with = "serde_fr_vec")]
    pub siblings: Vec<Fr>,
    #[serde(with = "serde_fr")]
    pub root: Fr,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        if self.siblings.len() >= 64 || (self.index >> self.siblings.len()) != 0 {
            return false;
        }
        let mut node = self.leaf;
        for (level, sibling) in self.siblings.iter().enumerate() {
            node = if (self.index >> level) & 1 == 0 {
                hash_node(node, *sibling)
            } else {
                hash_node(*sibling, node)
            };
        }
        node == self.root
    }
}

fn empty_subtree_hashes(depth: u32) -> Vec<Fr> {
    let mut zeros = Vec::with_capacity(depth as usize + 1);
    zeros.push(Fr::ZERO);
    for level in 0..depth as usize {
        zeros.push(hash_node(zeros[level], zeros[level]));
    }
    zeros
}

#[derive(Clone, Debug)]
pub struct IncrementalMerkleTree {
    depth: u32,
    zeros: Vec<Fr>,
    /// `nodes[0]` holds the leaves, `nodes[depth]` the root once non-empty.
    nodes: Vec<Vec<Fr>>,
}

impl IncrementalMerkleTree {
    /// Create an empty tree of the given depth (`1..=32`).
    pub fn new(depth: u32) -> Self {
        let depth = depth.clamp(1, 32);
        Self {
            depth,
            zeros: empty_subtree_hashes(depth),
            nodes: vec![Vec::new(); depth as usize + 1],
        }
    }

    /// Build a tree by inserting `leaves` in order.
    pub fn from_leaves<I>(depth: u32, leaves: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = Fr>,
    {
        let mut tree = Self::new(depth);
        for leaf in leaves {
            tree.insert(leaf)?;
        }
        Ok(tree)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn len(&self) -> u64 {
        self.nodes[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].is_empty()
    }

    pub fn leaves(&self) -> &[Fr] {
        &self.nodes[0]
    }

    pub fn leaf(&self, index: u64) -> Option<Fr> {
        self.nodes[0].get(index as usize).copied()
    }

    fn node_at(&self, level: usize, index: usize) -> Fr {
        self.nodes[level]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    /// Append a leaf and return its index.
    pub fn insert(&mut self, leaf: Fr) -> Result<u64, StateError> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(StateError::TreeFull {
                capacity: self.capacity(),
            });
        }
        self.nodes[0].push(leaf);

        let mut idx = index as usize;
        for level in 0..self.depth as usize {
            let parent = idx / 2;
            let hash = hash_node(
                self.node_at(level, parent * 2),
                self.node_at(level, parent * 2 + 1),
            );
            let above = &mut self.nodes[level + 1];
            if parent < above.len() {
                above[parent] = hash;
            } else {
                above.push(hash);
            }
            idx = parent;
        }
        trace!("inserted leaf at index {}", index);
        Ok(index)
    }

    pub fn root(&self) -> Fr {
        self.node_at(self.depth as usize, 0)
    }

    /// Root the tree would have after appending `leaf`, without mutating it.
    pub fn root_after_insert(&self, leaf: Fr) -> Result<Fr, StateError> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(StateError::TreeFull {
                capacity: self.capacity(),
            });
        }
        let mut node = leaf;
        let mut idx = index as usize;
        for level in 0..self.depth as usize {
            node = if idx % 2 == 0 {
                // Everything right of the new leaf is still empty.
                hash_node(node, self.zeros[level])
            } else {
                hash_node(self.node_at(level, idx - 1), node)
            };
            idx /= 2;
        }
        Ok(node)
    }

    pub fn proof(&self, index: u64) -> Result<MerkleProof, StateError> {
        let leaf = self.leaf(index).ok_or(StateError::LeafIndexOutOfRange {
            index,
            len: self.len(),
        })?;
        let mut siblings = Vec::with_capacity(self.depth as usize);
        let mut idx = index as usize;
        for level in 0..self.depth as usize {
            siblings.push(self.node_at(level, idx ^ 1));
            idx /= 2;
        }
        Ok(MerkleProof {
            index,
            leaf,
            siblings,
            root: self.root(),
        })
    }
}
