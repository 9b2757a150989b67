use crate::node::{Node, empty_node, hash_pair};

pub mod merkle;

/// Core hash tree abstraction shared by in-memory trees and persisted snapshots.
pub trait HashTree {
  type Error;

  /// Number of levels including the leaves
  fn depth(&self) -> Result<u32, Self::Error>;

  /// Get the root hash
  fn root(&self) -> Result<Node, Self::Error>;

  /// Generate proof path for the given 0-based leaf index
  fn proof(&self, leaf_index: u64) -> Result<MerkleProof, Self::Error>;
}

/// Inclusion proof of `leaf` at `leaf_index` under `root`.
///
/// `proof[0]` is the leaf's immediate sibling and the last entry is the sibling just below the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
  pub leaf_index: u64,
  pub leaf: Node,
  pub root: Node,
  pub proof: Vec<Node>,
}

impl MerkleProof {
  /// Re-derives the root from the leaf and its siblings.
  pub fn hash_proof(&self) -> Node {
    recompute(self.leaf, &self.proof, self.leaf_index)
  }

  /// Whether this proof hashes up to `root`.
  pub fn verify(&self, root: &Node) -> bool {
    self.hash_proof() == *root
  }
}

/// Folds `proof` into `leaf`. Bit `i` of `index` selects the order at level `i`: when clear the running
/// node is the left operand, when set it is the right operand. This is the order the ledger verifies in.
pub fn recompute(leaf: Node, proof: &[Node], index: u64) -> Node {
  let mut current = leaf;
  for (i, sibling) in proof.iter().enumerate() {
    current = if (index >> i) & 1 == 0 { hash_pair(&current, sibling) } else { hash_pair(sibling, &current) };
  }
  current
}

/// Extends a proof truncated below `max_depth` entries with empty-subtree siblings for the missing levels.
pub fn fill_in_proof(proof: &[Node], max_depth: u32) -> Vec<Node> {
  let mut full = Vec::with_capacity(max_depth as usize);
  full.extend(proof.iter().take(max_depth as usize).copied());
  for level in full.len() as u32..max_depth {
    full.push(empty_node(level));
  }
  full
}
