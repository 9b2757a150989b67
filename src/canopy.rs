//! Cached upper levels of a concurrent tree.
//!
//! A canopy of `n` levels stores every node from level `max_depth - n` up to, but not including,
//! the root, in level order starting at tree-space index 2. Callers can then submit proofs with
//! only the lowest `max_depth - n` siblings and let [`Canopy::fill_in_proof`] supply the rest.
use tracing::warn;

use crate::changelog::ChangeLogEvent;
use crate::error::{Error, Result};
use crate::index::sibling_index;
use crate::node::{EMPTY, NODE_SIZE, Node, empty_node, hash_pair};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canopy {
  max_depth: u32,
  nodes: Vec<Node>,
}

impl Canopy {
  /// An all-empty canopy caching `levels` levels.
  pub fn new(max_depth: u32, levels: u32) -> Result<Self> {
    if levels > max_depth {
      return Err(Error::CanopyLengthMismatch { len: Self::byte_len(levels), max_depth });
    }
    Ok(Canopy { max_depth, nodes: vec![EMPTY; (1usize << (levels + 1)) - 2] })
  }

  /// Byte size of a canopy caching `levels` levels.
  pub fn byte_len(levels: u32) -> usize {
    ((1usize << (levels + 1)) - 2) * NODE_SIZE
  }

  pub fn from_bytes(bytes: &[u8], max_depth: u32) -> Result<Self> {
    let mismatch = || Error::CanopyLengthMismatch { len: bytes.len(), max_depth };
    if bytes.len() % NODE_SIZE != 0 {
      warn!("canopy length {} is not a multiple of {}", bytes.len(), NODE_SIZE);
      return Err(mismatch());
    }
    let count = bytes.len() / NODE_SIZE;
    let closest = count + 2;
    if !closest.is_power_of_two() || closest > (1usize << (max_depth + 1)) {
      warn!("canopy of {count} nodes does not fit a tree of depth {max_depth}");
      return Err(mismatch());
    }
    let nodes = bytes
      .chunks_exact(NODE_SIZE)
      .map(|chunk| {
        let mut node = EMPTY;
        node.copy_from_slice(chunk);
        node
      })
      .collect();
    Ok(Canopy { max_depth, nodes })
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    self.nodes.concat()
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  /// Number of levels below the root held in the canopy.
  pub fn cached_path_len(&self) -> u32 {
    (self.nodes.len() + 2).trailing_zeros() - 1
  }

  /// Writes the upper path nodes of the newest change event.
  pub fn update(&mut self, event: &ChangeLogEvent) {
    let path_len = self.cached_path_len() as usize;
    for path_node in event.path.iter().rev().skip(1).take(path_len) {
      self.nodes[(path_node.index - 2) as usize] = path_node.node;
    }
  }

  /// Extends `proof` for the leaf at `index` with the cached siblings above it, so that the
  /// result has exactly `max_depth` nodes when `proof` covers the uncached levels.
  pub fn fill_in_proof(&self, index: u32, proof: &mut Vec<Node>) {
    let path_len = self.cached_path_len();
    let mut node_index = ((1u64 << self.max_depth) + u64::from(index)) >> (self.max_depth - path_len);
    let mut inferred = Vec::with_capacity(path_len as usize);
    while node_index > 1 {
      let cached = self.nodes[(sibling_index(node_index) - 2) as usize];
      if cached == EMPTY {
        let level = self.max_depth - (u64::BITS - 1 - node_index.leading_zeros());
        inferred.push(empty_node(level));
      } else {
        inferred.push(cached);
      }
      node_index >>= 1;
    }
    let overlap = (proof.len() + inferred.len()).saturating_sub(self.max_depth as usize);
    proof.extend(inferred.into_iter().skip(overlap));
  }

  /// Overwrites consecutive nodes on the lowest canopy level starting at `start_index` and rehashes
  /// their ancestors inside the canopy.
  pub fn set_leaf_nodes(&mut self, start_index: u32, nodes: &[Node]) -> Result<()> {
    let path_len = self.cached_path_len();
    if nodes.is_empty() {
      return Ok(());
    }
    let last = u64::from(start_index) + nodes.len() as u64 - 1;
    if path_len == 0 || last >= 1u64 << path_len {
      return Err(Error::LeafIndexOutOfBounds { index: last, capacity: 1u64 << path_len });
    }
    let mut start = (1usize << path_len) + start_index as usize;
    let mut end = start + nodes.len() - 1;
    self.nodes[start - 2..=end - 2].copy_from_slice(nodes);
    for level in (self.max_depth - path_len + 1)..self.max_depth {
      start >>= 1;
      end >>= 1;
      for node in start..=end {
        let left = self.value_or_empty(node << 1, level - 1);
        let right = self.value_or_empty((node << 1) + 1, level - 1);
        self.nodes[node - 2] = hash_pair(&left, &right);
      }
    }
    Ok(())
  }

  fn value_or_empty(&self, node_index: usize, level: u32) -> Node {
    match self.nodes[node_index - 2] {
      EMPTY => empty_node(level),
      node => node,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::changelog::roll::MerkleRoll;
  use crate::config::TreeShape;
  use crate::hashtree::merkle::MerkleTree;
  use crate::leaf_from_seed;

  #[test]
  fn length_checks() {
    assert_eq!(2, Canopy::from_bytes(&[0u8; 6 * 32], 5).unwrap().cached_path_len());
    assert_eq!(0, Canopy::from_bytes(&[], 5).unwrap().cached_path_len());
    assert!(matches!(Canopy::from_bytes(&[0u8; 33], 5), Err(Error::CanopyLengthMismatch { len: 33, max_depth: 5 })));
    assert!(Canopy::from_bytes(&[0u8; 5 * 32], 5).is_err());
    assert!(Canopy::from_bytes(&[0u8; 62 * 32], 4).is_err());
    assert_eq!(30 * 32, Canopy::byte_len(4));
    assert_eq!(Canopy::byte_len(3), Canopy::new(5, 3).unwrap().to_bytes().len());
  }

  #[test]
  fn canopy_completes_truncated_proofs() {
    let depth = 5;
    let levels = 3;
    let mut roll = MerkleRoll::new(TreeShape::new(depth, 8)).unwrap();
    roll.initialize().unwrap();
    let mut canopy = Canopy::new(depth, levels).unwrap();
    let mut tree = MerkleTree::new(&vec![EMPTY; 1 << depth]).unwrap();
    for i in 0..11u64 {
      roll.append(leaf_from_seed(i)).unwrap();
      tree.update_leaf(i, leaf_from_seed(i)).unwrap();
      canopy.update(&roll.change_log_event([0u8; 32]));
    }

    for i in [0u64, 3, 10, 17, 31] {
      let full = tree.get_proof(i).unwrap();
      let mut proof = tree.get_partial_proof(i, depth - levels).unwrap().proof;
      canopy.fill_in_proof(i as u32, &mut proof);
      assert_eq!(full.proof, proof, "leaf {i}");
    }

    // a proof already at full length is left alone
    let mut proof = tree.get_proof(4).unwrap().proof;
    canopy.fill_in_proof(4, &mut proof);
    assert_eq!(tree.get_proof(4).unwrap().proof, proof);
  }

  #[test]
  fn set_leaf_nodes_rebuilds_upper_levels() {
    let depth = 4;
    let leaves = (0..16).map(leaf_from_seed).collect::<Vec<_>>();
    let tree = MerkleTree::new(&leaves).unwrap();
    let mut canopy = Canopy::new(depth, 2).unwrap();
    let lowest = (0..4u64).map(|i| tree.get_proof(i * 4).unwrap()).map(|p| hash_pair(&hash_pair(&p.leaf, &p.proof[0]), &p.proof[1]));
    canopy.set_leaf_nodes(0, &lowest.collect::<Vec<_>>()).unwrap();

    let mut proof = tree.get_partial_proof(13, 2).unwrap().proof;
    canopy.fill_in_proof(13, &mut proof);
    assert_eq!(tree.get_proof(13).unwrap().proof, proof);
    assert!(canopy.set_leaf_nodes(3, &[EMPTY, EMPTY]).is_err());
  }
}
