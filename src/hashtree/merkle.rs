use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::hashtree::{HashTree, MerkleProof, recompute};
use crate::node::{EMPTY, NODE_SIZE, Node, empty_node, hash_pair};

type NodeId = usize;

/// Node of the in-memory tree, stored in the tree's arena.
#[derive(Debug, Clone)]
pub struct TreeNode {
  pub value: Node,
  /// Height above the leaves; leaves are at level 0.
  pub level: u32,
  /// `(left, right)` arena ids, `None` for leaves and synthetic padding.
  pub children: Option<(NodeId, NodeId)>,
  /// Back-reference used to walk upwards; never owning.
  pub parent: Option<NodeId>,
  /// Construction order; only meaningful for telling padding nodes apart while debugging.
  pub sequence_id: u64,
}

impl TreeNode {
  fn new_leaf(value: Node, level: u32, sequence_id: u64) -> Self {
    TreeNode { value, level, children: None, parent: None, sequence_id }
  }

  fn new_internal(left: (NodeId, &TreeNode), right: (NodeId, &TreeNode), sequence_id: u64) -> Self {
    debug_assert_eq!(left.1.level, right.1.level);
    let value = hash_pair(&left.1.value, &right.1.value);
    TreeNode { value, level: left.1.level + 1, children: Some((left.0, right.0)), parent: None, sequence_id }
  }

  pub fn is_leaf(&self) -> bool {
    self.children.is_none()
  }
}

/// Complete binary Merkle tree held in memory.
///
/// Nodes live in an arena indexed by integer id. Parents own their children by id and children
/// keep a plain back-reference to their parent, so walking up and down are both O(1) per step.
/// The tree is not meant for concurrent mutation: [`MerkleTree::update_leaf`] rewrites every
/// ancestor in place.
#[derive(Debug, Clone)]
pub struct MerkleTree {
  nodes: Vec<TreeNode>,
  leaves: Vec<NodeId>,
  root: NodeId,
  root_value: Node,
}

impl MerkleTree {
  /// Builds the tree bottom-up from the given 32-byte leaves.
  ///
  /// Nodes are paired in FIFO order. A node left without a partner on its level is paired with the
  /// empty-subtree hash of that level, so any leaf count works and the result equals padding the
  /// leaves with [`EMPTY`] up to the next power of two.
  pub fn new<L: AsRef<[u8]>>(leaves: &[L]) -> Result<Self> {
    if leaves.is_empty() {
      return Err(Error::NoLeaves);
    }
    let mut nodes = Vec::with_capacity(2 * leaves.len());
    let mut queue = VecDeque::with_capacity(leaves.len());
    let mut sequence_id = 0u64;
    for (index, leaf) in leaves.iter().enumerate() {
      let bytes = leaf.as_ref();
      let value: Node = bytes.try_into().map_err(|_| Error::InvalidLeafSize { index, len: bytes.len() })?;
      nodes.push(TreeNode::new_leaf(value, 0, sequence_id));
      queue.push_back(nodes.len() - 1);
      sequence_id += 1;
    }
    let leaf_ids = (0..leaves.len()).collect::<Vec<_>>();

    while queue.len() > 1 {
      let (Some(left), Some(next)) = (queue.pop_front(), queue.front().copied()) else { break };
      let level = nodes[left].level;
      let right = if nodes[next].level == level {
        queue.pop_front();
        next
      } else {
        nodes.push(TreeNode::new_leaf(empty_node(level), level, sequence_id));
        sequence_id += 1;
        nodes.len() - 1
      };
      let parent = TreeNode::new_internal((left, &nodes[left]), (right, &nodes[right]), sequence_id);
      sequence_id += 1;
      let id = nodes.len();
      nodes.push(parent);
      nodes[left].parent = Some(id);
      nodes[right].parent = Some(id);
      queue.push_back(id);
    }

    let root = queue.pop_front().ok_or(Error::NoLeaves)?;
    let root_value = nodes[root].value;
    Ok(MerkleTree { nodes, leaves: leaf_ids, root, root_value })
  }

  /// Pads `leaves` with [`EMPTY`] up to `2^max_depth` entries and builds the tree.
  pub fn sparse_from_leaves<L: AsRef<[u8]>>(leaves: &[L], max_depth: u32) -> Result<Self> {
    let capacity = 1u64 << max_depth;
    if leaves.len() as u64 > capacity {
      return Err(Error::LeafIndexOutOfBounds { index: leaves.len() as u64 - 1, capacity });
    }
    let mut padded = Vec::with_capacity(capacity as usize);
    for (index, leaf) in leaves.iter().enumerate() {
      let bytes = leaf.as_ref();
      if bytes.len() != NODE_SIZE {
        return Err(Error::InvalidLeafSize { index, len: bytes.len() });
      }
      padded.push(bytes.to_vec());
    }
    padded.resize(capacity as usize, EMPTY.to_vec());
    Self::new(&padded)
  }

  pub fn get_root(&self) -> Node {
    self.root_value
  }

  /// Number of levels, leaves included.
  pub fn depth(&self) -> u32 {
    self.nodes[self.root].level + 1
  }

  /// Number of caller-supplied leaves (padding excluded).
  pub fn len(&self) -> usize {
    self.leaves.len()
  }

  pub fn is_empty(&self) -> bool {
    self.leaves.is_empty()
  }

  pub fn get_leaf(&self, leaf_index: u64) -> Result<Node> {
    Ok(self.nodes[self.leaf_id(leaf_index)?].value)
  }

  pub fn get_proof(&self, leaf_index: u64) -> Result<MerkleProof> {
    self.collect_proof(leaf_index, None)
  }

  /// Proof holding only the `height` lowest siblings, for callers that keep the upper levels in a canopy.
  pub fn get_partial_proof(&self, leaf_index: u64, height: u32) -> Result<MerkleProof> {
    self.collect_proof(leaf_index, Some(height))
  }

  /// Replaces a leaf and rehashes every ancestor up to the root.
  pub fn update_leaf(&mut self, leaf_index: u64, value: Node) -> Result<()> {
    let leaf = self.leaf_id(leaf_index)?;
    self.nodes[leaf].value = value;
    let mut current = self.nodes[leaf].parent;
    while let Some(id) = current {
      let (left, right) = self.children_of(id)?;
      self.nodes[id].value = hash_pair(&self.nodes[left].value, &self.nodes[right].value);
      current = self.nodes[id].parent;
    }
    self.root_value = self.nodes[self.root].value;
    Ok(())
  }

  pub fn hash_proof(proof: &MerkleProof) -> Node {
    recompute(proof.leaf, &proof.proof, proof.leaf_index)
  }

  pub fn verify(root: &Node, proof: &MerkleProof) -> bool {
    Self::hash_proof(proof) == *root
  }

  fn leaf_id(&self, leaf_index: u64) -> Result<NodeId> {
    usize::try_from(leaf_index)
      .ok()
      .and_then(|i| self.leaves.get(i).copied())
      .ok_or(Error::LeafIndexOutOfBounds { index: leaf_index, capacity: self.leaves.len() as u64 })
  }

  fn children_of(&self, id: NodeId) -> Result<(NodeId, NodeId)> {
    let node = &self.nodes[id];
    node.children.ok_or(Error::InvariantViolation { level: node.level, stored: node.value, recomputed: EMPTY })
  }

  fn collect_proof(&self, leaf_index: u64, max_height: Option<u32>) -> Result<MerkleProof> {
    let leaf = self.leaf_id(leaf_index)?;
    let mut proof = Vec::with_capacity(self.nodes[self.root].level as usize);
    let mut current = leaf;
    while let Some(parent) = self.nodes[current].parent {
      if max_height.is_some_and(|height| proof.len() as u32 >= height) {
        break;
      }
      let (left, right) = self.children_of(parent)?;
      let sibling = if left == current { right } else { left };
      proof.push(self.nodes[sibling].value);

      let recomputed = hash_pair(&self.nodes[left].value, &self.nodes[right].value);
      let stored = &self.nodes[parent];
      if recomputed != stored.value {
        return Err(Error::InvariantViolation { level: stored.level, stored: stored.value, recomputed });
      }
      current = parent;
    }
    Ok(MerkleProof { leaf_index, leaf: self.nodes[leaf].value, root: self.root_value, proof })
  }
}

impl HashTree for MerkleTree {
  type Error = Error;

  fn depth(&self) -> Result<u32> {
    Ok(MerkleTree::depth(self))
  }

  fn root(&self) -> Result<Node> {
    Ok(self.get_root())
  }

  fn proof(&self, leaf_index: u64) -> Result<MerkleProof> {
    self.get_proof(leaf_index)
  }
}
