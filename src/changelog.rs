//! Records of recent root transitions kept by the ledger program, and the change events derived from them.
use crate::TreeId;
use crate::index::path_node_index;
use crate::node::{EMPTY, Node, hash_pair};
use crate::store::TreeRow;

pub mod account;
pub mod roll;

/// One root transition: the new root, the new leaf-to-root path (leaf first) and the changed leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLog {
  pub root: Node,
  pub path: Vec<Node>,
  pub index: u32,
}

impl ChangeLog {
  pub fn new(max_depth: u32) -> Self {
    ChangeLog { root: EMPTY, path: vec![EMPTY; max_depth as usize], index: 0 }
  }

  pub fn get_leaf(&self) -> Node {
    self.path.first().copied().unwrap_or(self.root)
  }

  /// Writes the path of `leaf` at `index` under `proof` and returns the resulting root.
  pub fn replace_and_recompute_path(&mut self, index: u32, leaf: Node, proof: &[Node]) -> Node {
    self.index = index;
    let mut node = leaf;
    for (i, sibling) in proof.iter().enumerate().take(self.path.len()) {
      self.path[i] = node;
      node = if (index >> i) & 1 == 0 { hash_pair(&node, sibling) } else { hash_pair(sibling, &node) };
    }
    self.root = node;
    node
  }

  /// Brings a proof for `leaf_index` that predates this change up to date.
  ///
  /// If this change touched a different leaf, the two paths share every node above the highest
  /// differing bit of the indices, and the proof node at that bit is exactly this change's path
  /// node. If it touched the same leaf, the leaf itself is replaced instead.
  pub fn update_proof_or_leaf(&self, leaf_index: u32, proof: &mut [Node], leaf: &mut Node) {
    if leaf_index != self.index {
      let critbit = (u32::BITS - 1 - (leaf_index ^ self.index).leading_zeros()) as usize;
      if critbit < proof.len() && critbit < self.path.len() {
        proof[critbit] = self.path[critbit];
      }
    } else {
      *leaf = self.get_leaf();
    }
  }
}

/// Proof to the rightmost leaf, kept so that appends need no caller-supplied proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
  pub proof: Vec<Node>,
  pub leaf: Node,
  /// Index of the next leaf to append.
  pub index: u32,
}

impl Path {
  pub fn new(max_depth: u32) -> Self {
    Path { proof: vec![EMPTY; max_depth as usize], leaf: EMPTY, index: 0 }
  }
}

/// A changed node tagged with its tree-space index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
  pub node: Node,
  pub index: u64,
}

/// What the ledger emits for every successful modification: the full leaf-to-root path with
/// tree-space indices, the root last at index 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEvent {
  pub id: TreeId,
  pub path: Vec<PathNode>,
  pub seq: u64,
  pub index: u32,
}

impl ChangeLogEvent {
  pub fn from_change_log(change_log: &ChangeLog, id: TreeId, seq: u64) -> Self {
    let path_len = change_log.path.len() as u32;
    let mut path = change_log
      .path
      .iter()
      .enumerate()
      .map(|(level, node)| PathNode { node: *node, index: path_node_index(change_log.index, level as u32, path_len) })
      .collect::<Vec<_>>();
    path.push(PathNode { node: change_log.root, index: 1 });
    ChangeLogEvent { id, path, seq, index: change_log.index }
  }

  pub fn root(&self) -> Option<Node> {
    self.path.last().map(|n| n.node)
  }

  pub fn leaf(&self) -> Option<Node> {
    self.path.first().map(|n| n.node)
  }

  /// Rows a collector persists for this event; the root row carries the tree height as its level.
  pub fn to_rows(&self) -> Vec<TreeRow> {
    self
      .path
      .iter()
      .enumerate()
      .map(|(level, n)| TreeRow { tree_id: self.id, node_index: n.index, seq: self.seq, level: level as u32, hash: n.node })
      .collect()
  }
}
