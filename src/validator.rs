//! Consistency audit of a persisted tree snapshot.
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use tracing::{info, warn};

use crate::TreeId;
use crate::error::{Error, Result};
use crate::index::distance_from_root;
use crate::node::{MAX_SUPPORTED_DEPTH, Node, empty_node, hash_pair};
use crate::store::{RowStore, TreeRow};

/// First inconsistent node found by [`validate_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationMismatch {
  pub node_index: u64,
  /// Hash recomputed from the children.
  pub expected: Node,
  /// Hash stored for the node.
  pub actual: Node,
  pub left: Node,
  pub right: Node,
}

impl Display for ValidationMismatch {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "node {}: expected {} but stored {} (left {}, right {})",
      self.node_index,
      hex::encode(&self.expected),
      hex::encode(&self.actual),
      hex::encode(&self.left),
      hex::encode(&self.right)
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeValidation {
  Valid,
  Mismatch(ValidationMismatch),
  /// The recorded height is deeper than any supported tree.
  TooDeep(u32),
}

impl TreeValidation {
  pub fn is_valid(&self) -> bool {
    matches!(self, TreeValidation::Valid)
  }
}

/// Checks that every internal node visible at `max_seq` equals the hash of its two children.
///
/// `depth` is the tree height (the level of the root row). Absent children are empty subtrees.
/// Only stored nodes are visited, so unpopulated subtrees cost nothing. Nodes are checked deepest
/// first, which puts a single corrupted row at its own index rather than at its parent.
pub fn validate_tree(rows: &[TreeRow], depth: u32, tree_id: &TreeId, max_seq: u64) -> TreeValidation {
  if depth as usize > MAX_SUPPORTED_DEPTH {
    warn!("tree {} records height {depth} at seq {max_seq}", hex::encode(tree_id));
    return TreeValidation::TooDeep(depth);
  }
  let mut nodes = BTreeMap::<u64, (u64, Node)>::new();
  for row in rows.iter().filter(|r| r.tree_id == *tree_id && r.seq <= max_seq) {
    nodes
      .entry(row.node_index)
      .and_modify(|latest| {
        if row.seq > latest.0 {
          *latest = (row.seq, row.hash);
        }
      })
      .or_insert((row.seq, row.hash));
  }

  let first_leaf = 1u64 << depth;
  for (&node_index, &(_, actual)) in nodes.range(1..first_leaf).rev() {
    let child_level = depth - distance_from_root(2 * node_index);
    let child = |i: u64| nodes.get(&i).map(|(_, hash)| *hash).unwrap_or_else(|| empty_node(child_level));
    let left = child(2 * node_index);
    let right = child(2 * node_index + 1);
    let expected = hash_pair(&left, &right);
    if expected != actual {
      let mismatch = ValidationMismatch { node_index, expected, actual, left, right };
      warn!("tree {} is inconsistent at seq {max_seq}: {mismatch}", hex::encode(tree_id));
      return TreeValidation::Mismatch(mismatch);
    }
  }
  info!("tree {} validated at seq {max_seq}: {} nodes", hex::encode(tree_id), nodes.len());
  TreeValidation::Valid
}

/// Loads the height and the rows of `tree_id` from `store` and validates them.
pub fn validate_tree_in_store<S: RowStore + ?Sized>(store: &S, tree_id: &TreeId, max_seq: u64) -> Result<TreeValidation> {
  let depth = store.get_depth(tree_id)?.ok_or(Error::RootNotFound { tree_id: *tree_id, max_seq })?;
  let rows = store.get_rows(tree_id, max_seq)?;
  Ok(validate_tree(&rows, depth, tree_id, max_seq))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::changelog::roll::MerkleRoll;
  use crate::config::TreeShape;
  use crate::leaf_from_seed;
  use crate::store::MemRowStore;

  const ID: TreeId = [6u8; 32];

  fn populated(appends: u64) -> (MemRowStore, MerkleRoll) {
    let store = MemRowStore::new();
    let mut roll = MerkleRoll::new(TreeShape::new(6, 8)).unwrap();
    roll.initialize().unwrap();
    store.put_event(&roll.change_log_event(ID)).unwrap();
    for i in 0..appends {
      roll.append(leaf_from_seed(i)).unwrap();
      store.put_event(&roll.change_log_event(ID)).unwrap();
    }
    (store, roll)
  }

  #[test]
  fn single_deep_path_is_valid() {
    let depth = 14;
    let mut roll = MerkleRoll::new(TreeShape::new(depth, 64)).unwrap();
    roll.initialize().unwrap();
    roll.append(leaf_from_seed(1)).unwrap();
    let rows = roll.change_log_event(ID).to_rows();
    assert_eq!(15, rows.len());
    assert!(validate_tree(&rows, depth, &ID, 1).is_valid());
    // rows beyond the bound are invisible, leaving nothing to check
    assert!(validate_tree(&rows, depth, &ID, 0).is_valid());

    // corrupt the node at level 5 on the path
    let mut corrupted = rows.clone();
    let target = corrupted[5].node_index;
    corrupted[5].hash = leaf_from_seed(9);
    match validate_tree(&corrupted, depth, &ID, 1) {
      TreeValidation::Mismatch(m) => {
        assert_eq!(target, m.node_index);
        assert_eq!(leaf_from_seed(9), m.actual);
        assert_eq!(hash_pair(&m.left, &m.right), m.expected);
        let message = m.to_string();
        assert!(message.starts_with(&format!("node {target}: expected {}", hex::encode(m.expected))), "{message}");
        assert!(message.contains(&format!("stored {}", hex::encode(leaf_from_seed(9)))), "{message}");
      }
      other => panic!("corruption not detected: {other:?}"),
    }
  }

  #[test]
  fn history_is_validated_per_snapshot() {
    let (store, roll) = populated(20);
    for seq in 0..=roll.get_seq() {
      assert!(validate_tree_in_store(&store, &ID, seq).unwrap().is_valid(), "seq={seq}");
    }

    // a bad row at seq 21 only breaks snapshots that can see it
    let event = roll.change_log_event(ID);
    let mut bad = event.to_rows()[3];
    bad.seq = 21;
    bad.hash = leaf_from_seed(1234);
    store.put_rows(&[bad]).unwrap();
    assert!(validate_tree_in_store(&store, &ID, 20).unwrap().is_valid());
    match validate_tree_in_store(&store, &ID, 21).unwrap() {
      TreeValidation::Mismatch(m) => assert_eq!(bad.node_index, m.node_index),
      other => panic!("corruption not detected: {other:?}"),
    }
  }

  #[test]
  fn oversized_height_is_reported() {
    let root = TreeRow { tree_id: ID, node_index: 1, seq: 1, level: 64, hash: leaf_from_seed(1) };
    assert_eq!(TreeValidation::TooDeep(64), validate_tree(&[root], 64, &ID, 1));
    assert_eq!(TreeValidation::TooDeep(31), validate_tree(&[], 31, &ID, 1));

    let store = MemRowStore::new();
    store.put_rows(&[root]).unwrap();
    let result = validate_tree_in_store(&store, &ID, 1).unwrap();
    assert!(!result.is_valid());
    assert_eq!(TreeValidation::TooDeep(64), result);
  }

  #[test]
  fn foreign_rows_are_ignored() {
    let (store, _) = populated(3);
    let mut rows = store.get_rows(&ID, u64::MAX).unwrap();
    rows.push(TreeRow { tree_id: [1u8; 32], node_index: 2, seq: 1, level: 5, hash: leaf_from_seed(5) });
    assert!(validate_tree(&rows, 6, &ID, u64::MAX).is_valid());
    assert!(matches!(validate_tree_in_store(&store, &[1u8; 32], 3), Err(Error::RootNotFound { .. })));
  }
}
