//! Persisted tree rows: the per-node history a collector writes for every change event.
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::TreeId;
use crate::changelog::ChangeLogEvent;
use crate::error::Result;
use crate::node::Node;

pub mod rocksdb;

pub use self::rocksdb::RocksRowStore;

/// Value of one tree node as of `seq`. `node_index` is 1-based in level order; `level` counts
/// from the leaves so the root row carries the tree height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRow {
  pub tree_id: TreeId,
  pub node_index: u64,
  pub seq: u64,
  pub level: u32,
  pub hash: Node,
}

/// Query surface over persisted rows.
///
/// Queries are snapshot reads bounded by `max_seq`: for each node only the newest row with
/// `seq <= max_seq` is visible, and nodes without such a row are simply left out.
pub trait RowStore {
  /// Newest visible row of each requested node.
  fn get_rows_for_nodes(&self, tree_id: &TreeId, node_indices: &[u64], max_seq: u64) -> Result<Vec<TreeRow>>;

  /// Every row of the tree with `seq <= max_seq`, ordered by node index then sequence.
  fn get_rows(&self, tree_id: &TreeId, max_seq: u64) -> Result<Vec<TreeRow>>;

  /// Height of the tree as recorded on its newest root row.
  fn get_depth(&self, tree_id: &TreeId) -> Result<Option<u32>>;

  fn put_rows(&self, rows: &[TreeRow]) -> Result<()>;

  fn put_event(&self, event: &ChangeLogEvent) -> Result<()> {
    self.put_rows(&event.to_rows())
  }
}

type RowKey = (TreeId, u64, u64);

/// In-memory row store; clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemRowStore {
  rows: Arc<RwLock<BTreeMap<RowKey, (u32, Node)>>>,
}

impl MemRowStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn latest(rows: &BTreeMap<RowKey, (u32, Node)>, tree_id: &TreeId, node_index: u64, max_seq: u64) -> Option<TreeRow> {
    rows
      .range((*tree_id, node_index, 0)..=(*tree_id, node_index, max_seq))
      .next_back()
      .map(|(&(tree_id, node_index, seq), &(level, hash))| TreeRow { tree_id, node_index, seq, level, hash })
  }
}

impl RowStore for MemRowStore {
  fn get_rows_for_nodes(&self, tree_id: &TreeId, node_indices: &[u64], max_seq: u64) -> Result<Vec<TreeRow>> {
    let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
    Ok(node_indices.iter().filter_map(|&i| Self::latest(&rows, tree_id, i, max_seq)).collect())
  }

  fn get_rows(&self, tree_id: &TreeId, max_seq: u64) -> Result<Vec<TreeRow>> {
    let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
    Ok(
      rows
        .range((*tree_id, 0, 0)..=(*tree_id, u64::MAX, u64::MAX))
        .filter(|((_, _, seq), _)| *seq <= max_seq)
        .map(|(&(tree_id, node_index, seq), &(level, hash))| TreeRow { tree_id, node_index, seq, level, hash })
        .collect(),
    )
  }

  fn get_depth(&self, tree_id: &TreeId) -> Result<Option<u32>> {
    let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
    Ok(Self::latest(&rows, tree_id, 1, u64::MAX).map(|row| row.level))
  }

  fn put_rows(&self, rows: &[TreeRow]) -> Result<()> {
    let mut map = self.rows.write().unwrap_or_else(PoisonError::into_inner);
    for row in rows {
      map.insert((row.tree_id, row.node_index, row.seq), (row.level, row.hash));
    }
    Ok(())
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::leaf_from_seed;

  pub(crate) fn row(tree_id: TreeId, node_index: u64, seq: u64, level: u32) -> TreeRow {
    TreeRow { tree_id, node_index, seq, level, hash: leaf_from_seed(node_index * 1000 + seq) }
  }

  /// Behaviour every row store must share.
  pub(crate) fn snapshot_reads<S: RowStore>(store: &S) {
    let a = [1u8; 32];
    let b = [2u8; 32];
    store.put_rows(&[row(a, 1, 1, 3), row(a, 1, 4, 3), row(a, 9, 2, 0), row(a, 9, 5, 0), row(b, 1, 1, 7)]).unwrap();

    let rows = store.get_rows_for_nodes(&a, &[1, 9, 12], 3).unwrap();
    assert_eq!(vec![row(a, 1, 1, 3), row(a, 9, 2, 0)], rows);
    let rows = store.get_rows_for_nodes(&a, &[9, 1], u64::MAX).unwrap();
    assert_eq!(vec![row(a, 9, 5, 0), row(a, 1, 4, 3)], rows);
    assert!(store.get_rows_for_nodes(&a, &[1, 9], 0).unwrap().is_empty());

    let rows = store.get_rows(&a, 4).unwrap();
    assert_eq!(vec![row(a, 1, 1, 3), row(a, 1, 4, 3), row(a, 9, 2, 0)], rows);
    assert_eq!(1, store.get_rows(&b, 10).unwrap().len());

    assert_eq!(Some(3), store.get_depth(&a).unwrap());
    assert_eq!(Some(7), store.get_depth(&b).unwrap());
    assert_eq!(None, store.get_depth(&[9u8; 32]).unwrap());
  }

  #[test]
  fn mem_store_snapshot_reads() {
    let store = MemRowStore::new();
    snapshot_reads(&store);
    assert_eq!(5, store.len());
  }

  #[test]
  fn mem_store_clones_share_rows() {
    let store = MemRowStore::new();
    let other = store.clone();
    other.put_rows(&[row([1u8; 32], 1, 1, 2)]).unwrap();
    assert_eq!(1, store.len());
    // rewriting the same key replaces the value
    other.put_rows(&[row([1u8; 32], 1, 1, 5)]).unwrap();
    assert_eq!(Some(5), store.get_depth(&[1u8; 32]).unwrap());
  }
}
