//! Proof assembly from persisted tree rows.
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::TreeId;
use crate::error::{Error, Result};
use crate::hashtree::{HashTree, MerkleProof, recompute};
use crate::index::{distance_from_root, node_level, position_in_level, proof_fetch_indices, to_leaf_index, to_node_index};
use crate::node::{MAX_SUPPORTED_DEPTH, empty_node};
use crate::store::{RowStore, TreeRow};

/// Builds the proof for `node_index` out of the rows visible at `max_seq`.
///
/// `rows` only needs to cover the indices of [`proof_fetch_indices`]; other trees, other nodes and
/// rows newer than `max_seq` are ignored. Missing siblings are empty subtrees. The root row fixes the
/// tree height, and the returned root is always the one recomputed from the assembled proof.
pub fn assemble_proof(tree_id: &TreeId, node_index: u64, max_seq: u64, rows: &[TreeRow]) -> Result<MerkleProof> {
  let mut latest = HashMap::<u64, &TreeRow>::with_capacity(rows.len());
  for row in rows.iter().filter(|r| r.tree_id == *tree_id && r.seq <= max_seq) {
    latest.entry(row.node_index).and_modify(|r| if row.seq > r.seq { *r = row }).or_insert(row);
  }

  let root = latest.get(&1).ok_or(Error::RootNotFound { tree_id: *tree_id, max_seq })?;
  let max_depth = stored_depth(root)?;
  if node_index == 0 || distance_from_root(node_index) > max_depth {
    return Err(Error::LeafIndexOutOfBounds { index: node_index, capacity: to_node_index(1u64 << max_depth, max_depth) });
  }

  let base_level = node_level(node_index, max_depth);
  let leaf = latest.get(&node_index).map(|r| r.hash).unwrap_or_else(|| empty_node(base_level));
  let mut proof = (base_level..max_depth).map(empty_node).collect::<Vec<_>>();
  let mut current = node_index;
  for slot in proof.iter_mut() {
    if let Some(row) = latest.get(&(current ^ 1)) {
      slot.copy_from_slice(&row.hash);
    }
    current >>= 1;
  }

  let leaf_index = if base_level == 0 { to_leaf_index(node_index, max_depth) } else { position_in_level(node_index) };
  let recomputed = recompute(leaf, &proof, leaf_index);
  if recomputed != root.hash {
    warn!(
      node_index,
      max_seq,
      "assembled proof does not hash to the stored root: stored {}, recomputed {}",
      hex::encode(&root.hash),
      hex::encode(&recomputed)
    );
  }
  Ok(MerkleProof { leaf_index, leaf, root: recomputed, proof })
}

/// Height recorded in a root row, refusing heights no supported tree can have.
fn stored_depth(root: &TreeRow) -> Result<u32> {
  if root.level as usize > MAX_SUPPORTED_DEPTH {
    warn!(level = root.level, seq = root.seq, "root row is deeper than any supported tree");
    return Err(Error::TreeTooDeep { depth: root.level });
  }
  Ok(root.level)
}

/// Fetches the rows a proof needs in one query and assembles it.
pub fn get_merkle_proof<S: RowStore + ?Sized>(store: &S, tree_id: &TreeId, node_index: u64, max_seq: u64) -> Result<MerkleProof> {
  let indices = proof_fetch_indices(node_index);
  let rows = store.get_rows_for_nodes(tree_id, &indices, max_seq)?;
  debug!(node_index, max_seq, requested = indices.len(), found = rows.len(), "fetched proof rows");
  assemble_proof(tree_id, node_index, max_seq, &rows)
}

/// A tree as persisted in a row store, frozen at `max_seq`.
pub struct StoredTree<'a, S: ?Sized> {
  store: &'a S,
  tree_id: TreeId,
  max_seq: u64,
}

impl<'a, S: RowStore + ?Sized> StoredTree<'a, S> {
  pub fn new(store: &'a S, tree_id: TreeId, max_seq: u64) -> Self {
    StoredTree { store, tree_id, max_seq }
  }

  fn root_row(&self) -> Result<TreeRow> {
    let mut rows = self.store.get_rows_for_nodes(&self.tree_id, &[1], self.max_seq)?;
    rows.pop().ok_or(Error::RootNotFound { tree_id: self.tree_id, max_seq: self.max_seq })
  }
}

impl<S: RowStore + ?Sized> HashTree for StoredTree<'_, S> {
  type Error = Error;

  fn depth(&self) -> Result<u32> {
    Ok(stored_depth(&self.root_row()?)? + 1)
  }

  fn root(&self) -> Result<crate::node::Node> {
    Ok(self.root_row()?.hash)
  }

  fn proof(&self, leaf_index: u64) -> Result<MerkleProof> {
    let max_depth = stored_depth(&self.root_row()?)?;
    if leaf_index >= 1u64 << max_depth {
      return Err(Error::LeafIndexOutOfBounds { index: leaf_index, capacity: 1u64 << max_depth });
    }
    get_merkle_proof(self.store, &self.tree_id, to_node_index(leaf_index, max_depth), self.max_seq)
  }
}
