//! Translation between leaf-space indices (0-based, left to right among the leaves) and tree-space
//! node indices (1-based level order, root = 1, children of `i` are `2i` and `2i + 1`).
//!
//! ```text
//!             1                 level 2 (= max_depth)
//!        2         3            level 1
//!      4   5     6   7          level 0 (leaves 0..=3)
//! ```
//!
//! All functions are total; callers are responsible for keeping `leaf_index < 2^max_depth`.

/// Tree-space index of the leaf `leaf_index` in a tree of height `max_depth`.
#[inline]
pub fn to_node_index(leaf_index: u64, max_depth: u32) -> u64 {
  (1u64 << max_depth).wrapping_add(leaf_index)
}

/// Leaf-space index of the tree-space leaf node `node_index` in a tree of height `max_depth`.
#[inline]
pub fn to_leaf_index(node_index: u64, max_depth: u32) -> u64 {
  node_index.wrapping_sub(1u64 << max_depth)
}

/// Distance from the root, i.e. `floor(log2(node_index))`. The root is at distance 0.
#[inline]
pub fn distance_from_root(node_index: u64) -> u32 {
  debug_assert!(node_index > 0);
  u64::BITS - 1 - node_index.leading_zeros()
}

/// Height of `node_index` above the leaves in a tree of height `max_depth`.
#[inline]
pub fn node_level(node_index: u64, max_depth: u32) -> u32 {
  max_depth - distance_from_root(node_index)
}

/// 0-based position of the node among the nodes sharing its level.
#[inline]
pub fn position_in_level(node_index: u64) -> u64 {
  node_index - (1u64 << distance_from_root(node_index))
}

#[inline]
pub fn sibling_index(node_index: u64) -> u64 {
  if node_index % 2 == 0 { node_index + 1 } else { node_index - 1 }
}

/// First node index of the level below the one holding `node_index`.
#[inline]
pub fn next_level_start(node_index: u64) -> u64 {
  1u64 << (distance_from_root(node_index) + 1)
}

/// Tree-space index of the node at `level` on the path of the leaf `index`, for a path of `path_len`
/// nodes below the root. Changelog paths may stop above the true leaf level, hence `path_len`.
#[inline]
pub fn path_node_index(index: u32, level: u32, path_len: u32) -> u64 {
  (1u64 << (path_len - level)) + (u64::from(index) >> level)
}

/// Siblings of every node on the way from `node_index` up to (not including) the root.
pub fn proof_node_indices(node_index: u64) -> Vec<u64> {
  let mut indices = Vec::with_capacity(distance_from_root(node_index.max(1)) as usize);
  let mut current = node_index;
  while current > 1 {
    indices.push(sibling_index(current));
    current >>= 1;
  }
  indices
}

/// Every node index a proof for `node_index` needs: the siblings, the root and the node itself.
pub fn proof_fetch_indices(node_index: u64) -> Vec<u64> {
  let mut indices = proof_node_indices(node_index);
  indices.push(1);
  indices.push(node_index);
  indices
}
