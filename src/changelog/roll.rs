use tracing::debug;

use crate::TreeId;
use crate::changelog::{ChangeLog, ChangeLogEvent, Path};
use crate::config::TreeShape;
use crate::error::{Error, Result};
use crate::hashtree::{fill_in_proof, recompute};
use crate::node::{EMPTY, Node, empty_node, hash_pair};

/// Off-chain mirror of the ledger's concurrent Merkle tree state.
///
/// The ring of `max_buffer_size` changelogs lets a modification built against any root still in the
/// ring be applied: its proof is fast-forwarded through every later changelog before it is checked
/// against the current root. `active_index` points at the newest changelog and `buffer_size` counts
/// the valid entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleRoll {
  shape: TreeShape,
  pub sequence_number: u64,
  pub active_index: u64,
  pub buffer_size: u64,
  pub change_logs: Vec<ChangeLog>,
  pub rightmost_proof: Path,
}

impl MerkleRoll {
  pub fn new(shape: TreeShape) -> Result<Self> {
    shape.check()?;
    Ok(MerkleRoll {
      shape,
      sequence_number: 0,
      active_index: 0,
      buffer_size: 0,
      change_logs: vec![ChangeLog::new(shape.max_depth); shape.max_buffer_size as usize],
      rightmost_proof: Path::new(shape.max_depth),
    })
  }

  pub(crate) fn from_parts(
    shape: TreeShape,
    sequence_number: u64,
    active_index: u64,
    buffer_size: u64,
    change_logs: Vec<ChangeLog>,
    rightmost_proof: Path,
  ) -> Result<Self> {
    shape.check()?;
    if active_index >= u64::from(shape.max_buffer_size)
      || buffer_size > u64::from(shape.max_buffer_size)
      || u64::from(rightmost_proof.index) > shape.capacity()
    {
      return Err(Error::InvalidChangeLogCursor { active_index, buffer_size, rightmost_index: rightmost_proof.index });
    }
    debug_assert_eq!(shape.max_buffer_size as usize, change_logs.len());
    Ok(MerkleRoll { shape, sequence_number, active_index, buffer_size, change_logs, rightmost_proof })
  }

  pub fn shape(&self) -> TreeShape {
    self.shape
  }

  fn max_depth(&self) -> u32 {
    self.shape.max_depth
  }

  pub fn is_initialized(&self) -> bool {
    !(self.buffer_size == 0 && self.sequence_number == 0 && self.active_index == 0)
  }

  /// Sets up an empty tree whose root is the empty-subtree hash of `max_depth`.
  pub fn initialize(&mut self) -> Result<Node> {
    if self.is_initialized() {
      return Err(Error::TreeAlreadyInitialized);
    }
    let max_depth = self.max_depth();
    let empty_path = (0..max_depth).map(empty_node).collect::<Vec<_>>();
    self.rightmost_proof.proof = empty_path.clone();
    self.change_logs[0].root = empty_node(max_depth);
    self.change_logs[0].path = empty_path;
    self.sequence_number = 0;
    self.active_index = 0;
    self.buffer_size = 1;
    Ok(self.change_logs[0].root)
  }

  /// Starts from a tree built elsewhere, given its rightmost leaf and that leaf's proof.
  pub fn initialize_with_root(&mut self, root: Node, rightmost_leaf: Node, proof: &[Node], index: u32) -> Result<Node> {
    if self.is_initialized() {
      return Err(Error::TreeAlreadyInitialized);
    }
    self.check_leaf_index(index)?;
    let proof = fill_in_proof(proof, self.max_depth());
    if recompute(rightmost_leaf, &proof, u64::from(index)) != root {
      return Err(Error::InvalidProof);
    }
    self.change_logs[0].replace_and_recompute_path(index, rightmost_leaf, &proof);
    self.sequence_number = 1;
    self.active_index = 0;
    self.buffer_size = 1;
    self.rightmost_proof = Path { proof, leaf: rightmost_leaf, index: index + 1 };
    Ok(root)
  }

  pub fn get_change_log(&self) -> &ChangeLog {
    &self.change_logs[self.active_index as usize]
  }

  pub fn get_root(&self) -> Node {
    self.get_change_log().root
  }

  /// Number of successful modifications so far.
  pub fn get_seq(&self) -> u64 {
    self.sequence_number
  }

  /// Checks that `leaf` is at `index` under the current tree, given a proof for `current_root`.
  pub fn prove_leaf(&self, current_root: Node, leaf: Node, proof: &[Node], index: u32) -> Result<()> {
    self.check_leaf_index(index)?;
    if !self.is_initialized() {
      return Err(Error::TreeNotInitialized);
    }
    if index > self.rightmost_proof.index {
      return Err(Error::LeafIndexOutOfBounds { index: u64::from(index), capacity: u64::from(self.rightmost_proof.index) });
    }
    let mut proof = fill_in_proof(proof, self.max_depth());
    if !self.check_valid_leaf(current_root, leaf, &mut proof, index, true)? {
      return Err(Error::InvalidProof);
    }
    Ok(())
  }

  /// Appends `node` right after the rightmost leaf. Needs no proof.
  pub fn append(&mut self, mut node: Node) -> Result<Node> {
    if !self.is_initialized() {
      return Err(Error::TreeNotInitialized);
    }
    if node == EMPTY {
      return Err(Error::CannotAppendEmptyNode);
    }
    if u64::from(self.rightmost_proof.index) >= self.shape.capacity() {
      return Err(Error::TreeFull);
    }
    if self.rightmost_proof.index == 0 {
      return self.initialize_tree_from_append(node);
    }

    let leaf = node;
    let max_depth = self.max_depth() as usize;
    let previous = self.rightmost_proof.index - 1;
    let intersection = self.rightmost_proof.index.trailing_zeros() as usize;
    let mut change_list = vec![EMPTY; max_depth];
    let mut intersection_node = self.rightmost_proof.leaf;
    for (i, change) in change_list.iter_mut().enumerate() {
      *change = node;
      let is_left = (previous >> i) & 1 == 0;
      if i < intersection {
        let sibling = empty_node(i as u32);
        intersection_node = hash_to_parent(intersection_node, &self.rightmost_proof.proof[i], is_left);
        node = hash_pair(&node, &sibling);
        self.rightmost_proof.proof[i] = sibling;
      } else if i == intersection {
        node = hash_pair(&intersection_node, &node);
        self.rightmost_proof.proof[intersection] = intersection_node;
      } else {
        node = hash_to_parent(node, &self.rightmost_proof.proof[i], is_left);
      }
    }

    self.update_internal_counters();
    let index = self.rightmost_proof.index;
    self.change_logs[self.active_index as usize] = ChangeLog { root: node, path: change_list, index };
    self.rightmost_proof.index += 1;
    self.rightmost_proof.leaf = leaf;
    Ok(node)
  }

  /// Writes `leaf` at `index` if that slot is still empty, otherwise appends it.
  pub fn fill_empty_or_append(&mut self, current_root: Node, leaf: Node, proof: &[Node], index: u32) -> Result<Node> {
    self.check_leaf_index(index)?;
    if !self.is_initialized() {
      return Err(Error::TreeNotInitialized);
    }
    if index > self.rightmost_proof.index {
      return self.append(leaf);
    }
    let mut proof = fill_in_proof(proof, self.max_depth());
    match self.try_apply_proof(current_root, EMPTY, leaf, &mut proof, index, false) {
      Ok(root) => Ok(root),
      Err(Error::LeafContentsModified) => self.append(leaf),
      Err(e) => Err(e),
    }
  }

  /// Replaces `previous_leaf` at `index` with `new_leaf`, given a proof against `current_root`.
  pub fn set_leaf(
    &mut self,
    current_root: Node,
    previous_leaf: Node,
    new_leaf: Node,
    proof: &[Node],
    index: u32,
  ) -> Result<Node> {
    self.check_leaf_index(index)?;
    if !self.is_initialized() {
      return Err(Error::TreeNotInitialized);
    }
    if index > self.rightmost_proof.index {
      return Err(Error::LeafIndexOutOfBounds { index: u64::from(index), capacity: u64::from(self.rightmost_proof.index) });
    }
    let mut proof = fill_in_proof(proof, self.max_depth());
    self.try_apply_proof(current_root, previous_leaf, new_leaf, &mut proof, index, true)
  }

  /// Ring position of the newest changelog whose root is `current_root`.
  pub fn find_root_in_changelog(&self, current_root: Node) -> Option<u64> {
    let mask = self.shape.mask();
    (0..self.buffer_size)
      .map(|i| self.active_index.wrapping_sub(i) & mask)
      .find(|&j| self.change_logs[j as usize].root == current_root)
  }

  /// Patches `proof` through every changelog after ring position `changelog_buffer_index`, or through
  /// the whole ring when `use_full_buffer` is set. Returns `false` if `leaf` itself was replaced on the
  /// way; `leaf` then holds the replacement.
  pub fn fast_forward_proof(
    &self,
    leaf: &mut Node,
    proof: &mut [Node],
    leaf_index: u32,
    mut changelog_buffer_index: u64,
    use_full_buffer: bool,
  ) -> bool {
    debug!(start = changelog_buffer_index, active = self.active_index, use_full_buffer, "fast-forwarding proof");
    let mask = self.shape.mask();
    let mut updated_leaf = *leaf;
    loop {
      if !use_full_buffer && changelog_buffer_index == self.active_index {
        break;
      }
      changelog_buffer_index = (changelog_buffer_index + 1) & mask;
      self.change_logs[changelog_buffer_index as usize].update_proof_or_leaf(leaf_index, proof, &mut updated_leaf);
      if use_full_buffer && changelog_buffer_index == self.active_index {
        break;
      }
    }
    let unchanged = updated_leaf == *leaf;
    *leaf = updated_leaf;
    unchanged
  }

  pub fn check_valid_proof(&self, leaf: Node, proof: &[Node], leaf_index: u32) -> bool {
    self.is_initialized()
      && self.check_leaf_index(leaf_index).is_ok()
      && recompute(leaf, proof, u64::from(leaf_index)) == self.get_root()
  }

  /// Every buffered changelog, newest first, with tree-space indices attached to its path nodes.
  /// This is the join key between on-chain changelogs and persisted tree rows.
  pub fn get_changelogs_with_node_index(&self, id: TreeId) -> Vec<ChangeLogEvent> {
    let mask = self.shape.mask();
    (0..self.buffer_size)
      .map(|j| {
        let slot = self.active_index.wrapping_sub(j) & mask;
        ChangeLogEvent::from_change_log(&self.change_logs[slot as usize], id, self.sequence_number.saturating_sub(j))
      })
      .collect()
  }

  /// Event describing the newest changelog, as the ledger emits after each modification.
  pub fn change_log_event(&self, id: TreeId) -> ChangeLogEvent {
    ChangeLogEvent::from_change_log(self.get_change_log(), id, self.sequence_number)
  }

  fn check_leaf_index(&self, leaf_index: u32) -> Result<()> {
    if u64::from(leaf_index) >= self.shape.capacity() {
      return Err(Error::LeafIndexOutOfBounds { index: u64::from(leaf_index), capacity: self.shape.capacity() });
    }
    Ok(())
  }

  fn initialize_tree_from_append(&mut self, leaf: Node) -> Result<Node> {
    let mut proof = self.rightmost_proof.proof.clone();
    let old_root = recompute(EMPTY, &proof, 0);
    if old_root == empty_node(self.max_depth()) {
      self.try_apply_proof(old_root, EMPTY, leaf, &mut proof, 0, false)
    } else {
      Err(Error::TreeAlreadyInitialized)
    }
  }

  fn check_valid_leaf(
    &self,
    current_root: Node,
    leaf: Node,
    proof: &mut [Node],
    leaf_index: u32,
    allow_inferred_proof: bool,
  ) -> Result<bool> {
    let mask = self.shape.mask();
    let (changelog_index, use_full_buffer) = match self.find_root_in_changelog(current_root) {
      Some(index) => (index, false),
      None if allow_inferred_proof => {
        debug!("root not in changelog, replaying the full buffer");
        (self.active_index.wrapping_sub(self.buffer_size.saturating_sub(1)) & mask, true)
      }
      None => return Err(Error::RootNotInChangeLog),
    };
    let mut updated_leaf = leaf;
    if !self.fast_forward_proof(&mut updated_leaf, proof, leaf_index, changelog_index, use_full_buffer) {
      return Err(Error::LeafContentsModified);
    }
    Ok(self.check_valid_proof(updated_leaf, proof, leaf_index))
  }

  fn try_apply_proof(
    &mut self,
    current_root: Node,
    leaf: Node,
    new_leaf: Node,
    proof: &mut [Node],
    leaf_index: u32,
    allow_inferred_proof: bool,
  ) -> Result<Node> {
    debug!(
      active_index = self.active_index,
      rightmost_index = self.rightmost_proof.index,
      buffer_size = self.buffer_size,
      leaf_index,
      "applying proof"
    );
    if !self.check_valid_leaf(current_root, leaf, proof, leaf_index, allow_inferred_proof)? {
      return Err(Error::InvalidProof);
    }
    self.update_internal_counters();
    Ok(self.update_buffers_from_proof(new_leaf, proof, leaf_index))
  }

  fn update_internal_counters(&mut self) {
    self.active_index = (self.active_index + 1) & self.shape.mask();
    if self.buffer_size < u64::from(self.shape.max_buffer_size) {
      self.buffer_size += 1;
    }
    self.sequence_number = self.sequence_number.saturating_add(1);
  }

  /// Records the new path in the active changelog and keeps the rightmost proof current.
  fn update_buffers_from_proof(&mut self, start: Node, proof: &[Node], index: u32) -> Node {
    let change_log = &mut self.change_logs[self.active_index as usize];
    let root = change_log.replace_and_recompute_path(index, start, proof);
    let rightmost = &mut self.rightmost_proof;
    if u64::from(rightmost.index) < self.shape.capacity() {
      if index < rightmost.index {
        change_log.update_proof_or_leaf(rightmost.index - 1, &mut rightmost.proof, &mut rightmost.leaf);
      } else {
        debug_assert_eq!(index, rightmost.index);
        rightmost.proof.copy_from_slice(proof);
        rightmost.index = index + 1;
        rightmost.leaf = change_log.get_leaf();
      }
    }
    root
  }
}

#[inline]
fn hash_to_parent(node: Node, sibling: &Node, is_left: bool) -> Node {
  if is_left { hash_pair(&node, sibling) } else { hash_pair(sibling, &node) }
}
