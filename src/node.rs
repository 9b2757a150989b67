//! Tree node values, the parent hash and the canonical hashes of empty subtrees.
use sha3::{Digest, Keccak256};
use std::sync::OnceLock;

/// Every leaf and internal node value is a 32-byte digest.
pub type Node = [u8; 32];

pub const NODE_SIZE: usize = 32;

/// Value of an unset leaf.
pub const EMPTY: Node = [0u8; NODE_SIZE];

/// The deepest tree the on-chain program supports; empty-subtree hashes up to this level are memoized.
pub const MAX_SUPPORTED_DEPTH: usize = 30;

static EMPTY_NODES: [OnceLock<Node>; MAX_SUPPORTED_DEPTH + 1] = [const { OnceLock::new() }; MAX_SUPPORTED_DEPTH + 1];

/// Parent value of two children: `keccak256(left || right)`, identical to the ledger program.
#[inline]
pub fn hash_pair(left: &Node, right: &Node) -> Node {
  let mut hasher = Keccak256::new();
  hasher.update(left);
  hasher.update(right);
  hasher.finalize().into()
}

/// Root of a subtree of height `level` whose leaves are all [`EMPTY`].
///
/// Results up to [`MAX_SUPPORTED_DEPTH`] are cached process-wide. Each level is set at most once and
/// concurrent callers racing on the same level compute the same value, so readers never observe a
/// partially written entry.
pub fn empty_node(level: u32) -> Node {
  if level == 0 {
    return EMPTY;
  }
  match EMPTY_NODES.get(level as usize) {
    Some(cell) => {
      if let Some(node) = cell.get() {
        return *node;
      }
      let child = empty_node(level - 1);
      let node = hash_pair(&child, &child);
      let _ = cell.set(node);
      node
    }
    None => {
      let mut node = empty_node(MAX_SUPPORTED_DEPTH as u32);
      for _ in MAX_SUPPORTED_DEPTH as u32..level {
        node = hash_pair(&node, &node);
      }
      node
    }
  }
}

/// Computes the empty-subtree hash from scratch without touching the shared cache.
pub fn empty_node_uncached(level: u32) -> Node {
  let mut node = EMPTY;
  for _ in 0..level {
    node = hash_pair(&node, &node);
  }
  node
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  fn from_hex(s: &str) -> Node {
    hex::decode(s).unwrap().try_into().unwrap()
  }

  #[test]
  fn hash_pair_matches_keccak_vectors() {
    // keccak256 over 64 zero bytes and its successive squarings
    assert_eq!(from_hex("ad3228b676f7d3cd4284a5443f17f1962b36e491b30a40b2405849e597ba5fb5"), hash_pair(&EMPTY, &EMPTY));
    let level1 = hash_pair(&EMPTY, &EMPTY);
    assert_eq!(from_hex("b4c11951957c6f8f642c4af61cd6b24640fec6dc7fc607ee8206a99e92410d30"), hash_pair(&level1, &level1));
    let level2 = hash_pair(&level1, &level1);
    assert_eq!(from_hex("21ddb9a356815c3fac1026b6dec5df3124afbadb485c9ba5a3e3398a04b7ba85"), hash_pair(&level2, &level2));
  }

  #[test]
  fn hash_pair_is_ordered_and_deterministic() {
    let a = [1u8; 32];
    let b = [2u8; 32];
    assert_eq!(hash_pair(&a, &b), hash_pair(&a, &b));
    assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a));
  }

  #[test]
  fn empty_node_recursion() {
    assert_eq!(EMPTY, empty_node(0));
    for level in 1..=20 {
      let child = empty_node(level - 1);
      assert_eq!(hash_pair(&child, &child), empty_node(level), "level {level}");
      assert_eq!(empty_node_uncached(level), empty_node(level), "level {level}");
    }
  }

  #[test]
  fn empty_node_beyond_cache() {
    let level = MAX_SUPPORTED_DEPTH as u32 + 2;
    assert_eq!(empty_node_uncached(level), empty_node(level));
  }

  #[test]
  fn empty_node_far_above_cache_on_small_stack() {
    let level = 200_000;
    let node = thread::Builder::new().stack_size(64 * 1024).spawn(move || empty_node(level)).unwrap().join().unwrap();
    assert_eq!(empty_node_uncached(level), node);
  }

  #[test]
  fn empty_node_concurrent_readers() {
    let handles = (0..8)
      .map(|_| thread::spawn(|| (0..=MAX_SUPPORTED_DEPTH as u32).rev().map(empty_node).collect::<Vec<_>>()))
      .collect::<Vec<_>>();
    let expected = (0..=MAX_SUPPORTED_DEPTH as u32).rev().map(empty_node_uncached).collect::<Vec<_>>();
    for handle in handles {
      assert_eq!(expected, handle.join().unwrap());
    }
  }
}
