//! Off-chain engine for concurrent Merkle trees whose canonical root lives on a ledger.
//!
//! The crate mirrors the on-chain hashing and indexing scheme bit-for-bit, reconstructs proofs from
//! persisted tree rows, replays the on-chain changelog ring buffer and audits persisted snapshots.
use std::fs::{create_dir, metadata, read_dir};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub mod canopy;
pub mod changelog;
pub mod config;
pub mod error;
pub mod hashtree;
pub mod index;
pub mod node;
pub mod proof;
pub mod store;
pub mod validator;

pub use changelog::account::{AccountData, MerkleRollAccount, MerkleRollHeader};
pub use changelog::roll::MerkleRoll;
pub use changelog::{ChangeLog, ChangeLogEvent, Path as RightmostPath, PathNode};
pub use config::TreeShape;
pub use error::{Error, Result};
pub use hashtree::MerkleProof;
pub use hashtree::merkle::MerkleTree;
pub use node::{EMPTY, Node, empty_node, hash_pair};
pub use proof::{assemble_proof, get_merkle_proof};
pub use store::{MemRowStore, RowStore, TreeRow};
pub use validator::{TreeValidation, ValidationMismatch, validate_tree, validate_tree_in_store};

/// Identifier of a tree on the ledger (the tree account address).
pub type TreeId = [u8; 32];

/// Deterministic pseudo-random leaf for the given seed, built from four SplitMix64 outputs.
pub fn leaf_from_seed(seed: u64) -> Node {
  let mut leaf = EMPTY;
  for (i, chunk) in leaf.chunks_exact_mut(8).enumerate() {
    let z = splitmix64(seed.wrapping_mul(4).wrapping_add(i as u64).wrapping_add(0x9e3779b97f4a7c15));
    chunk.copy_from_slice(&z.to_le_bytes());
  }
  leaf
}

pub fn splitmix64(x: u64) -> u64 {
  let mut z = x;
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
  z ^ (z >> 31)
}

pub fn unique_dir(dir: &Path, prefix: &str, suffix: &str) -> std::io::Result<PathBuf> {
  for i in 0..=usize::MAX {
    let name = if i == 0 { format!("{prefix}{suffix}") } else { format!("{prefix}_{i}{suffix}") };
    let path = dir.join(name);
    match create_dir(&path) {
      Ok(()) => return Ok(path),
      Err(e) if e.kind() == ErrorKind::AlreadyExists => (),
      Err(e) => return Err(e),
    }
  }
  Err(std::io::Error::new(ErrorKind::AlreadyExists, format!("directory name space is full: {prefix}_nnn{suffix}")))
}

pub fn file_size<P: AsRef<Path>>(path: P) -> u64 {
  if path.as_ref().is_file() {
    metadata(&path).map(|m| m.len()).unwrap_or(0)
  } else if path.as_ref().is_dir() {
    read_dir(path)
      .map(|entries| {
        entries
          .flat_map(std::result::Result::ok)
          .map(|e| {
            let path = e.path();
            if path.is_dir() { file_size(&path) } else { metadata(&path).map(|m| m.len()).unwrap_or(0) }
          })
          .sum()
      })
      .unwrap_or(0)
  } else {
    0
  }
}
