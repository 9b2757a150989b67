use thiserror::Error;

use crate::node::Node;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("leaf {index} is {len} bytes, expected 32")]
  InvalidLeafSize { index: usize, len: usize },

  #[error("cannot build a tree without leaves")]
  NoLeaves,

  #[error("leaf index {index} is out of bounds for {capacity} leaves")]
  LeafIndexOutOfBounds { index: u64, capacity: u64 },

  #[error("node at level {level} does not match its children: stored {}, recomputed {}", hex::encode(.stored), hex::encode(.recomputed))]
  InvariantViolation { level: u32, stored: Node, recomputed: Node },

  #[error("no root row for tree {} at or before sequence {max_seq}", hex::encode(.tree_id))]
  RootNotFound { tree_id: [u8; 32], max_seq: u64 },

  #[error("account data is {actual} bytes but its header declares {expected}")]
  MalformedAccountData { expected: usize, actual: usize },

  #[error("stored tree height {depth} exceeds the deepest supported tree")]
  TreeTooDeep { depth: u32 },

  #[error("unsupported tree shape: max_depth={max_depth}, max_buffer_size={max_buffer_size}")]
  UnsupportedTreeShape { max_depth: u32, max_buffer_size: u32 },

  #[error("root not found in the changelog buffer")]
  RootNotInChangeLog,

  #[error("leaf was modified after the proof was issued")]
  LeafContentsModified,

  #[error("proof does not verify against the current root")]
  InvalidProof,

  #[error("tree is full")]
  TreeFull,

  #[error("cannot append an empty node")]
  CannotAppendEmptyNode,

  #[error("tree has not been initialized")]
  TreeNotInitialized,

  #[error("changelog cursor is corrupt: active_index={active_index}, buffer_size={buffer_size}, rightmost_index={rightmost_index}")]
  InvalidChangeLogCursor { active_index: u64, buffer_size: u64, rightmost_index: u32 },

  #[error("tree has already been initialized")]
  TreeAlreadyInitialized,

  #[error("canopy of {len} bytes is invalid for max_depth {max_depth}")]
  CanopyLengthMismatch { len: usize, max_depth: u32 },

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  RocksDB(#[from] rocksdb::Error),
}
