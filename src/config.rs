use crate::error::{Error, Result};
use crate::node::MAX_SUPPORTED_DEPTH;

/// `(max_depth, max_buffer_size)` pairs the ledger program allocates accounts for.
pub const SUPPORTED_SHAPES: &[(u32, u32)] = &[
  (3, 8),
  (5, 8),
  (14, 64),
  (14, 256),
  (14, 1024),
  (14, 2048),
  (20, 64),
  (20, 256),
  (20, 1024),
  (20, 2048),
  (24, 64),
  (24, 256),
  (24, 512),
  (24, 1024),
  (24, 2048),
  (26, 512),
  (26, 1024),
  (26, 2048),
  (30, 512),
  (30, 1024),
  (30, 2048),
];

/// Dimensions of a concurrent tree: its height and the length of its changelog ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
  pub max_depth: u32,
  pub max_buffer_size: u32,
}

macro_rules! property_decl {
  ($name:ident, $type:ident) => {
    pub fn $name(mut self, $name: $type) -> Self {
      self.$name = $name;
      self
    }
  };
}

impl TreeShape {
  pub fn new(max_depth: u32, max_buffer_size: u32) -> Self {
    TreeShape { max_depth, max_buffer_size }
  }

  property_decl!(max_depth, u32);
  property_decl!(max_buffer_size, u32);

  /// Depth must fit the changelog bit arithmetic and the ring length must be a power of two.
  pub fn check(&self) -> Result<()> {
    if self.max_depth == 0 || self.max_depth as usize > MAX_SUPPORTED_DEPTH || !self.max_buffer_size.is_power_of_two() {
      return Err(Error::UnsupportedTreeShape { max_depth: self.max_depth, max_buffer_size: self.max_buffer_size });
    }
    Ok(())
  }

  pub fn is_supported(&self) -> bool {
    SUPPORTED_SHAPES.contains(&(self.max_depth, self.max_buffer_size))
  }

  /// Number of leaves the tree can hold.
  pub fn capacity(&self) -> u64 {
    1u64 << self.max_depth
  }

  pub(crate) fn mask(&self) -> u64 {
    u64::from(self.max_buffer_size) - 1
  }
}

impl Default for TreeShape {
  fn default() -> Self {
    TreeShape { max_depth: 14, max_buffer_size: 64 }
  }
}
