use std::path::Path;

use ::rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch};
use tracing::debug;

use crate::TreeId;
use crate::error::Result;
use crate::node::{EMPTY, Node};
use crate::store::{RowStore, TreeRow};

const KEY_SIZE: usize = 32 + 8 + 8;
const VALUE_SIZE: usize = 4 + 32;

/// Row store on RocksDB.
///
/// Keys are `tree_id || node_index || seq` with both integers big-endian so that one node's history
/// is contiguous and ordered by sequence. Values are `level` little-endian followed by the hash.
pub struct RocksRowStore {
  db: DB,
}

impl RocksRowStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    let db = DB::open(&opts, path)?;
    Ok(RocksRowStore { db })
  }

  pub fn from_db(db: DB) -> Self {
    RocksRowStore { db }
  }

  /// Newest row of `node_index` with `seq <= max_seq`.
  fn latest(&self, tree_id: &TreeId, node_index: u64, max_seq: u64) -> Result<Option<TreeRow>> {
    let start = encode_key(tree_id, node_index, max_seq);
    match self.db.iterator(IteratorMode::From(&start, Direction::Reverse)).next() {
      Some(item) => {
        let (key, value) = item?;
        if key.len() == KEY_SIZE && key[..40] == start[..40] { Ok(decode_row(&key, &value)) } else { Ok(None) }
      }
      None => Ok(None),
    }
  }
}

impl RowStore for RocksRowStore {
  fn get_rows_for_nodes(&self, tree_id: &TreeId, node_indices: &[u64], max_seq: u64) -> Result<Vec<TreeRow>> {
    let mut rows = Vec::with_capacity(node_indices.len());
    for &node_index in node_indices {
      if let Some(row) = self.latest(tree_id, node_index, max_seq)? {
        rows.push(row);
      }
    }
    Ok(rows)
  }

  fn get_rows(&self, tree_id: &TreeId, max_seq: u64) -> Result<Vec<TreeRow>> {
    let start = encode_key(tree_id, 0, 0);
    let mut rows = Vec::new();
    for item in self.db.iterator(IteratorMode::From(&start, Direction::Forward)) {
      let (key, value) = item?;
      if key.len() != KEY_SIZE || key[..32] != tree_id[..] {
        break;
      }
      if let Some(row) = decode_row(&key, &value).filter(|row| row.seq <= max_seq) {
        rows.push(row);
      }
    }
    debug!(rows = rows.len(), max_seq, "scanned tree rows");
    Ok(rows)
  }

  fn get_depth(&self, tree_id: &TreeId) -> Result<Option<u32>> {
    Ok(self.latest(tree_id, 1, u64::MAX)?.map(|row| row.level))
  }

  fn put_rows(&self, rows: &[TreeRow]) -> Result<()> {
    let mut batch = WriteBatch::default();
    for row in rows {
      batch.put(encode_key(&row.tree_id, row.node_index, row.seq), encode_value(row.level, &row.hash));
    }
    self.db.write(batch)?;
    Ok(())
  }
}

fn encode_key(tree_id: &TreeId, node_index: u64, seq: u64) -> [u8; KEY_SIZE] {
  let mut key = [0u8; KEY_SIZE];
  key[..32].copy_from_slice(tree_id);
  key[32..40].copy_from_slice(&node_index.to_be_bytes());
  key[40..].copy_from_slice(&seq.to_be_bytes());
  key
}

fn encode_value(level: u32, hash: &Node) -> [u8; VALUE_SIZE] {
  let mut value = [0u8; VALUE_SIZE];
  value[..4].copy_from_slice(&level.to_le_bytes());
  value[4..].copy_from_slice(hash);
  value
}

fn decode_row(key: &[u8], value: &[u8]) -> Option<TreeRow> {
  if key.len() != KEY_SIZE || value.len() != VALUE_SIZE {
    return None;
  }
  let mut tree_id = [0u8; 32];
  tree_id.copy_from_slice(&key[..32]);
  let node_index = u64::from_be_bytes(key[32..40].try_into().ok()?);
  let seq = u64::from_be_bytes(key[40..].try_into().ok()?);
  let level = u32::from_le_bytes(value[..4].try_into().ok()?);
  let mut hash = EMPTY;
  hash.copy_from_slice(&value[4..]);
  Some(TreeRow { tree_id, node_index, seq, level, hash })
}
