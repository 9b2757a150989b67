use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use crate::canopy::Canopy;
use crate::changelog::roll::MerkleRoll;
use crate::changelog::{ChangeLog, Path};
use crate::config::TreeShape;
use crate::error::{Error, Result};
use crate::node::{EMPTY, NODE_SIZE, Node};

/// Size of [`MerkleRollHeader`] on the wire.
pub const HEADER_SIZE: usize = 4 + 4 + 32 + 32 + 8;

/// Size of the `sequence_number`, `active_index` and `buffer_size` cursor.
const CURSOR_SIZE: usize = 8 * 3;

/// Size of one changelog slot or of the rightmost path record.
fn record_size(max_depth: u32) -> usize {
  NODE_SIZE * (max_depth as usize + 1) + 4 + 4
}

/// Exact account size for a tree of this shape, excluding any canopy.
pub fn account_size(shape: TreeShape) -> usize {
  HEADER_SIZE + CURSOR_SIZE + (shape.max_buffer_size as usize + 1) * record_size(shape.max_depth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleRollHeader {
  pub max_depth: u32,
  pub max_buffer_size: u32,
  pub authority: [u8; 32],
  pub append_authority: [u8; 32],
  pub creation_slot: u64,
}

impl MerkleRollHeader {
  pub fn shape(&self) -> TreeShape {
    TreeShape::new(self.max_depth, self.max_buffer_size)
  }

  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    w.write_u32::<LittleEndian>(self.max_depth)?;
    w.write_u32::<LittleEndian>(self.max_buffer_size)?;
    w.write_all(&self.authority)?;
    w.write_all(&self.append_authority)?;
    w.write_u64::<LittleEndian>(self.creation_slot)?;
    Ok(HEADER_SIZE)
  }

  fn read<R: Read>(r: &mut R) -> Result<Self> {
    let max_depth = r.read_u32::<LittleEndian>()?;
    let max_buffer_size = r.read_u32::<LittleEndian>()?;
    let mut authority = [0u8; 32];
    r.read_exact(&mut authority)?;
    let mut append_authority = [0u8; 32];
    r.read_exact(&mut append_authority)?;
    let creation_slot = r.read_u64::<LittleEndian>()?;
    Ok(MerkleRollHeader { max_depth, max_buffer_size, authority, append_authority, creation_slot })
  }
}

/// A decoded tree account: header followed by the changelog ring and the rightmost path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleRollAccount {
  pub header: MerkleRollHeader,
  pub roll: MerkleRoll,
}

impl MerkleRollAccount {
  pub fn new(header: MerkleRollHeader) -> Result<Self> {
    let roll = MerkleRoll::new(header.shape())?;
    Ok(MerkleRollAccount { header, roll })
  }

  pub fn size(&self) -> usize {
    account_size(self.header.shape())
  }

  /// Decodes an account whose length must equal [`account_size`] for its declared shape.
  pub fn decode(bytes: &[u8]) -> Result<Self> {
    let header = Self::read_header(bytes)?;
    let expected = account_size(header.shape());
    if bytes.len() != expected {
      return Err(Error::MalformedAccountData { expected, actual: bytes.len() });
    }
    Self::decode_body(header, bytes)
  }

  /// Decodes an account followed by its canopy, which takes up every byte after the tree.
  pub fn decode_with_canopy(bytes: &[u8]) -> Result<(Self, Canopy)> {
    let header = Self::read_header(bytes)?;
    let expected = account_size(header.shape());
    if bytes.len() < expected {
      return Err(Error::MalformedAccountData { expected, actual: bytes.len() });
    }
    let (tree, canopy) = bytes.split_at(expected);
    let account = Self::decode_body(header, tree)?;
    let canopy = Canopy::from_bytes(canopy, header.max_depth)?;
    Ok((account, canopy))
  }

  pub fn encode(&self) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(self.size());
    self.header.write(&mut buffer)?;
    let roll = &self.roll;
    buffer.write_u64::<LittleEndian>(roll.sequence_number)?;
    buffer.write_u64::<LittleEndian>(roll.active_index)?;
    buffer.write_u64::<LittleEndian>(roll.buffer_size)?;
    for change_log in &roll.change_logs {
      write_record(&mut buffer, &change_log.root, &change_log.path, change_log.index)?;
    }
    let rightmost = &roll.rightmost_proof;
    write_proof_record(&mut buffer, &rightmost.proof, &rightmost.leaf, rightmost.index)?;
    debug_assert_eq!(self.size(), buffer.len());
    Ok(buffer)
  }

  fn read_header(bytes: &[u8]) -> Result<MerkleRollHeader> {
    if bytes.len() < HEADER_SIZE {
      return Err(Error::MalformedAccountData { expected: HEADER_SIZE, actual: bytes.len() });
    }
    let header = MerkleRollHeader::read(&mut Cursor::new(bytes))?;
    header.shape().check()?;
    if !header.shape().is_supported() {
      warn!("decoding tree account with unusual shape: max_depth={}, max_buffer_size={}", header.max_depth, header.max_buffer_size);
    }
    Ok(header)
  }

  fn decode_body(header: MerkleRollHeader, bytes: &[u8]) -> Result<Self> {
    let shape = header.shape();
    let max_depth = shape.max_depth as usize;
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(HEADER_SIZE as u64);
    let sequence_number = cursor.read_u64::<LittleEndian>()?;
    let active_index = cursor.read_u64::<LittleEndian>()?;
    let buffer_size = cursor.read_u64::<LittleEndian>()?;

    let mut change_logs = Vec::with_capacity(shape.max_buffer_size as usize);
    for _ in 0..shape.max_buffer_size {
      let root = read_node(&mut cursor)?;
      let path = read_nodes(&mut cursor, max_depth)?;
      let index = read_index(&mut cursor)?;
      change_logs.push(ChangeLog { root, path, index });
    }
    let proof = read_nodes(&mut cursor, max_depth)?;
    let leaf = read_node(&mut cursor)?;
    let index = read_index(&mut cursor)?;

    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
      return Err(Error::MalformedAccountData { expected: consumed, actual: bytes.len() });
    }
    let roll = MerkleRoll::from_parts(shape, sequence_number, active_index, buffer_size, change_logs, Path { proof, leaf, index })?;
    Ok(MerkleRollAccount { header, roll })
  }
}

/// Account kinds this crate can decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountData {
  /// Allocated but never initialized; the header is still zeroed.
  Uninitialized,
  MerkleRoll(Box<MerkleRollAccount>),
}

impl AccountData {
  pub fn decode(bytes: &[u8]) -> Result<Self> {
    if bytes.len() < HEADER_SIZE {
      return Err(Error::MalformedAccountData { expected: HEADER_SIZE, actual: bytes.len() });
    }
    if bytes[..8].iter().all(|b| *b == 0) {
      return Ok(AccountData::Uninitialized);
    }
    Ok(AccountData::MerkleRoll(Box::new(MerkleRollAccount::decode(bytes)?)))
  }
}

fn read_node<R: Read>(r: &mut R) -> Result<Node> {
  let mut node = EMPTY;
  r.read_exact(&mut node)?;
  Ok(node)
}

fn read_nodes<R: Read>(r: &mut R, count: usize) -> Result<Vec<Node>> {
  (0..count).map(|_| read_node(&mut *r)).collect()
}

/// Reads a `u32` index and skips its padding.
fn read_index<R: Read>(r: &mut R) -> Result<u32> {
  let index = r.read_u32::<LittleEndian>()?;
  let _padding = r.read_u32::<LittleEndian>()?;
  Ok(index)
}

fn write_record<W: Write>(w: &mut W, root: &Node, path: &[Node], index: u32) -> Result<()> {
  w.write_all(root)?;
  for node in path {
    w.write_all(node)?;
  }
  w.write_u32::<LittleEndian>(index)?;
  w.write_u32::<LittleEndian>(0)?;
  Ok(())
}

fn write_proof_record<W: Write>(w: &mut W, proof: &[Node], leaf: &Node, index: u32) -> Result<()> {
  for node in proof {
    w.write_all(node)?;
  }
  w.write_all(leaf)?;
  w.write_u32::<LittleEndian>(index)?;
  w.write_u32::<LittleEndian>(0)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::leaf_from_seed;

  fn header(max_depth: u32, max_buffer_size: u32) -> MerkleRollHeader {
    MerkleRollHeader { max_depth, max_buffer_size, authority: [1u8; 32], append_authority: [2u8; 32], creation_slot: 77 }
  }

  fn populated(max_depth: u32, max_buffer_size: u32, appends: u64) -> MerkleRollAccount {
    let mut account = MerkleRollAccount::new(header(max_depth, max_buffer_size)).unwrap();
    account.roll.initialize().unwrap();
    for i in 0..appends {
      account.roll.append(leaf_from_seed(i)).unwrap();
    }
    account
  }

  #[test]
  fn account_sizes() {
    assert_eq!(80, HEADER_SIZE);
    assert_eq!(80 + 24 + 9 * (32 * 4 + 8), account_size(TreeShape::new(3, 8)));
    assert_eq!(80 + 24 + 65 * (32 * 15 + 8), account_size(TreeShape::new(14, 64)));
  }

  #[test]
  fn decode_restores_the_roll() {
    let account = populated(5, 8, 13);
    let bytes = account.encode().unwrap();
    assert_eq!(account_size(TreeShape::new(5, 8)), bytes.len());
    // each changelog slot opens with its root
    let active = account.roll.active_index as usize;
    let offset = HEADER_SIZE + CURSOR_SIZE + active * record_size(5);
    assert_eq!(&account.roll.get_root()[..], &bytes[offset..offset + 32]);

    let decoded = match AccountData::decode(&bytes).unwrap() {
      AccountData::MerkleRoll(decoded) => decoded,
      other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(account, *decoded);
    assert_eq!(77, decoded.header.creation_slot);

    // the decoded roll keeps accepting appends
    let mut roll = decoded.roll.clone();
    let mut source = account.roll.clone();
    assert_eq!(source.append(leaf_from_seed(99)).unwrap(), roll.append(leaf_from_seed(99)).unwrap());
  }

  #[test]
  fn size_mismatch_is_malformed() {
    let bytes = populated(3, 8, 2).encode().unwrap();
    let size = bytes.len();
    assert!(matches!(
      MerkleRollAccount::decode(&bytes[..size - 1]),
      Err(Error::MalformedAccountData { expected, actual }) if expected == size && actual == size - 1
    ));
    let mut longer = bytes.clone();
    longer.extend_from_slice(&[0u8; 8]);
    assert!(matches!(MerkleRollAccount::decode(&longer), Err(Error::MalformedAccountData { .. })));
    assert!(matches!(AccountData::decode(&bytes[..10]), Err(Error::MalformedAccountData { expected: 80, actual: 10 })));
  }

  #[test]
  fn zeroed_header_is_uninitialized() {
    let bytes = vec![0u8; account_size(TreeShape::new(3, 8))];
    assert_eq!(AccountData::Uninitialized, AccountData::decode(&bytes).unwrap());
  }

  #[test]
  fn corrupt_cursor_is_rejected() {
    let mut bytes = populated(3, 8, 2).encode().unwrap();
    // active_index
    bytes[HEADER_SIZE + 8..HEADER_SIZE + 16].copy_from_slice(&9u64.to_le_bytes());
    assert!(matches!(MerkleRollAccount::decode(&bytes), Err(Error::InvalidChangeLogCursor { active_index: 9, .. })));

    let mut bytes = populated(3, 8, 2).encode().unwrap();
    bytes[..4].copy_from_slice(&31u32.to_le_bytes());
    assert!(matches!(MerkleRollAccount::decode(&bytes), Err(Error::UnsupportedTreeShape { max_depth: 31, .. })));
  }

  #[test]
  fn canopy_follows_the_tree() {
    let account = populated(5, 8, 4);
    let mut bytes = account.encode().unwrap();
    bytes.extend_from_slice(&vec![0u8; Canopy::byte_len(2)]);
    let (decoded, canopy) = MerkleRollAccount::decode_with_canopy(&bytes).unwrap();
    assert_eq!(account, decoded);
    assert_eq!(2, canopy.cached_path_len());

    bytes.extend_from_slice(&[0u8; 32]);
    assert!(matches!(MerkleRollAccount::decode_with_canopy(&bytes), Err(Error::CanopyLengthMismatch { .. })));
  }

  #[test]
  fn changelog_node_indices_from_decoded_account() {
    let bytes = populated(14, 64, 1).encode().unwrap();
    let decoded = MerkleRollAccount::decode(&bytes).unwrap();
    let events = decoded.roll.get_changelogs_with_node_index([3u8; 32]);
    // initialize plus one append
    assert_eq!(2, events.len());
    let indices = events[0].path.iter().map(|n| n.index).collect::<Vec<_>>();
    assert_eq!(1 << 14, indices[0]);
    assert_eq!(1, *indices.last().unwrap());
    assert!(indices.windows(2).all(|w| w[0] / 2 == w[1] && w[0] > w[1]));
  }
}
