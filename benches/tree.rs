use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use tempfile::Builder;

use cmt_indexer::index::to_node_index;
use cmt_indexer::store::RocksRowStore;
use cmt_indexer::{
  MemRowStore, MerkleRoll, MerkleTree, RowStore, TreeId, TreeShape, empty_node, get_merkle_proof, hash_pair,
  leaf_from_seed, validate_tree_in_store,
};

const DEPTH: u32 = 14;
const TREE_ID: TreeId = [1u8; 32];

fn populated<S: RowStore>(store: &S, appends: u64) -> MerkleRoll {
  let mut roll = MerkleRoll::new(TreeShape::new(DEPTH, 64)).unwrap();
  roll.initialize().unwrap();
  for i in 0..appends {
    roll.append(leaf_from_seed(i)).unwrap();
    store.put_event(&roll.change_log_event(TREE_ID)).unwrap();
  }
  roll
}

fn bench_hash(c: &mut Criterion) {
  let left = leaf_from_seed(1);
  let right = leaf_from_seed(2);
  c.bench_function("keccak hash_pair", |b| b.iter(|| hash_pair(&left, &right)));
  c.bench_function("empty_node(30)", |b| b.iter(|| empty_node(30)));
}

fn bench_in_memory(c: &mut Criterion) {
  let leaves = (0..1u64 << DEPTH).map(leaf_from_seed).collect::<Vec<_>>();
  c.bench_function("MerkleTree new 2^14", |b| b.iter(|| MerkleTree::new(&leaves).unwrap()));
  let mut tree = MerkleTree::new(&leaves).unwrap();
  let mut i = 0u64;
  c.bench_function("MerkleTree get_proof", |b| {
    b.iter(|| {
      i = (i + 7919) % leaves.len() as u64;
      tree.get_proof(i).unwrap()
    })
  });
  c.bench_function("MerkleTree update_leaf", |b| {
    b.iter(|| {
      i = (i + 7919) % leaves.len() as u64;
      tree.update_leaf(i, leaf_from_seed(i + 1)).unwrap()
    })
  });
}

fn bench_roll(c: &mut Criterion) {
  c.bench_function("MerkleRoll append", |b| {
    b.iter_batched(
      || {
        let mut roll = MerkleRoll::new(TreeShape::new(DEPTH, 64)).unwrap();
        roll.initialize().unwrap();
        roll
      },
      |mut roll| {
        for i in 0..64 {
          roll.append(leaf_from_seed(i)).unwrap();
        }
        roll
      },
      BatchSize::SmallInput,
    )
  });
}

fn bench_row_store(c: &mut Criterion) {
  let mem = MemRowStore::new();
  let roll = populated(&mem, 1024);
  let mut i = 0u64;
  c.bench_function("get_merkle_proof mem", |b| {
    b.iter(|| {
      i = (i + 31) % 1024;
      get_merkle_proof(&mem, &TREE_ID, to_node_index(i, DEPTH), roll.get_seq()).unwrap()
    })
  });
  c.bench_function("validate_tree mem 1024 leaves", |b| {
    b.iter(|| validate_tree_in_store(&mem, &TREE_ID, roll.get_seq()).unwrap())
  });

  let dir = Builder::new().prefix(".bench-rows").tempdir().unwrap();
  let rocks = RocksRowStore::open(dir.path()).unwrap();
  let roll = populated(&rocks, 1024);
  c.bench_function("get_merkle_proof rocksdb", |b| {
    b.iter(|| {
      i = (i + 31) % 1024;
      get_merkle_proof(&rocks, &TREE_ID, to_node_index(i, DEPTH), roll.get_seq()).unwrap()
    })
  });
}

criterion_group!(benches, bench_hash, bench_in_memory, bench_roll, bench_row_store);
criterion_main!(benches);
