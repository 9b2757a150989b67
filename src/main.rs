use chrono::Local;
use clap::Parser;
use cmt_indexer::hashtree::HashTree;
use cmt_indexer::proof::StoredTree;
use cmt_indexer::store::RocksRowStore;
use cmt_indexer::{
  MemRowStore, MerkleRoll, MerkleTree, Node, Result, RowStore, TreeId, TreeShape, file_size, get_merkle_proof, index,
  splitmix64, unique_dir, validate_tree_in_store,
};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::Builder;

mod stat;

#[derive(Parser)]
#[command(name = "cmt-bench")]
#[command(about = "Benchmark proof generation, proof assembly and tree validation across tree depths")]
struct Args {
  /// Output directory for benchmark results and working temporary files
  #[arg(index = 1, default_value = ".")]
  dir: PathBuf,

  /// Session id used to name the result directory; defaults to the current local time
  #[arg(long)]
  session: Option<String>,

  /// Smallest tree depth to measure
  #[arg(long, default_value_t = 4)]
  min_depth: u32,

  /// Largest tree depth to measure
  #[arg(long, default_value_t = 16)]
  max_depth: u32,

  /// Changelog ring length of the trees built for the row stores
  #[arg(long, default_value_t = 64)]
  buffer_size: u32,

  /// Proofs requested per sample
  #[arg(long, default_value_t = 256)]
  proofs: usize,

  /// Keep sampling until 2σ is within this percentage of the mean
  #[arg(long, default_value_t = 5.0)]
  stable_percent: f64,

  /// Seed for leaf values and queried indices
  #[arg(long, default_value_t = 0x5eed)]
  seed: u64,
}

const MIN_LOOP: usize = 10;
const MAX_LOOP: usize = 100;

fn main() -> Result<()> {
  let args = Args::parse();
  TreeShape::new(args.max_depth, args.buffer_size).check()?;

  let id = args.session.clone().unwrap_or_else(|| Local::now().format("%Y%m%d%H%M%S").to_string());
  create_dir_all(&args.dir)?;
  let dir = unique_dir(&args.dir, &format!("cmt-bench-{id}"), "")?;
  println!("Working directory: {:?}", &dir);
  println!("Session {id}: depths {}..={}", args.min_depth, args.max_depth);

  run_proof_in_memory(&args, &dir)?;
  run_proof_assembly(&args, &dir, "mem", |_| Ok(MemRowStore::new()))?;
  run_proof_assembly(&args, &dir, "rocksdb", |path| RocksRowStore::open(path))?;
  run_validation(&args, &dir)?;
  Ok(())
}

fn depths(args: &Args) -> impl Iterator<Item = u32> {
  (args.min_depth.max(1)..=args.max_depth).step_by(2)
}

fn random_leaves(rng: &mut StdRng, n: usize) -> Vec<Node> {
  (0..n)
    .map(|_| {
      let mut leaf = [0u8; 32];
      rng.fill_bytes(&mut leaf);
      leaf
    })
    .collect()
}

/// Repeats `sample` until the timing spread settles, then prints and records it.
fn measure<F: FnMut() -> Result<()>>(args: &Args, report: &mut stat::Report<u32>, depth: u32, mut sample: F) -> Result<stat::Stat> {
  for i in 0..MAX_LOOP {
    let t0 = Instant::now();
    sample()?;
    let t1 = Instant::now();
    report.add(depth, t1 - t0);
    if i + 1 >= MIN_LOOP && report.single(depth).is_stable(MIN_LOOP, args.stable_percent) {
      break;
    }
  }
  Ok(report.single(depth))
}

fn save(report: &stat::Report<u32>, dir: &Path, name: &str) -> Result<()> {
  let path = dir.join(format!("{name}.csv"));
  report.save_to_csv(&path)?;
  println!("==> {}", path.to_string_lossy());
  Ok(())
}

fn run_proof_in_memory(args: &Args, dir: &Path) -> Result<()> {
  println!("[merkle-tree::proof]");
  let mut rng = StdRng::seed_from_u64(args.seed);
  let mut report = stat::Report::new();
  for depth in depths(args) {
    let leaves = random_leaves(&mut rng, 1 << depth);
    let tree = MerkleTree::new(&leaves)?;
    let s = measure(args, &mut report, depth, || {
      for _ in 0..args.proofs {
        let proof = tree.proof(rng.random_range(0..leaves.len() as u64))?;
        debug_assert!(MerkleTree::verify(&tree.get_root(), &proof));
      }
      Ok(())
    })?;
    println!("  depth={depth}: {s}");
  }
  save(&report, dir, "proof-in-memory")
}

/// Replays `2^depth` appends through a changelog buffer into a row store, the way a collector
/// persists change events.
fn populate<S: RowStore>(store: &S, tree_id: &TreeId, shape: TreeShape, seed: u64) -> Result<MerkleRoll> {
  let mut roll = MerkleRoll::new(shape)?;
  roll.initialize()?;
  store.put_event(&roll.change_log_event(*tree_id))?;
  for i in 0..shape.capacity() {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&splitmix64(seed ^ i).to_le_bytes());
    leaf[8..16].copy_from_slice(&(i + 1).to_le_bytes());
    roll.append(leaf)?;
    store.put_event(&roll.change_log_event(*tree_id))?;
  }
  Ok(roll)
}

fn run_proof_assembly<S, F>(args: &Args, dir: &Path, name: &str, open: F) -> Result<()>
where
  S: RowStore,
  F: Fn(&Path) -> Result<S>,
{
  println!("[row-store::proof-assembly::{name}]");
  let tree_id: TreeId = [7u8; 32];
  let mut rng = StdRng::seed_from_u64(args.seed);
  let mut report = stat::Report::new();
  for depth in depths(args) {
    let work = Builder::new().prefix(&format!(".tmp-{name}-rows")).tempdir_in(dir)?;
    let store = open(work.path())?;
    let roll = populate(&store, &tree_id, TreeShape::new(depth, args.buffer_size), args.seed)?;
    let view = StoredTree::new(&store, tree_id, roll.get_seq());
    debug_assert_eq!(roll.get_root(), view.root()?);

    let s = measure(args, &mut report, depth, || {
      for _ in 0..args.proofs {
        let node_index = index::to_node_index(rng.random_range(0..1u64 << depth), depth);
        let proof = get_merkle_proof(&store, &tree_id, node_index, roll.get_seq())?;
        debug_assert_eq!(roll.get_root(), proof.root);
      }
      Ok(())
    })?;
    println!("  depth={depth}: {s}; {} bytes", file_size(work.path()));
  }
  save(&report, dir, &format!("proof-assembly-{name}"))
}

fn run_validation(args: &Args, dir: &Path) -> Result<()> {
  println!("[row-store::validate]");
  let tree_id: TreeId = [9u8; 32];
  let mut report = stat::Report::new();
  for depth in depths(args) {
    let store = MemRowStore::new();
    let roll = populate(&store, &tree_id, TreeShape::new(depth, args.buffer_size), args.seed)?;
    let s = measure(args, &mut report, depth, || {
      let result = validate_tree_in_store(&store, &tree_id, roll.get_seq())?;
      debug_assert!(result.is_valid());
      Ok(())
    })?;
    println!("  depth={depth}: {s}; {} rows", store.len());
  }
  save(&report, dir, "validate")
}
