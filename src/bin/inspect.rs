//! chainkv Inspection Binary
//!
//! Offline inspection of a chainkv data directory: summary counters, live
//! index entries, and the on-disk free chain.

use clap::Parser;

use chainkv::block::{BlockLayout, DataBlockStore, TERMINAL_BLOCK};
use chainkv::index::IndexStore;
use chainkv::StorageEngine;
use tracing_subscriber::{fmt, EnvFilter};

/// chainkv data directory inspector
#[derive(Parser, Debug)]
#[command(name = "chainkv-inspect")]
#[command(about = "Inspect a chainkv data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./chainkv_data")]
    data_dir: String,

    /// Block size the data file was written with
    #[arg(short, long, default_value = "128")]
    block_size: usize,

    /// Data file carries per-block key-hash stamps
    #[arg(long)]
    stamped: bool,

    /// Index tree minimum branching degree
    #[arg(long, default_value = "5")]
    min_degree: usize,

    /// Dump all live index entries
    #[arg(long)]
    index: bool,

    /// Walk and dump the on-disk free chain
    #[arg(long)]
    free_chain: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainkv=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!("inspection failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> chainkv::Result<()> {
    let data_dir = std::path::Path::new(&args.data_dir);
    let layout = BlockLayout::new(args.block_size, args.stamped);

    let blocks = DataBlockStore::open(&data_dir.join(StorageEngine::DATA_FILENAME), layout)?;
    let index = IndexStore::open(
        &data_dir.join(StorageEngine::INDEX_FILENAME),
        args.min_degree,
    )?;

    let block_count = blocks.block_count()?;
    let sentinel = index.sentinel();

    println!("chainkv v{} — {}", chainkv::VERSION, args.data_dir);
    println!("  block size:     {} ({} payload)", layout.block_size(), layout.payload_size());
    println!("  file blocks:    {}", block_count);
    println!("  index entries:  {}", index.len());
    println!("  sentinel:       {}", sentinel.block_position);

    if args.free_chain {
        println!("free chain:");
        let mut position = sentinel.block_position;
        let mut count = 0usize;
        while position != TERMINAL_BLOCK && position < block_count {
            println!("  block {}", position);
            position = blocks.read_free_next(position)?;
            count += 1;
        }
        println!("  ({} free blocks)", count);
    }

    if args.index {
        println!("index entries:");
        for (key_hash, entry) in index.entries() {
            let chain = blocks.collect_chain(entry.block_position)?;
            println!(
                "  key hash {:>11} -> block {} ({} blocks)",
                key_hash,
                entry.block_position,
                chain.len()
            );
        }
    }

    Ok(())
}
