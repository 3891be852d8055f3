//! Engine Module
//!
//! The storage engine proper: orchestrates the index store, the free block
//! allocator and the data block store to implement save/get/update/remove
//! over key hashes.
//!
//! ## Responsibilities
//! - Map key hashes to block chains through the index store
//! - Obtain and recycle block positions through the allocator
//! - Keep the sentinel record pointing at the free-chain head
//! - Dispatch disk work onto the I/O pool
//!
//! ## Concurrency Model
//!
//! - **Mutations** (save/update/remove): serialized by `write_lock`; the
//!   index tree and the free set each sit behind their own mutex, so
//!   operations for *different* keys still serialize on them.
//! - **Reads** (get): take only the index mutex, briefly.
//! - All public operations return an [`IoTask`]; callers block on it or
//!   attach a continuation. Dropping a task does not cancel its I/O.
//!
//! ## Consistency
//!
//! Multi-block writes are not transactional: a crash mid-rewrite can leave
//! an index pointing at a partially updated or partially truncated chain.
//! There is no write-ahead log or checksum; this is a documented gap of the
//! format, not something the engine tries to mask.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::alloc::FreeBlockAllocator;
use crate::block::DataBlockStore;
use crate::config::Config;
use crate::error::{ChainError, Result};
use crate::index::{Index, IndexStore};
use crate::io::{IoPool, IoTask};

/// Point-in-time snapshot of engine counters
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    /// Blocks currently in the data file
    pub file_blocks: i32,
    /// Blocks currently on the free chain
    pub free_blocks: usize,
    /// Live index entries
    pub index_entries: usize,
    /// Blocks handed out since open
    pub blocks_allocated: u64,
    /// Blocks reclaimed since open
    pub blocks_released: u64,
    /// Allocations served by growing the file
    pub file_growths: u64,
}

/// The storage engine
pub struct StorageEngine {
    inner: Arc<EngineInner>,
    io: IoPool,
}

struct EngineInner {
    config: Config,
    blocks: Arc<DataBlockStore>,
    index: Mutex<IndexStore>,
    alloc: Mutex<FreeBlockAllocator>,

    /// Serializes save/update/remove
    write_lock: Mutex<()>,

    initialized: AtomicBool,
    closed: AtomicBool,
}

impl StorageEngine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    /// File name of the block file inside the data directory
    pub const DATA_FILENAME: &'static str = "blocks.dat";

    /// File name of the index file inside the data directory
    pub const INDEX_FILENAME: &'static str = "index.dat";

    /// Open or create an engine with the given config.
    ///
    /// On startup:
    /// 1. Validate the configuration
    /// 2. Open/create the data directory and both files
    /// 3. Rebuild the in-memory index tree from a full record scan
    ///
    /// [`initialize_free_blocks`](Self::initialize_free_blocks) must be
    /// called once afterwards, before any mutating operation.
    pub fn open(config: Config) -> Result<Self> {
        config.validate().map_err(ChainError::during_init)?;

        fs::create_dir_all(&config.data_dir)
            .map_err(|e| ChainError::during_init(e.into()))?;

        let layout = config.block_layout();
        let data_path = config.data_dir.join(Self::DATA_FILENAME);
        let index_path = config.data_dir.join(Self::INDEX_FILENAME);

        let blocks = Arc::new(
            DataBlockStore::open(&data_path, layout).map_err(ChainError::during_init)?,
        );
        let index =
            IndexStore::open(&index_path, config.min_degree).map_err(ChainError::during_init)?;
        let alloc = FreeBlockAllocator::new(Arc::clone(&blocks));
        let io = IoPool::new(config.io_threads);

        debug!(
            data_dir = %config.data_dir.display(),
            block_size = layout.block_size(),
            payload_size = layout.payload_size(),
            stamped = layout.stamped(),
            index_entries = index.len(),
            "storage engine opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                blocks,
                index: Mutex::new(index),
                alloc: Mutex::new(alloc),
                write_lock: Mutex::new(()),
                initialized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            io,
        })
    }

    /// Open with a path (convenience method)
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Seed the allocator from the on-disk free chain. Must be invoked once
    /// after construction, before any save/update/remove; a second call
    /// fails with `IllegalState`.
    pub fn initialize_free_blocks(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(ChainError::IllegalState(
                "free blocks are already initialized".to_string(),
            ));
        }

        let sentinel = self.inner.index.lock().sentinel();
        self.inner
            .alloc
            .lock()
            .initialize(sentinel.block_position)
            .map_err(ChainError::during_init)
    }

    // =========================================================================
    // Operations (dispatched on the I/O pool)
    // =========================================================================

    /// Persist `value` under `key_hash`. Creates the chain for a new key;
    /// for an existing key, a byte-identical value is an idempotent no-op
    /// and anything else follows the update path.
    pub fn save(&self, key_hash: i32, value: Vec<u8>) -> IoTask<()> {
        let inner = Arc::clone(&self.inner);
        self.io.submit(move || inner.save(key_hash, &value))
    }

    /// Fetch the value stored under `key_hash`
    pub fn get(&self, key_hash: i32) -> IoTask<Option<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        self.io.submit(move || inner.get(key_hash))
    }

    /// Replace the value of an existing key. Has no effect when the key
    /// hash is absent.
    pub fn update(&self, key_hash: i32, value: Vec<u8>) -> IoTask<()> {
        let inner = Arc::clone(&self.inner);
        self.io.submit(move || inner.update(key_hash, &value))
    }

    /// Remove `key_hash` and return its blocks to the free chain. No-op
    /// when absent.
    pub fn remove(&self, key_hash: i32) -> IoTask<()> {
        let inner = Arc::clone(&self.inner);
        self.io.submit(move || inner.remove(key_hash))
    }

    /// Look up the index entry for `key_hash` (split lookup, used by the
    /// caching facade)
    pub fn index_of(&self, key_hash: i32) -> IoTask<Option<Index>> {
        let inner = Arc::clone(&self.inner);
        self.io.submit(move || {
            inner.ensure_open()?;
            Ok(inner.index.lock().get(key_hash))
        })
    }

    /// Read the chain a previously fetched index entry points at
    pub fn value_at(&self, entry: Index) -> IoTask<Vec<u8>> {
        let inner = Arc::clone(&self.inner);
        self.io.submit(move || {
            inner.ensure_open()?;
            inner.blocks.read_chain(entry.block_position, entry.key_hash)
        })
    }

    /// Flush both stores and refuse further operations. Callers must let
    /// in-flight operations finish first.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.blocks.sync()?;
        self.inner.index.lock().sync()?;
        debug!("storage engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Path of the block file
    pub fn data_path(&self) -> PathBuf {
        self.inner.config.data_dir.join(Self::DATA_FILENAME)
    }

    /// Path of the index file
    pub fn index_path(&self) -> PathBuf {
        self.inner.config.data_dir.join(Self::INDEX_FILENAME)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Snapshot of the engine counters
    pub fn stats(&self) -> EngineStats {
        let alloc = self.inner.alloc.lock();
        let metrics = alloc.metrics();
        EngineStats {
            file_blocks: alloc.limit(),
            free_blocks: alloc.free_count(),
            index_entries: self.inner.index.lock().len(),
            blocks_allocated: metrics.blocks_allocated,
            blocks_released: metrics.blocks_released,
            file_growths: metrics.file_growths,
        }
    }
}

impl EngineInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChainError::IllegalState(
                "storage engine is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ChainError::IllegalState(
                "initialize_free_blocks has not been called".to_string(),
            ));
        }
        Ok(())
    }

    fn save(&self, key_hash: i32, value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock();

        let existing = self.index.lock().get(key_hash);
        match existing {
            None => self.create_value(key_hash, value),
            Some(entry) => {
                let current = self.blocks.read_chain(entry.block_position, key_hash)?;
                if current == value {
                    trace!(key_hash, "save of identical value is a no-op");
                    return Ok(());
                }
                self.replace_value(entry, key_hash, value)
            }
        }
    }

    fn get(&self, key_hash: i32) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let entry = self.index.lock().get(key_hash);
        match entry {
            None => Ok(None),
            Some(entry) => {
                let value = self.blocks.read_chain(entry.block_position, key_hash)?;
                Ok(Some(value))
            }
        }
    }

    fn update(&self, key_hash: i32, value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock();

        let existing = self.index.lock().get(key_hash);
        match existing {
            None => {
                debug!(key_hash, "update of absent key hash has no effect");
                Ok(())
            }
            Some(entry) => self.replace_value(entry, key_hash, value),
        }
    }

    fn remove(&self, key_hash: i32) -> Result<()> {
        self.ensure_open()?;
        self.ensure_initialized()?;
        let _guard = self.write_lock.lock();

        let entry = match self.index.lock().get(key_hash) {
            None => return Ok(()),
            Some(entry) => entry,
        };

        let positions = self.blocks.collect_chain(entry.block_position)?;
        self.alloc.lock().release(&positions)?;
        self.index.lock().remove(key_hash)?;
        self.refresh_sentinel()?;

        trace!(key_hash, blocks = positions.len(), "removed value");
        Ok(())
    }

    /// First-time save: allocate a fresh chain and create the index entry
    fn create_value(&self, key_hash: i32, value: &[u8]) -> Result<()> {
        let needed = self.blocks.layout().blocks_for(value.len());
        let positions = self.alloc.lock().allocate(needed)?;

        self.blocks.rewrite_chain(&positions, key_hash, value)?;
        self.index.lock().create(key_hash, positions[0])?;
        self.refresh_sentinel()?;

        trace!(key_hash, blocks = needed, "created value");
        Ok(())
    }

    /// Grow or shrink an existing chain to fit `value`, then rewrite all
    /// retained/new blocks in a single pass.
    fn replace_value(&self, entry: Index, key_hash: i32, value: &[u8]) -> Result<()> {
        let old_positions = self.blocks.collect_chain(entry.block_position)?;
        let needed = self.blocks.layout().blocks_for(value.len());

        let positions = if needed > old_positions.len() {
            let extra = self.alloc.lock().allocate(needed - old_positions.len())?;
            let mut positions = old_positions;
            positions.extend(extra);
            positions
        } else if needed < old_positions.len() {
            let released = old_positions[needed..].to_vec();
            self.alloc.lock().release(&released)?;
            old_positions[..needed].to_vec()
        } else {
            old_positions
        };

        self.blocks.rewrite_chain(&positions, key_hash, value)?;
        self.index.lock().update(key_hash, positions[0])?;
        self.refresh_sentinel()?;

        trace!(key_hash, blocks = positions.len(), "replaced value");
        Ok(())
    }

    /// Keep the sentinel record pointing at the allocator's current head
    fn refresh_sentinel(&self) -> Result<()> {
        let head = self.alloc.lock().head();
        self.index.lock().set_sentinel(head)
    }
}
