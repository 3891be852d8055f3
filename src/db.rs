//! Database facade
//!
//! The caller-facing layer over [`StorageEngine`]: hashes raw keys into the
//! engine's 32-bit key-hash space and fronts the engine with independent TTL
//! cache instances for resolved values and index lookups. Every successful
//! mutation is paired with the matching cache `put`/`invalidate`.

use crate::cache::TtlCache;
use crate::config::Config;
use crate::engine::{EngineStats, StorageEngine};
use crate::error::Result;
use crate::hash::key_hash;
use crate::index::Index;

/// Key-value database over the storage engine, with caching
pub struct Database {
    engine: StorageEngine,
    values: TtlCache<i32, Vec<u8>>,
    indexes: TtlCache<i32, Index>,
}

impl Database {
    /// Open or create a database with the given config. Runs the engine's
    /// free-block initialization, so the handle is ready for use.
    pub fn open(config: Config) -> Result<Self> {
        let values = match config.sweep_interval() {
            Some(interval) => TtlCache::with_sweeper(config.value_ttl(), interval),
            None => TtlCache::new(config.value_ttl()),
        };
        let indexes = match config.sweep_interval() {
            Some(interval) => TtlCache::with_sweeper(config.index_ttl(), interval),
            None => TtlCache::new(config.index_ttl()),
        };

        let engine = StorageEngine::open(config)?;
        engine.initialize_free_blocks()?;

        Ok(Self {
            engine,
            values,
            indexes,
        })
    }

    /// Store `value` under `key`, creating or replacing as needed
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let hash = key_hash(key);
        self.engine.save(hash, value.to_vec()).wait()?;

        self.values.put(hash, value.to_vec());
        // The chain head may have moved; let the next lookup repopulate
        self.indexes.invalidate(&hash);
        Ok(())
    }

    /// Fetch the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = key_hash(key);

        if let Some(value) = self.values.get(&hash) {
            return Ok(Some(value));
        }

        let entry = match self.indexes.get(&hash) {
            Some(entry) => Some(entry),
            None => {
                let entry = self.engine.index_of(hash).wait()?;
                if let Some(entry) = entry {
                    self.indexes.put(hash, entry);
                }
                entry
            }
        };

        match entry {
            None => Ok(None),
            Some(entry) => {
                let value = self.engine.value_at(entry).wait()?;
                self.values.put(hash, value.clone());
                Ok(Some(value))
            }
        }
    }

    /// Remove `key` if present
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let hash = key_hash(key);
        self.engine.remove(hash).wait()?;

        self.values.invalidate(&hash);
        self.indexes.invalidate(&hash);
        Ok(())
    }

    /// Flush and close the underlying engine
    pub fn close(&self) -> Result<()> {
        self.values.clear();
        self.indexes.clear();
        self.engine.close()
    }

    /// The wrapped engine (for stats and direct key-hash access)
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Snapshot of the engine counters
    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Entries currently held by the value cache
    pub fn cached_values(&self) -> usize {
        self.values.len()
    }
}
