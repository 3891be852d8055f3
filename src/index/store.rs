//! Index store
//!
//! Owns the index record file and the in-memory search tree over it. The
//! tree is rebuilt by a full linear scan at load time; every mutation writes
//! the affected 9-byte record in place. Removals become tombstones whose
//! slots are handed back to later creations, so deletions survive restart
//! without rewriting the file.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::debug;

use crate::block::TERMINAL_BLOCK;
use crate::error::{ChainError, Result};

use super::{
    decode_record, encode_record, Index, SearchTree, FLAG_LIVE, FLAG_SENTINEL, FLAG_TOMBSTONE,
    RECORD_SIZE,
};

/// Maps key hashes to index records, persisted as fixed-size records
pub struct IndexStore {
    file: File,

    /// In-memory search tree over all live records
    tree: SearchTree,

    /// Key hash → record slot, for in-place record rewrites
    slots: HashMap<i32, u64>,

    /// Tombstoned record slots available for reuse (ascending)
    free_slots: BTreeSet<u64>,

    /// Next never-used record slot
    next_slot: u64,

    /// Cached block position of the sentinel record (slot 0)
    sentinel_position: i32,
}

impl IndexStore {
    /// Open or create the index file at `path`, rebuilding the in-memory
    /// tree from a full scan of its records.
    pub fn open(path: &Path, min_degree: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len();
        let mut store = Self {
            file,
            tree: SearchTree::new(min_degree),
            slots: HashMap::new(),
            free_slots: BTreeSet::new(),
            next_slot: 0,
            sentinel_position: 0,
        };

        if len == 0 {
            // Fresh index: record 0 is the sentinel, free chain starts at the
            // (empty) file growth point
            store.write_slot(0, &encode_record(0, 0, FLAG_SENTINEL))?;
            store.next_slot = 1;
            return Ok(store);
        }

        if len % RECORD_SIZE as u64 != 0 {
            return Err(ChainError::MalformedRecord(format!(
                "index file length {} is not a multiple of the record size {}",
                len, RECORD_SIZE
            )));
        }

        let mut buf = vec![0u8; len as usize];
        store.file.read_exact_at(&mut buf, 0)?;

        let mut sentinel_seen = false;
        for (slot, record) in buf.chunks_exact(RECORD_SIZE).enumerate() {
            let (key_hash, block_position, flag) = decode_record(record)?;
            match flag {
                FLAG_SENTINEL => {
                    if slot != 0 {
                        return Err(ChainError::MalformedRecord(format!(
                            "sentinel found at record {} instead of record 0",
                            slot
                        )));
                    }
                    store.sentinel_position = block_position;
                    sentinel_seen = true;
                }
                FLAG_LIVE => {
                    let entry = Index::live(key_hash, block_position);
                    if store.tree.insert(key_hash, entry).is_some() {
                        return Err(ChainError::MalformedRecord(format!(
                            "duplicate record for key hash {}",
                            key_hash
                        )));
                    }
                    store.slots.insert(key_hash, slot as u64);
                }
                FLAG_TOMBSTONE => {
                    store.free_slots.insert(slot as u64);
                }
                // decode_record already rejected anything else
                _ => unreachable!(),
            }
        }

        if !sentinel_seen {
            return Err(ChainError::MalformedRecord(
                "index file has no sentinel record".to_string(),
            ));
        }

        store.next_slot = len / RECORD_SIZE as u64;
        debug!(
            entries = store.tree.len(),
            tombstones = store.free_slots.len(),
            sentinel = store.sentinel_position,
            "index loaded"
        );
        Ok(store)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get the index entry for `key_hash`
    pub fn get(&self, key_hash: i32) -> Option<Index> {
        self.tree.get(key_hash).copied()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// All live entries in ascending key-hash order (debug/inspection)
    pub fn entries(&self) -> Vec<(i32, Index)> {
        self.tree.entries()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert a new entry. Creation is not an upsert: an existing entry for
    /// `key_hash` fails with `IllegalState`.
    pub fn create(&mut self, key_hash: i32, block_position: i32) -> Result<()> {
        if self.tree.get(key_hash).is_some() {
            return Err(ChainError::IllegalState(format!(
                "index already exists for key hash {}",
                key_hash
            )));
        }

        let slot = match self.free_slots.pop_first() {
            Some(slot) => slot,
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                slot
            }
        };

        self.write_slot(slot, &encode_record(key_hash, block_position, FLAG_LIVE))?;
        self.tree.insert(key_hash, Index::live(key_hash, block_position));
        self.slots.insert(key_hash, slot);
        Ok(())
    }

    /// Mutate an existing entry's block position in place, in memory and on
    /// disk. Fails with `IllegalState` when the entry is absent.
    pub fn update(&mut self, key_hash: i32, block_position: i32) -> Result<()> {
        let slot = *self.slots.get(&key_hash).ok_or_else(|| {
            ChainError::IllegalState(format!("no index to update for key hash {}", key_hash))
        })?;

        match self.tree.get_mut(key_hash) {
            Some(entry) => entry.block_position = block_position,
            None => {
                return Err(ChainError::IllegalState(format!(
                    "no index to update for key hash {}",
                    key_hash
                )))
            }
        }

        self.write_slot(slot, &encode_record(key_hash, block_position, FLAG_LIVE))
    }

    /// Remove the entry for `key_hash`. The on-disk record becomes a
    /// tombstone so the removal survives restart; returns the removed entry,
    /// or `None` when absent.
    pub fn remove(&mut self, key_hash: i32) -> Result<Option<Index>> {
        let removed = match self.tree.remove(key_hash) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let slot = match self.slots.remove(&key_hash) {
            Some(slot) => slot,
            None => {
                return Err(ChainError::IllegalState(format!(
                    "index entry for key hash {} has no record slot",
                    key_hash
                )))
            }
        };

        self.write_slot(
            slot,
            &encode_record(key_hash, TERMINAL_BLOCK, FLAG_TOMBSTONE),
        )?;
        self.free_slots.insert(slot);
        Ok(Some(removed))
    }

    // =========================================================================
    // Sentinel
    // =========================================================================

    /// The reserved free-chain head record
    pub fn sentinel(&self) -> Index {
        Index::sentinel(self.sentinel_position)
    }

    /// Repoint the sentinel at `block_position`
    pub fn set_sentinel(&mut self, block_position: i32) -> Result<()> {
        if block_position == self.sentinel_position {
            return Ok(());
        }
        self.write_slot(0, &encode_record(0, block_position, FLAG_SENTINEL))?;
        self.sentinel_position = block_position;
        Ok(())
    }

    /// Flush file contents and metadata to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn write_slot(&self, slot: u64, record: &[u8; RECORD_SIZE]) -> Result<()> {
        self.file
            .write_all_at(record, slot * RECORD_SIZE as u64)?;
        Ok(())
    }
}
