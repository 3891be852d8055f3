//! Free block allocator
//!
//! Tracks reclaimable block positions and hands them out smallest-first.
//! There is no separate on-disk free-list structure: free blocks are linked
//! into an ascending chain through their own headers, with the index
//! sentinel pointing at the chain head. At startup the in-memory set is
//! rebuilt by a pure walk of that chain; the walk is O(free blocks), which
//! is bounded by dataset size, not request volume.
//!
//! When the set runs dry, allocation synthesizes the next sequential file
//! position instead — growing the file rather than failing.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::{DataBlockStore, TERMINAL_BLOCK};
use crate::error::{ChainError, Result};

/// Allocation counters owned by the engine instance (no global state)
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationMetrics {
    /// Blocks handed out by `allocate`
    pub blocks_allocated: u64,

    /// Blocks returned through `release`
    pub blocks_released: u64,

    /// Blocks obtained by growing the file rather than recycling
    pub file_growths: u64,
}

/// Tracks and recycles free block positions
pub struct FreeBlockAllocator {
    blocks: Arc<DataBlockStore>,

    /// Free block positions, ascending
    free: BTreeSet<i32>,

    /// File growth point: first position past the end of the block file
    limit: i32,

    initialized: bool,

    metrics: AllocationMetrics,
}

impl FreeBlockAllocator {
    /// Create an allocator over `blocks`. It is unusable until
    /// [`initialize`](Self::initialize) has seeded it from the on-disk chain.
    pub fn new(blocks: Arc<DataBlockStore>) -> Self {
        Self {
            blocks,
            free: BTreeSet::new(),
            limit: 0,
            initialized: false,
            metrics: AllocationMetrics::default(),
        }
    }

    /// Rebuild the free set by walking the on-disk free chain from
    /// `sentinel_position`. A sentinel at or past the file end means there
    /// are no free blocks and marks the growth point.
    ///
    /// Must run once before any allocate/release.
    pub fn initialize(&mut self, sentinel_position: i32) -> Result<()> {
        if self.initialized {
            return Err(ChainError::IllegalState(
                "free block allocator is already initialized".to_string(),
            ));
        }

        self.limit = self.blocks.block_count()?;
        self.free.clear();

        let mut position = sentinel_position;
        while position != TERMINAL_BLOCK && position < self.limit {
            if position < 0 {
                return Err(ChainError::CorruptedChain(format!(
                    "free chain reached negative position {}",
                    position
                )));
            }
            if !self.free.insert(position) {
                return Err(ChainError::CorruptedChain(format!(
                    "free chain revisits block {}",
                    position
                )));
            }
            position = self.blocks.read_free_next(position)?;
        }

        self.initialized = true;
        debug!(
            free_blocks = self.free.len(),
            file_blocks = self.limit,
            "free block set rebuilt"
        );
        Ok(())
    }

    /// Pop the `n` smallest free positions, growing the file when the set
    /// runs dry mid-operation. Always succeeds.
    pub fn allocate(&mut self, n: usize) -> Result<Vec<i32>> {
        self.ensure_initialized()?;

        let mut positions = Vec::with_capacity(n);
        for _ in 0..n {
            match self.free.pop_first() {
                Some(position) => positions.push(position),
                None => {
                    positions.push(self.limit);
                    self.limit += 1;
                    self.metrics.file_growths += 1;
                }
            }
        }

        self.metrics.blocks_allocated += n as u64;
        trace!(?positions, "allocated blocks");
        Ok(positions)
    }

    /// Return `positions` to the free set, maintaining the ascending on-disk
    /// chain through the block headers. Positions are processed from highest
    /// to lowest so each one sees the final state of the lower range.
    pub fn release(&mut self, positions: &[i32]) -> Result<()> {
        self.ensure_initialized()?;

        let mut ordered = positions.to_vec();
        ordered.sort_unstable();
        ordered.reverse();

        for position in ordered {
            self.release_one(position)?;
        }

        self.metrics.blocks_released += positions.len() as u64;
        trace!(count = positions.len(), "released blocks");
        Ok(())
    }

    /// The value the sentinel must carry: the minimum free position, or the
    /// growth point when no free blocks exist.
    pub fn head(&self) -> i32 {
        self.free.first().copied().unwrap_or(self.limit)
    }

    /// Number of free blocks currently tracked
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Current file growth point (= number of blocks in the file)
    pub fn limit(&self) -> i32 {
        self.limit
    }

    /// Whether `position` is currently free
    pub fn is_free(&self, position: i32) -> bool {
        self.free.contains(&position)
    }

    /// Snapshot of the allocation counters
    pub fn metrics(&self) -> AllocationMetrics {
        self.metrics
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(ChainError::IllegalState(
                "free block allocator has not been initialized".to_string(),
            ));
        }
        Ok(())
    }

    fn release_one(&mut self, position: i32) -> Result<()> {
        if position < 0 || position >= self.limit {
            return Err(ChainError::IllegalState(format!(
                "cannot release position {} outside the file ({} blocks)",
                position, self.limit
            )));
        }
        if self.free.contains(&position) {
            return Err(ChainError::IllegalState(format!(
                "double release of block {}",
                position
            )));
        }

        match self.free.first().copied() {
            // New minimum (or first free block at all): position becomes the
            // chain head. Linking to the terminal marker instead of the stale
            // growth point keeps the chain restart-safe when the set was
            // empty.
            Some(min) if position < min => {
                self.blocks.write_free_header(position, min)?;
            }
            None => {
                self.blocks.write_free_header(position, TERMINAL_BLOCK)?;
            }
            // Splice between the nearest free neighbors
            Some(_) => {
                let lower = self
                    .free
                    .range(..position)
                    .next_back()
                    .copied()
                    .ok_or_else(|| {
                        ChainError::IllegalState(format!(
                            "free set has no lower neighbor for {}",
                            position
                        ))
                    })?;
                let higher = self
                    .free
                    .range(position + 1..)
                    .next()
                    .copied()
                    .unwrap_or(TERMINAL_BLOCK);

                self.blocks.write_free_header(position, higher)?;
                self.blocks.write_free_header(lower, position)?;
            }
        }

        self.free.insert(position);
        Ok(())
    }
}
