//! Data block store
//!
//! Positional reads and writes against the block file, plus the chain
//! operations built on them. All I/O is offset-addressed
//! (`position * block_size`); no seek state is shared between operations.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::trace;

use crate::error::{ChainError, Result};

use super::codec::{self, BlockHeader, DecodedBlock, TERMINAL_BLOCK};
use super::BlockLayout;

/// Reads and writes blocks by position in the data file
pub struct DataBlockStore {
    file: File,
    layout: BlockLayout,
}

impl DataBlockStore {
    /// Open or create the block file at `path`
    pub fn open(path: &Path, layout: BlockLayout) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        // Every write pads to a whole block, so a ragged length means the
        // file was not produced by this layout.
        let len = file.metadata()?.len();
        if len % layout.block_size() as u64 != 0 {
            return Err(ChainError::MalformedHeader(format!(
                "data file length {} is not a multiple of block size {}",
                len,
                layout.block_size()
            )));
        }

        Ok(Self { file, layout })
    }

    /// The layout this store was opened with
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Number of blocks currently in the file
    pub fn block_count(&self) -> Result<i32> {
        let len = self.file.metadata()?.len();
        Ok((len / self.layout.block_size() as u64) as i32)
    }

    // =========================================================================
    // Single-Block Operations
    // =========================================================================

    /// Read and decode the occupied block at `position`
    pub fn read_block(&self, position: i32) -> Result<DecodedBlock> {
        self.ensure_in_file(position)?;

        let mut buf = vec![0u8; self.layout.block_size()];
        self.file.read_exact_at(&mut buf, self.layout.offset(position))?;
        codec::decode_occupied(&self.layout, &buf)
    }

    /// Encode and write one block at `position`, extending the file when
    /// writing at the current growth position.
    pub fn write_block(
        &self,
        position: i32,
        header: &BlockHeader,
        stamp: i32,
        content: &[u8],
    ) -> Result<()> {
        if position < 0 {
            return Err(ChainError::IllegalState(format!(
                "cannot write block at negative position {}",
                position
            )));
        }
        let count = self.block_count()?;
        if position > count {
            return Err(ChainError::IllegalState(format!(
                "writing block {} would leave a gap (file has {} blocks)",
                position, count
            )));
        }

        let buf = codec::encode_block(&self.layout, header, stamp, content)?;
        self.file.write_all_at(&buf, self.layout.offset(position))?;
        Ok(())
    }

    /// Rewrite the header of `position` as a free block pointing at `next`.
    /// Only the header prefix is touched; stale content bytes remain.
    pub fn write_free_header(&self, position: i32, next: i32) -> Result<()> {
        self.ensure_in_file(position)?;

        let buf = codec::encode_free_prefix(&self.layout, next);
        self.file.write_all_at(&buf, self.layout.offset(position))?;
        Ok(())
    }

    /// Read the free-chain pointer of the free block at `position`
    pub fn read_free_next(&self, position: i32) -> Result<i32> {
        self.ensure_in_file(position)?;

        let mut buf = vec![0u8; self.layout.header_size()];
        self.file.read_exact_at(&mut buf, self.layout.offset(position))?;
        codec::decode_free_prefix(&self.layout, &buf)
    }

    // =========================================================================
    // Chain Operations
    // =========================================================================

    /// Follow the chain from `start` until the terminal marker, concatenating
    /// content in traversal order.
    ///
    /// An unreadable head block fails with `CorruptedData` (the index claimed
    /// a value that is not there); any later failure, a revisited position,
    /// or (under the stamped layout) a stamp not matching `key_hash` fails
    /// with `CorruptedChain`.
    pub fn read_chain(&self, start: i32, key_hash: i32) -> Result<Vec<u8>> {
        let mut value = Vec::new();
        let mut visited = HashSet::new();
        let mut position = start;

        while position != TERMINAL_BLOCK {
            if !visited.insert(position) {
                return Err(ChainError::CorruptedChain(format!(
                    "chain starting at {} revisits block {}",
                    start, position
                )));
            }

            let block = match self.read_block(position) {
                Ok(block) => block,
                Err(err) if position == start => {
                    return Err(ChainError::CorruptedData(format!(
                        "head block {} of key hash {} cannot be read: {}",
                        position, key_hash, err
                    )));
                }
                Err(err) => return Err(err),
            };

            if self.layout.stamped() && block.stamp != key_hash {
                return Err(ChainError::CorruptedChain(format!(
                    "block {} is stamped for key hash {} but was reached from key hash {}",
                    position, block.stamp, key_hash
                )));
            }

            value.extend_from_slice(&block.content);
            position = block.next;
        }

        Ok(value)
    }

    /// Follow the chain from `start`, returning the member positions in
    /// traversal order.
    pub fn collect_chain(&self, start: i32) -> Result<Vec<i32>> {
        let mut positions = Vec::new();
        let mut visited = HashSet::new();
        let mut position = start;

        while position != TERMINAL_BLOCK {
            if !visited.insert(position) {
                return Err(ChainError::CorruptedChain(format!(
                    "chain starting at {} revisits block {}",
                    start, position
                )));
            }
            let block = self.read_block(position)?;
            positions.push(position);
            position = block.next;
        }

        Ok(positions)
    }

    /// Write `value` across `positions` in a single pass: payload-sized
    /// slices, each block's `next` pointing at the following position and the
    /// last at the terminal marker.
    pub fn rewrite_chain(&self, positions: &[i32], key_hash: i32, value: &[u8]) -> Result<()> {
        let expected = self.layout.blocks_for(value.len());
        if positions.len() != expected {
            return Err(ChainError::IllegalState(format!(
                "value of {} bytes needs {} blocks, got {} positions",
                value.len(),
                expected,
                positions.len()
            )));
        }

        let payload = self.layout.payload_size();
        for (i, &position) in positions.iter().enumerate() {
            let from = (i * payload).min(value.len());
            let to = (from + payload).min(value.len());
            let chunk = &value[from..to];

            let next = positions.get(i + 1).copied().unwrap_or(TERMINAL_BLOCK);
            let header = BlockHeader::Occupied {
                length: chunk.len(),
                next,
            };
            self.write_block(position, &header, key_hash, chunk)?;
        }

        trace!(
            blocks = positions.len(),
            bytes = value.len(),
            "rewrote chain"
        );
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

    fn ensure_in_file(&self, position: i32) -> Result<()> {
        if position < 0 || position >= self.block_count()? {
            return Err(ChainError::CorruptedChain(format!(
                "block position {} is outside the data file",
                position
            )));
        }
        Ok(())
    }
}
