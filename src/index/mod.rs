//! Index Module
//!
//! Maps a 32-bit key hash to the position of the first block of its value
//! chain. Lookups go through an in-memory multiway search tree; persistence
//! is a flat file of fixed-size records that is linearly scanned at load to
//! rebuild the tree (the tree itself is never serialized).
//!
//! ## Record Format (9 bytes)
//! ```text
//! ┌───────────────┬─────────────────────┬───────────┐
//! │ KeyHash: i32  │ BlockPosition: i32  │ Flag: u8  │
//! └───────────────┴─────────────────────┴───────────┘
//! ```
//!
//! Flag 0 = live, 1 = sentinel, 2 = tombstone. Record 0 is the sentinel: its
//! block position is the head of the free chain (or the file growth point
//! when no free blocks exist). Tombstones keep removals durable across
//! restarts; their slots are recycled by later creations.

mod store;
mod tree;

pub use store::IndexStore;
pub use tree::SearchTree;

use crate::error::{ChainError, Result};

// =============================================================================
// Shared Constants
// =============================================================================

/// On-disk size of one index record
pub const RECORD_SIZE: usize = 9;

/// Record flag: live key-hash entry
pub(crate) const FLAG_LIVE: u8 = 0;

/// Record flag: the reserved free-chain sentinel
pub(crate) const FLAG_SENTINEL: u8 = 1;

/// Record flag: removed entry, slot reusable
pub(crate) const FLAG_TOMBSTONE: u8 = 2;

// =============================================================================
// Index Record
// =============================================================================

/// One key-hash index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Index {
    /// The logical key (hashed externally by the caller)
    pub key_hash: i32,

    /// Position (block index, not byte offset) of the chain's first block
    pub block_position: i32,

    /// Whether this is the reserved free-chain sentinel
    pub sentinel: bool,
}

impl Index {
    /// A live entry for `key_hash` starting at `block_position`
    pub fn live(key_hash: i32, block_position: i32) -> Self {
        Self {
            key_hash,
            block_position,
            sentinel: false,
        }
    }

    /// The sentinel entry denoting the free-chain head
    pub fn sentinel(block_position: i32) -> Self {
        Self {
            key_hash: 0,
            block_position,
            sentinel: true,
        }
    }
}

// =============================================================================
// Record Codec
// =============================================================================

pub(crate) fn encode_record(key_hash: i32, block_position: i32, flag: u8) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[0..4].copy_from_slice(&key_hash.to_le_bytes());
    buf[4..8].copy_from_slice(&block_position.to_le_bytes());
    buf[8] = flag;
    buf
}

pub(crate) fn decode_record(buf: &[u8]) -> Result<(i32, i32, u8)> {
    if buf.len() < RECORD_SIZE {
        return Err(ChainError::MalformedRecord(format!(
            "expected {} record bytes, got {}",
            RECORD_SIZE,
            buf.len()
        )));
    }

    let key_hash = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    let block_position = i32::from_le_bytes(buf[4..8].try_into().unwrap());
    let flag = buf[8];

    if flag > FLAG_TOMBSTONE {
        return Err(ChainError::MalformedRecord(format!(
            "unknown record flag {}",
            flag
        )));
    }

    Ok((key_hash, block_position, flag))
}
