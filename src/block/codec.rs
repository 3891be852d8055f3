//! Block codec
//!
//! Encodes and decodes single blocks against a [`BlockLayout`].
//!
//! On disk the occupied/free distinction is not tagged: both states share one
//! layout, and a free block is simply written with a zero content length and
//! its `next` field repointed into the free chain. In memory the two states
//! are kept apart as [`BlockHeader`] variants; which variant a block decodes
//! as is decided by who reaches it (a live chain walk decodes occupied, the
//! free-chain walk decodes free).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChainError, Result};

use super::BlockLayout;

/// Terminal marker for both value chains and the free chain
pub const TERMINAL_BLOCK: i32 = -1;

/// In-memory view of a block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeader {
    /// Block belongs to a live value chain
    Occupied {
        /// Content bytes stored in this block
        length: usize,
        /// Next block of the same value, or [`TERMINAL_BLOCK`]
        next: i32,
    },

    /// Block is on the free chain
    Free {
        /// Next free block in ascending order, or [`TERMINAL_BLOCK`]
        next: i32,
    },
}

impl BlockHeader {
    /// The chain pointer, regardless of variant
    pub fn next(&self) -> i32 {
        match self {
            BlockHeader::Occupied { next, .. } => *next,
            BlockHeader::Free { next } => *next,
        }
    }
}

/// A decoded occupied block
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    /// Key-hash stamp ([`TERMINAL_BLOCK`] under the canonical layout)
    pub stamp: i32,
    /// Next block of the chain, or [`TERMINAL_BLOCK`]
    pub next: i32,
    /// Content bytes (length implicit)
    pub content: Bytes,
}

/// Encode a full block to exactly `block_size` bytes (zero-padded tail).
///
/// `stamp` is written only under the stamped layout; free blocks carry a
/// terminal stamp there.
pub fn encode_block(
    layout: &BlockLayout,
    header: &BlockHeader,
    stamp: i32,
    content: &[u8],
) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(layout.block_size());

    match header {
        BlockHeader::Occupied { length, next } => {
            if *length != content.len() {
                return Err(ChainError::IllegalState(format!(
                    "header length {} does not match content length {}",
                    length,
                    content.len()
                )));
            }
            if *length > layout.payload_size() {
                return Err(ChainError::IllegalState(format!(
                    "content of {} bytes exceeds block payload of {} bytes",
                    length,
                    layout.payload_size()
                )));
            }
            buf.put_i32_le(*length as i32);
            if layout.stamped() {
                buf.put_i32_le(stamp);
            }
            buf.put_slice(content);
            buf.put_i32_le(*next);
        }
        BlockHeader::Free { next } => {
            buf.put_i32_le(0);
            if layout.stamped() {
                buf.put_i32_le(TERMINAL_BLOCK);
            }
            buf.put_i32_le(*next);
        }
    }

    buf.resize(layout.block_size(), 0);
    Ok(buf)
}

/// Encode only the header prefix of a free block: `[0][(stamp)][next]`.
///
/// Used when a block is relinked into the free chain; the stale content
/// bytes behind the prefix are left untouched.
pub(crate) fn encode_free_prefix(layout: &BlockLayout, next: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(layout.header_size());
    buf.put_i32_le(0);
    if layout.stamped() {
        buf.put_i32_le(TERMINAL_BLOCK);
    }
    buf.put_i32_le(next);
    buf
}

/// Decode a full block as occupied.
pub(crate) fn decode_occupied(layout: &BlockLayout, buf: &[u8]) -> Result<DecodedBlock> {
    if buf.len() != layout.block_size() {
        return Err(ChainError::MalformedHeader(format!(
            "expected {} block bytes, got {}",
            layout.block_size(),
            buf.len()
        )));
    }

    let mut cursor = buf;
    let raw_length = cursor.get_i32_le();
    if raw_length < 0 {
        return Err(ChainError::MalformedHeader(format!(
            "negative content length {}",
            raw_length
        )));
    }
    let length = raw_length as usize;
    if length > layout.payload_size() {
        return Err(ChainError::CorruptedChain(format!(
            "content length {} exceeds payload size {}",
            length,
            layout.payload_size()
        )));
    }

    let stamp = if layout.stamped() {
        cursor.get_i32_le()
    } else {
        TERMINAL_BLOCK
    };

    let content = Bytes::copy_from_slice(&cursor[..length]);
    cursor.advance(length);
    let next = cursor.get_i32_le();

    Ok(DecodedBlock {
        stamp,
        next,
        content,
    })
}

/// Decode only the header prefix of a free block, yielding its free-chain
/// pointer. A nonzero length field means the block is not actually free.
pub(crate) fn decode_free_prefix(layout: &BlockLayout, buf: &[u8]) -> Result<i32> {
    if buf.len() < layout.header_size() {
        return Err(ChainError::MalformedHeader(format!(
            "expected at least {} header bytes, got {}",
            layout.header_size(),
            buf.len()
        )));
    }

    let mut cursor = buf;
    let raw_length = cursor.get_i32_le();
    if raw_length != 0 {
        return Err(ChainError::CorruptedChain(format!(
            "free chain reached a block with content length {}",
            raw_length
        )));
    }
    if layout.stamped() {
        let _stamp = cursor.get_i32_le();
    }
    Ok(cursor.get_i32_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> BlockLayout {
        BlockLayout::new(128, false)
    }

    fn stamped() -> BlockLayout {
        BlockLayout::new(128, true)
    }

    #[test]
    fn test_occupied_round_trip() {
        let layout = plain();
        let header = BlockHeader::Occupied {
            length: 5,
            next: 42,
        };
        let buf = encode_block(&layout, &header, 0, b"hello").unwrap();
        assert_eq!(buf.len(), layout.block_size());

        let block = decode_occupied(&layout, &buf).unwrap();
        assert_eq!(block.content.as_ref(), b"hello");
        assert_eq!(block.next, 42);
        assert_eq!(block.stamp, TERMINAL_BLOCK);
    }

    #[test]
    fn test_stamped_round_trip() {
        let layout = stamped();
        let header = BlockHeader::Occupied {
            length: 3,
            next: TERMINAL_BLOCK,
        };
        let buf = encode_block(&layout, &header, 777, b"abc").unwrap();

        let block = decode_occupied(&layout, &buf).unwrap();
        assert_eq!(block.stamp, 777);
        assert_eq!(block.content.as_ref(), b"abc");
        assert_eq!(block.next, TERMINAL_BLOCK);
    }

    #[test]
    fn test_free_prefix_round_trip() {
        let layout = plain();
        let buf = encode_free_prefix(&layout, 7);
        assert_eq!(decode_free_prefix(&layout, &buf).unwrap(), 7);
    }

    #[test]
    fn test_free_prefix_rejects_occupied_block() {
        let layout = plain();
        let header = BlockHeader::Occupied { length: 2, next: 1 };
        let buf = encode_block(&layout, &header, 0, b"xy").unwrap();

        let result = decode_free_prefix(&layout, &buf);
        assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
    }

    #[test]
    fn test_decode_rejects_negative_length() {
        let layout = plain();
        let mut buf = vec![0u8; layout.block_size()];
        buf[0..4].copy_from_slice(&(-2i32).to_le_bytes());

        let result = decode_occupied(&layout, &buf);
        assert!(matches!(result, Err(ChainError::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let layout = plain();
        let mut buf = vec![0u8; layout.block_size()];
        buf[0..4].copy_from_slice(&(121i32).to_le_bytes()); // payload is 120

        let result = decode_occupied(&layout, &buf);
        assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_content() {
        let layout = plain();
        let content = vec![0u8; layout.payload_size() + 1];
        let header = BlockHeader::Occupied {
            length: content.len(),
            next: TERMINAL_BLOCK,
        };

        let result = encode_block(&layout, &header, 0, &content);
        assert!(matches!(result, Err(ChainError::IllegalState(_))));
    }
}
