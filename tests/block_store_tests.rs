//! Tests for DataBlockStore
//!
//! These tests verify:
//! - Single-block encode/write/read round trips
//! - Chain rewrite/read/collect round trips
//! - Free-header rewrites
//! - Corruption detection (out-of-file positions, cycles, ragged files)

use std::path::PathBuf;

use chainkv::block::{BlockHeader, BlockLayout, DataBlockStore, TERMINAL_BLOCK};
use chainkv::ChainError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, DataBlockStore) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let store = DataBlockStore::open(&path, BlockLayout::new(128, false)).unwrap();
    (temp_dir, store)
}

fn value_of_len(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Single-Block Tests
// =============================================================================

#[test]
fn test_write_and_read_block() {
    let (_temp, store) = setup_store();

    let header = BlockHeader::Occupied {
        length: 5,
        next: TERMINAL_BLOCK,
    };
    store.write_block(0, &header, 0, b"hello").unwrap();

    let block = store.read_block(0).unwrap();
    assert_eq!(block.content.as_ref(), b"hello");
    assert_eq!(block.next, TERMINAL_BLOCK);
    assert_eq!(store.block_count().unwrap(), 1);
}

#[test]
fn test_overwrite_block_in_place() {
    let (_temp, store) = setup_store();

    let header = BlockHeader::Occupied { length: 3, next: 7 };
    store.write_block(0, &header, 0, b"old").unwrap();

    let header = BlockHeader::Occupied {
        length: 3,
        next: TERMINAL_BLOCK,
    };
    store.write_block(0, &header, 0, b"new").unwrap();

    let block = store.read_block(0).unwrap();
    assert_eq!(block.content.as_ref(), b"new");
    assert_eq!(block.next, TERMINAL_BLOCK);
    assert_eq!(store.block_count().unwrap(), 1);
}

#[test]
fn test_read_beyond_file_fails() {
    let (_temp, store) = setup_store();

    let result = store.read_block(0);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));

    let result = store.read_block(-1);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
}

#[test]
fn test_write_with_gap_fails() {
    let (_temp, store) = setup_store();

    let header = BlockHeader::Occupied {
        length: 0,
        next: TERMINAL_BLOCK,
    };
    // Block 0 does not exist yet, so block 2 would leave a hole
    let result = store.write_block(2, &header, 0, b"");
    assert!(matches!(result, Err(ChainError::IllegalState(_))));
}

// =============================================================================
// Chain Tests
// =============================================================================

#[test]
fn test_chain_round_trip_single_block() {
    let (_temp, store) = setup_store();

    let value = value_of_len(50);
    store.rewrite_chain(&[0], 42, &value).unwrap();

    assert_eq!(store.read_chain(0, 42).unwrap(), value);
    assert_eq!(store.collect_chain(0).unwrap(), vec![0]);
}

#[test]
fn test_chain_round_trip_multi_block() {
    let (_temp, store) = setup_store();

    // 250 bytes over a 120-byte payload = 3 blocks
    let value = value_of_len(250);
    store.rewrite_chain(&[0, 1, 2], 42, &value).unwrap();

    assert_eq!(store.read_chain(0, 42).unwrap(), value);
    assert_eq!(store.collect_chain(0).unwrap(), vec![0, 1, 2]);

    // Intermediate links point forward, tail terminates
    assert_eq!(store.read_block(0).unwrap().next, 1);
    assert_eq!(store.read_block(1).unwrap().next, 2);
    assert_eq!(store.read_block(2).unwrap().next, TERMINAL_BLOCK);
}

#[test]
fn test_chain_over_scattered_positions() {
    let (_temp, store) = setup_store();

    // Lay down 4 blocks, then chain through 3 of them out of order
    for position in 0..4 {
        let header = BlockHeader::Occupied {
            length: 0,
            next: TERMINAL_BLOCK,
        };
        store.write_block(position, &header, 0, b"").unwrap();
    }

    let value = value_of_len(300);
    store.rewrite_chain(&[3, 0, 2], 9, &value).unwrap();

    assert_eq!(store.read_chain(3, 9).unwrap(), value);
    assert_eq!(store.collect_chain(3).unwrap(), vec![3, 0, 2]);
}

#[test]
fn test_exact_payload_multiple() {
    let (_temp, store) = setup_store();

    // Exactly two full blocks worth of content
    let value = value_of_len(240);
    store.rewrite_chain(&[0, 1], 1, &value).unwrap();
    assert_eq!(store.read_chain(0, 1).unwrap(), value);
}

#[test]
fn test_empty_value_occupies_one_block() {
    let (_temp, store) = setup_store();

    store.rewrite_chain(&[0], 1, b"").unwrap();
    assert_eq!(store.read_chain(0, 1).unwrap(), Vec::<u8>::new());
    assert_eq!(store.block_count().unwrap(), 1);
}

#[test]
fn test_rewrite_chain_position_count_mismatch() {
    let (_temp, store) = setup_store();

    let value = value_of_len(250); // needs 3 blocks
    let result = store.rewrite_chain(&[0, 1], 1, &value);
    assert!(matches!(result, Err(ChainError::IllegalState(_))));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_chain_cycle_detected() {
    let (_temp, store) = setup_store();

    // Two blocks pointing at each other
    let header = BlockHeader::Occupied { length: 1, next: 1 };
    store.write_block(0, &header, 0, b"a").unwrap();
    let header = BlockHeader::Occupied { length: 1, next: 0 };
    store.write_block(1, &header, 0, b"b").unwrap();

    let result = store.read_chain(0, 0);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));

    let result = store.collect_chain(0);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
}

#[test]
fn test_unreadable_head_is_corrupted_data() {
    let (_temp, store) = setup_store();

    // Nothing at position 0: the head of the claimed chain cannot be read
    let result = store.read_chain(0, 7);
    assert!(matches!(result, Err(ChainError::CorruptedData(_))));
}

#[test]
fn test_unreadable_tail_is_corrupted_chain() {
    let (_temp, store) = setup_store();

    // Head exists but points past the end of the file
    let header = BlockHeader::Occupied { length: 1, next: 5 };
    store.write_block(0, &header, 0, b"x").unwrap();

    let result = store.read_chain(0, 7);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
}

#[test]
fn test_ragged_file_rejected_at_open() {
    let temp_dir = TempDir::new().unwrap();
    let path: PathBuf = temp_dir.path().join("blocks.dat");
    std::fs::write(&path, vec![0u8; 100]).unwrap(); // not a multiple of 128

    let result = DataBlockStore::open(&path, BlockLayout::new(128, false));
    assert!(matches!(result, Err(ChainError::MalformedHeader(_))));
}

// =============================================================================
// Free-Header Tests
// =============================================================================

#[test]
fn test_free_header_round_trip() {
    let (_temp, store) = setup_store();

    store.rewrite_chain(&[0], 1, b"doomed").unwrap();
    store.write_free_header(0, 17).unwrap();

    assert_eq!(store.read_free_next(0).unwrap(), 17);
}

#[test]
fn test_free_read_of_occupied_block_fails() {
    let (_temp, store) = setup_store();

    store.rewrite_chain(&[0], 1, b"live").unwrap();

    let result = store.read_free_next(0);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
}

// =============================================================================
// Stamped Layout Tests
// =============================================================================

#[test]
fn test_stamped_chain_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let store = DataBlockStore::open(&path, BlockLayout::new(128, true)).unwrap();

    // Payload shrinks to 116 with the stamp field; 250 bytes still fit in 3
    let value = value_of_len(250);
    store.rewrite_chain(&[0, 1, 2], 1234, &value).unwrap();

    assert_eq!(store.read_chain(0, 1234).unwrap(), value);
}

#[test]
fn test_stamp_mismatch_is_corrupted_chain() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let store = DataBlockStore::open(&path, BlockLayout::new(128, true)).unwrap();

    store.rewrite_chain(&[0], 1234, b"mine").unwrap();

    // Reading the same chain as a different key hash must fail
    let result = store.read_chain(0, 5678);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
}
