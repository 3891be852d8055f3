//! Tests for FreeBlockAllocator
//!
//! These tests verify:
//! - Growth allocation on an empty file
//! - Smallest-first reuse of released blocks
//! - On-disk free chain linking (sentinel promotion, in-chain splicing)
//! - Rebuilding the free set from the chain after a restart
//! - Misuse detection (double release, uninitialized use)

use std::sync::Arc;

use chainkv::alloc::FreeBlockAllocator;
use chainkv::block::{BlockLayout, DataBlockStore, TERMINAL_BLOCK};
use chainkv::ChainError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, Arc<DataBlockStore>, FreeBlockAllocator) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let store = Arc::new(DataBlockStore::open(&path, BlockLayout::new(128, false)).unwrap());
    let alloc = FreeBlockAllocator::new(Arc::clone(&store));
    (temp_dir, store, alloc)
}

/// Allocate `n` blocks and write a chain through them so they exist on disk
fn allocate_and_write(store: &DataBlockStore, alloc: &mut FreeBlockAllocator, n: usize) -> Vec<i32> {
    let positions = alloc.allocate(n).unwrap();
    let payload = store.layout().payload_size();
    let value = vec![7u8; (n - 1) * payload + 1];
    store.rewrite_chain(&positions, 0, &value).unwrap();
    positions
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_growth_allocation_on_empty_file() {
    let (_temp, _store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    assert_eq!(alloc.head(), 0);
    assert_eq!(alloc.free_count(), 0);

    let positions = alloc.allocate(3).unwrap();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(alloc.limit(), 3);
    assert_eq!(alloc.metrics().file_growths, 3);
}

#[test]
fn test_allocate_prefers_free_over_growth() {
    let (_temp, store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let positions = allocate_and_write(&store, &mut alloc, 4);
    alloc.release(&positions[1..3]).unwrap(); // free {1, 2}

    // Two from the free set, one grown
    let next = alloc.allocate(3).unwrap();
    assert_eq!(next, vec![1, 2, 4]);
    assert_eq!(alloc.free_count(), 0);
}

#[test]
fn test_allocate_returns_ascending_positions() {
    let (_temp, store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let positions = allocate_and_write(&store, &mut alloc, 8);
    // Release a scattered subset
    alloc.release(&[positions[6], positions[1], positions[4]]).unwrap();

    let reused = alloc.allocate(4).unwrap();
    let mut sorted = reused.clone();
    sorted.sort_unstable();
    assert_eq!(reused, sorted);
    assert_eq!(reused, vec![1, 4, 6, 8]);
}

#[test]
fn test_allocate_before_initialize_fails() {
    let (_temp, _store, mut alloc) = setup();

    let result = alloc.allocate(1);
    assert!(matches!(result, Err(ChainError::IllegalState(_))));
}

#[test]
fn test_double_initialize_fails() {
    let (_temp, _store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let result = alloc.initialize(0);
    assert!(matches!(result, Err(ChainError::IllegalState(_))));
}

// =============================================================================
// Release / Chain-Linking Tests
// =============================================================================

#[test]
fn test_release_links_chain_on_disk() {
    let (_temp, store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let positions = allocate_and_write(&store, &mut alloc, 3);
    alloc.release(&positions).unwrap();

    assert_eq!(alloc.head(), 0);
    assert_eq!(alloc.free_count(), 3);

    // Ascending chain through the headers, terminated
    assert_eq!(store.read_free_next(0).unwrap(), 1);
    assert_eq!(store.read_free_next(1).unwrap(), 2);
    assert_eq!(store.read_free_next(2).unwrap(), TERMINAL_BLOCK);
}

#[test]
fn test_release_below_minimum_promotes_head() {
    let (_temp, store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let positions = allocate_and_write(&store, &mut alloc, 4);
    alloc.release(&positions[2..3]).unwrap(); // free {2}
    assert_eq!(alloc.head(), 2);

    alloc.release(&positions[0..1]).unwrap(); // free {0, 2}
    assert_eq!(alloc.head(), 0);

    // The old head is linked right after the new one
    assert_eq!(store.read_free_next(0).unwrap(), 2);
    assert_eq!(store.read_free_next(2).unwrap(), TERMINAL_BLOCK);
}

#[test]
fn test_release_between_free_blocks_splices() {
    let (_temp, store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let positions = allocate_and_write(&store, &mut alloc, 5);
    alloc.release(&[positions[1], positions[3]]).unwrap(); // free {1, 3}

    alloc.release(&[positions[2]]).unwrap(); // free {1, 2, 3}

    assert_eq!(store.read_free_next(1).unwrap(), 2);
    assert_eq!(store.read_free_next(2).unwrap(), 3);
    assert_eq!(store.read_free_next(3).unwrap(), TERMINAL_BLOCK);
}

#[test]
fn test_double_release_fails() {
    let (_temp, store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let positions = allocate_and_write(&store, &mut alloc, 2);
    alloc.release(&positions[0..1]).unwrap();

    let result = alloc.release(&positions[0..1]);
    assert!(matches!(result, Err(ChainError::IllegalState(_))));
}

#[test]
fn test_release_outside_file_fails() {
    let (_temp, _store, mut alloc) = setup();
    alloc.initialize(0).unwrap();

    let result = alloc.release(&[3]);
    assert!(matches!(result, Err(ChainError::IllegalState(_))));
}

// =============================================================================
// Restart Tests
// =============================================================================

#[test]
fn test_free_set_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let layout = BlockLayout::new(128, false);

    let head;
    {
        let store = Arc::new(DataBlockStore::open(&path, layout).unwrap());
        let mut alloc = FreeBlockAllocator::new(Arc::clone(&store));
        alloc.initialize(0).unwrap();

        let positions = allocate_and_write(&store, &mut alloc, 6);
        alloc.release(&[positions[1], positions[2], positions[4]]).unwrap();
        head = alloc.head();
        assert_eq!(head, 1);
    }

    // A new allocator rebuilds the same free set from the on-disk chain
    {
        let store = Arc::new(DataBlockStore::open(&path, layout).unwrap());
        let mut alloc = FreeBlockAllocator::new(Arc::clone(&store));
        alloc.initialize(head).unwrap();

        assert_eq!(alloc.free_count(), 3);
        assert!(alloc.is_free(1));
        assert!(alloc.is_free(2));
        assert!(alloc.is_free(4));
        assert_eq!(alloc.allocate(3).unwrap(), vec![1, 2, 4]);
    }
}

#[test]
fn test_initialize_with_sentinel_at_growth_point() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let layout = BlockLayout::new(128, false);

    {
        let store = Arc::new(DataBlockStore::open(&path, layout).unwrap());
        let mut alloc = FreeBlockAllocator::new(Arc::clone(&store));
        alloc.initialize(0).unwrap();
        allocate_and_write(&store, &mut alloc, 3);
        assert_eq!(alloc.head(), 3); // no free blocks: head is the growth point
    }

    {
        let store = Arc::new(DataBlockStore::open(&path, layout).unwrap());
        let mut alloc = FreeBlockAllocator::new(Arc::clone(&store));
        // Sentinel at the growth point means an empty free set
        alloc.initialize(3).unwrap();
        assert_eq!(alloc.free_count(), 0);
        assert_eq!(alloc.allocate(1).unwrap(), vec![3]);
    }
}

#[test]
fn test_initialize_detects_free_chain_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blocks.dat");
    let layout = BlockLayout::new(128, false);

    let store = Arc::new(DataBlockStore::open(&path, layout).unwrap());
    let mut alloc = FreeBlockAllocator::new(Arc::clone(&store));
    alloc.initialize(0).unwrap();
    allocate_and_write(&store, &mut alloc, 2);

    // Hand-craft a cyclic free chain: 0 -> 1 -> 0
    store.write_free_header(0, 1).unwrap();
    store.write_free_header(1, 0).unwrap();

    let store2 = Arc::new(DataBlockStore::open(&path, layout).unwrap());
    let mut alloc2 = FreeBlockAllocator::new(store2);
    let result = alloc2.initialize(0);
    assert!(matches!(result, Err(ChainError::CorruptedChain(_))));
}
