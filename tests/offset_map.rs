//! Integration tests for the extent index: height adaptation, range
//! clearing, and closest-block lookup through predecessor links.

use blockmap_rs::{BlockDesc, BlockHandle, BlockResolver, OffsetMap, DEFAULT_MIN_BLOCK_SIZE};

const ALIGN: u64 = DEFAULT_MIN_BLOCK_SIZE;

/// Node fan-out of the extent tree.
const N: u64 = 16;

#[derive(Default)]
struct Pool {
    blocks: Vec<BlockDesc>,
}

impl Pool {
    fn add(&mut self, offset: u64, size: u64, prev: Option<BlockHandle>) -> BlockHandle {
        self.blocks.push(BlockDesc { offset, size, prev });
        BlockHandle::from_raw(self.blocks.len() as u64).unwrap()
    }
}

impl BlockResolver for Pool {
    fn block(&self, handle: BlockHandle) -> &BlockDesc {
        &self.blocks[(handle.raw() - 1) as usize]
    }
}

#[test]
fn height_grows_to_cover_inserts() {
    let mut pool = Pool::default();
    let b1 = pool.add(0, ALIGN, None);
    let b2 = pool.add(N * ALIGN, ALIGN, Some(b1));
    let b3 = pool.add((N * N * N + 1) * ALIGN, ALIGN, Some(b2));

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    assert_eq!(map.top_level(), 0);

    // First block needs one level.
    map.insert(b1).unwrap();
    assert_eq!(map.top_level(), 1);

    // A block ending just past the current span adds one level.
    map.insert(b2).unwrap();
    assert_eq!(map.top_level(), 2);

    // A far-away block adds two levels at once.
    map.insert(b3).unwrap();
    assert_eq!(map.top_level(), 4);

    for b in [b1, b2, b3] {
        assert_eq!(map.find_closest(pool.block(b).offset), Some(b));
    }
}

#[test]
fn height_shrinks_when_upper_levels_empty() {
    let mut pool = Pool::default();
    let b1 = pool.add(0, ALIGN, None);
    let b2 = pool.add(ALIGN, ALIGN, Some(b1));
    let b3 = pool.add(N * ALIGN, N * ALIGN, Some(b2));
    let b4 = pool.add(2 * N * ALIGN, N * ALIGN, Some(b3));

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    for b in [b1, b2, b3, b4] {
        map.insert(b).unwrap();
    }
    assert_eq!(map.top_level(), 2);

    // Removing b3 leaves b4 beyond the first child's span.
    map.remove(b3).unwrap();
    assert_eq!(map.top_level(), 2);

    // Removing b4 leaves everything under child 0, dropping a level.
    map.remove(b4).unwrap();
    assert_eq!(map.top_level(), 1);
    assert_eq!(map.find_closest(0), Some(b1));
    assert_eq!(map.find_closest(ALIGN), Some(b2));

    // b1 still occupies slot 0, so the level stays.
    map.remove(b2).unwrap();
    assert_eq!(map.top_level(), 1);

    map.remove(b1).unwrap();
    assert_eq!(map.top_level(), 0);
    assert!(map.is_empty());
    assert_eq!(map.find_closest(0), None);
}

#[test]
fn closest_lookup_walks_siblings_and_predecessors() {
    let mut pool = Pool::default();
    // b0 stands in for an earlier block of the file that is not indexed in
    // this map; b1 points back at it.
    let b0 = pool.add(0, ALIGN, None);
    let b1 = pool.add(3 * ALIGN, N * ALIGN, Some(b0));
    let b2 = pool.add(0, ALIGN, None);

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    map.insert(b1).unwrap();
    map.insert(b2).unwrap();

    // Every offset inside b1 resolves to b1.
    let b1_desc = *pool.block(b1);
    let mut offset = b1_desc.offset;
    while offset < b1_desc.end() {
        assert_eq!(map.find_closest(offset), Some(b1));
        offset += ALIGN;
    }

    // Past the last block, b1 is still the closest.
    assert_eq!(map.find_closest(b1_desc.end() + ALIGN), Some(b1));

    // Between b2 and b1, the left sibling scan finds b2.
    assert_eq!(map.find_closest(b1_desc.offset - ALIGN), Some(b2));

    // With b2 gone there is nothing to the left, so the right neighbor's
    // predecessor link answers.
    map.remove(b2).unwrap();
    assert_eq!(map.find_closest(b1_desc.offset - ALIGN), Some(b0));
}

#[test]
fn single_block_is_closest_for_its_whole_unit() {
    let mut pool = Pool::default();
    let b = pool.add(0, ALIGN, None);

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    map.insert(b).unwrap();

    assert_eq!(map.find_closest(0), Some(b));
    assert_eq!(map.find_closest(ALIGN - 1), Some(b));

    // Just past the block the slot is empty; the block at offset 0 remains
    // the closest one below.
    assert_eq!(map.find_closest(ALIGN), Some(b));
}

#[test]
fn closest_below_spans_intermediate_levels() {
    let mut pool = Pool::default();
    let b1 = pool.add(0, ALIGN, None);
    let b2 = pool.add(1024 * 1024, ALIGN, Some(b1));

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    map.insert(b1).unwrap();
    map.insert(b2).unwrap();

    assert_eq!(map.find_closest(512 * 1024), Some(b1));
    assert_eq!(map.find_closest(1024 * 1024), Some(b2));
}

#[test]
fn removing_every_block_resets_the_tree() {
    let mut pool = Pool::default();
    let b1 = pool.add(0, ALIGN, None);
    let b2 = pool.add(17 * ALIGN, ALIGN, Some(b1));
    // Forces a three-level tree.
    let b3 = pool.add(300 * ALIGN, ALIGN, Some(b2));

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    for b in [b1, b2, b3] {
        map.insert(b).unwrap();
    }
    assert_eq!(map.top_level(), 3);

    for b in [b1, b2, b3] {
        map.remove(b).unwrap();
    }

    assert_eq!(map.top_level(), 0);
    assert!(map.is_empty());
    assert_eq!(map.find_closest(0), None);
    assert_eq!(map.find_closest(300 * ALIGN), None);
}

#[test]
fn lookup_past_the_root_span_is_clamped() {
    let mut pool = Pool::default();
    let b = pool.add(0, ALIGN, None);

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    map.insert(b).unwrap();
    assert_eq!(map.top_level(), 1);

    // Offsets at or past the root span are clamped to the last indexable
    // unit instead of failing, and never grow the tree.
    assert_eq!(map.find_closest(N * ALIGN), Some(b));
    assert_eq!(map.find_closest(u64::MAX), Some(b));
    assert_eq!(map.top_level(), 1);
}

#[test]
fn removed_range_resolves_to_new_predecessor() {
    let mut pool = Pool::default();
    let b1 = pool.add(0, ALIGN, None);
    let b2 = pool.add(4 * ALIGN, 2 * ALIGN, Some(b1));
    let b3 = pool.add(9 * ALIGN, ALIGN, Some(b2));

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    for b in [b1, b2, b3] {
        map.insert(b).unwrap();
    }

    map.remove(b2).unwrap();

    // The cleared range now falls through to the closest remaining block.
    assert_eq!(map.find_closest(4 * ALIGN), Some(b1));
    assert_eq!(map.find_closest(5 * ALIGN), Some(b1));
    assert_eq!(map.find_closest(9 * ALIGN), Some(b3));
}

#[test]
fn interleaved_insert_remove_keeps_coverage_exact() {
    // Blocks land on every second alignment unit; every other one of them
    // is then deleted. Predecessor links are set up the way the block list
    // leaves them once the deletions have happened: each survivor points at
    // the previous survivor.
    let mut pool = Pool::default();
    let mut handles = Vec::new();
    let mut last_survivor = None;
    for i in 0..32u64 {
        let survives = i % 2 == 1;
        let handle = pool.add(2 * i * ALIGN, ALIGN, last_survivor);
        if survives {
            last_survivor = Some(handle);
        }
        handles.push(handle);
    }

    let mut map = OffsetMap::new(&pool, ALIGN).unwrap();
    for &b in &handles {
        map.insert(b).unwrap();
    }

    for &b in handles.iter().step_by(2) {
        map.remove(b).unwrap();
    }

    for (i, &b) in handles.iter().enumerate() {
        let offset = pool.block(b).offset;
        let found = map.find_closest(offset);
        if i % 2 == 1 {
            assert_eq!(found, Some(b));
        } else if i == 0 {
            // Nothing below the removed first block.
            assert_eq!(found, None);
        } else {
            // A removed block's range falls through to the survivor
            // just below it.
            assert_eq!(found, Some(handles[i - 1]));
        }
    }
}
