//! Offset-to-block extent index
//!
//! A sparse trie keyed by byte offset, one instance per open file. Each
//! level fans out 16 ways, so a node at level `L` spans
//! `alignment * 16^L` bytes. A block that covers a node's whole span is
//! stored directly in that slot as a leaf; a block that covers only part of
//! it forces the slot to become an internal node with 16 narrower children.
//! The tree height adapts: inserting past the current span adds root
//! levels, and removing the last blocks under a level collapses it again.
//!
//! The map stores only durable handles to allocator-owned blocks; it never
//! owns block memory. Lookups resolve predecessor links through the pool
//! context supplied at construction.

use crate::alloc::{BlockHandle, BlockResolver};
use crate::error::{BlockMapError, Result};
use tracing::debug;

/// Offset bits consumed per tree level
const LEVEL_BITS: u32 = 4;

/// Children per internal node
const NODE_WIDTH: usize = 1 << LEVEL_BITS;

/// One slot in the tree: a leaf holding at most one block handle, or an
/// internal node exclusively owning a 16-entry children array.
#[derive(Debug)]
enum Entry {
    Leaf(Option<BlockHandle>),
    Internal(Box<[Entry]>),
}

impl Entry {
    fn empty() -> Entry {
        Entry::Leaf(None)
    }

    fn is_empty_leaf(&self) -> bool {
        matches!(self, Entry::Leaf(None))
    }
}

/// Allocate a zeroed 16-entry children array, reporting allocator
/// exhaustion instead of aborting.
fn new_children() -> Result<Box<[Entry]>> {
    let mut entries = Vec::new();
    entries.try_reserve_exact(NODE_WIDTH)?;
    entries.resize_with(NODE_WIDTH, Entry::empty);
    Ok(entries.into_boxed_slice())
}

/// Sparse extent index mapping byte offsets to block handles.
///
/// `P` is the pool context used to resolve handles; mutation is expected to
/// run inside the engine's transaction and under its per-file lock.
#[derive(Debug)]
pub struct OffsetMap<P> {
    pool: P,
    root: Entry,
    top_level: u32,
    max_level: u32,
    alignment: u64,
}

impl<P: BlockResolver> OffsetMap<P> {
    /// Create an empty map over `pool` with the pool's alignment unit.
    pub fn new(pool: P, alignment: u64) -> Result<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(BlockMapError::InvalidBlockSize(alignment));
        }

        // Highest level whose span still fits in a u64 offset.
        let max_level = (63 - alignment.ilog2()) / LEVEL_BITS;

        Ok(OffsetMap {
            pool,
            root: Entry::empty(),
            top_level: 0,
            max_level,
            alignment,
        })
    }

    /// Bytes spanned by one entry at `level`.
    fn span(&self, level: u32) -> u64 {
        self.alignment << (LEVEL_BITS * level)
    }

    /// Current tree height; the root entry spans `alignment << (4 * top_level)`.
    pub fn top_level(&self) -> u32 {
        self.top_level
    }

    /// True if no block is recorded anywhere in the map.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty_leaf()
    }

    /// Record `handle` as the backing block for its descriptor's range.
    ///
    /// Grows the tree until the root span covers the block end, then writes
    /// the handle into every covered slot, splitting partially covered slots
    /// into internal nodes. On allocation failure the tree may be left
    /// partially updated; the enclosing transaction is responsible for
    /// rolling the structure back.
    pub fn insert(&mut self, handle: BlockHandle) -> Result<()> {
        let desc = *self.pool.block(handle);
        let end = desc
            .offset
            .checked_add(desc.size)
            .ok_or(BlockMapError::OffsetOutOfRange(desc.offset))?;

        while self.span(self.top_level) <= end {
            if self.top_level == self.max_level {
                return Err(BlockMapError::OffsetOutOfRange(end));
            }
            self.add_level()?;
        }

        let top = self.top_level;
        Self::set_range(
            self.alignment,
            std::slice::from_mut(&mut self.root),
            Some(handle),
            desc.offset,
            desc.size,
            top,
        )
    }

    /// Clear the range covered by `handle` and collapse any subtree left
    /// empty, shrinking the tree height to the minimum that still covers
    /// the remaining blocks.
    pub fn remove(&mut self, handle: BlockHandle) -> Result<()> {
        let desc = *self.pool.block(handle);
        let top = self.top_level;
        Self::set_range(
            self.alignment,
            std::slice::from_mut(&mut self.root),
            None,
            desc.offset,
            desc.size,
            top,
        )?;
        self.shrink();
        Ok(())
    }

    /// Find the block covering `offset`, or the closest block below it.
    ///
    /// If the slot for `offset` is empty, the nearest occupied slot to the
    /// left wins; failing that, the first block to the right starts past
    /// `offset`, so its predecessor link is the answer. Offsets at or past
    /// the root span are clamped to the last indexable unit; lookups never
    /// mutate the tree.
    pub fn find_closest(&self, offset: u64) -> Option<BlockHandle> {
        let top_span = self.span(self.top_level);
        let mut offset = if offset >= top_span {
            top_span - self.alignment
        } else {
            offset
        };

        let mut level = self.top_level;
        let mut node = &self.root;
        let mut context: Option<(&[Entry], usize)> = None;

        while let Entry::Internal(children) = node {
            level -= 1;
            let span = self.span(level);
            let idx = (offset / span) as usize;
            offset %= span;
            context = Some((&children[..], idx));
            node = &children[idx];
        }

        if let Entry::Leaf(Some(handle)) = node {
            return Some(*handle);
        }

        // Empty slot; if the walk never descended, the whole tree is empty.
        let (children, idx) = context?;

        // The nearest occupied slot to the left holds the closest block
        // with a smaller offset.
        for sibling in children[..idx].iter().rev() {
            if let Some(handle) = rightmost_block(sibling) {
                return Some(handle);
            }
        }

        // Any block to the right starts past `offset`, so the closest
        // smaller block is that block's predecessor.
        for sibling in children[idx + 1..].iter() {
            if let Some(handle) = leftmost_block(sibling) {
                return self.pool.block(handle).prev;
            }
        }

        None
    }

    /// Add one root level. Existing root content is relocated into child
    /// slot 0 of the new level; an empty root grows without allocating.
    fn add_level(&mut self) -> Result<()> {
        self.top_level += 1;

        if !self.root.is_empty_leaf() {
            let mut children = new_children()?;
            children[0] = std::mem::replace(&mut self.root, Entry::empty());
            self.root = Entry::Internal(children);
        }

        debug!(top_level = self.top_level, "extent tree grew a level");
        Ok(())
    }

    /// Write `block` (or clear, for `None`) into every entry covering
    /// `[offset, offset + remaining)` within `entries`, where each entry
    /// spans `span(level)` bytes and `offset` is relative to the array
    /// start.
    fn set_range(
        alignment: u64,
        entries: &mut [Entry],
        block: Option<BlockHandle>,
        mut offset: u64,
        mut remaining: u64,
        level: u32,
    ) -> Result<()> {
        let span = alignment << (LEVEL_BITS * level);
        let mut idx = (offset / span) as usize;

        while remaining > 0 {
            let entry = &mut entries[idx];

            if offset % span == 0 && remaining >= span {
                // Block covers this entry's whole span; store it as a leaf.
                // Dropping a previous value here also drops any subtree it
                // owned.
                *entry = Entry::Leaf(block);

                offset += span;
                remaining -= span;
            } else {
                assert!(level > 0, "block range not aligned to the index unit");

                let sub_offset = offset % span;
                let sub_remaining = (span - sub_offset).min(remaining);

                let children = match entry {
                    Entry::Internal(children) => Some(children),
                    Entry::Leaf(None) => {
                        if block.is_some() {
                            *entry = Entry::Internal(new_children()?);
                            match entry {
                                Entry::Internal(children) => Some(children),
                                Entry::Leaf(_) => unreachable!(),
                            }
                        } else {
                            // Clearing a range nothing was recorded under.
                            None
                        }
                    }
                    Entry::Leaf(Some(_)) => {
                        panic!("partial update of a fully covered slot");
                    }
                };

                if let Some(children) = children {
                    Self::set_range(
                        alignment,
                        children,
                        block,
                        sub_offset,
                        sub_remaining,
                        level - 1,
                    )?;

                    if block.is_none() {
                        Self::collapse_if_empty(entry);
                    }
                }

                offset += sub_remaining;
                remaining -= sub_remaining;
            }

            idx += 1;
        }

        Ok(())
    }

    /// Demote an internal node whose children are all empty back to an
    /// empty leaf, freeing its children array.
    fn collapse_if_empty(entry: &mut Entry) {
        if let Entry::Internal(children) = entry {
            if children.iter().all(Entry::is_empty_leaf) {
                *entry = Entry::empty();
            }
        }
    }

    /// Drop root levels that no longer index anything: while child 0 is the
    /// only occupied child and is itself internal, splice its children into
    /// the root and decrement the height.
    fn shrink(&mut self) {
        while self.top_level > 0 {
            match &mut self.root {
                Entry::Leaf(_) => {
                    self.top_level = 0;
                    debug!("extent tree emptied");
                }
                Entry::Internal(children) => {
                    if !matches!(children[0], Entry::Internal(_)) {
                        return;
                    }
                    if children[1..].iter().any(|e| !e.is_empty_leaf()) {
                        return;
                    }

                    let grandchildren = std::mem::replace(&mut children[0], Entry::empty());
                    self.root = grandchildren;
                    self.top_level -= 1;
                    debug!(top_level = self.top_level, "extent tree dropped a level");
                }
            }
        }
    }
}

/// Handle of the highest-offset block stored under `entry`, if any.
fn rightmost_block(entry: &Entry) -> Option<BlockHandle> {
    match entry {
        Entry::Leaf(handle) => *handle,
        Entry::Internal(children) => children.iter().rev().find_map(rightmost_block),
    }
}

/// Handle of the lowest-offset block stored under `entry`, if any.
fn leftmost_block(entry: &Entry) -> Option<BlockHandle> {
    match entry {
        Entry::Leaf(handle) => *handle,
        Entry::Internal(children) => children.iter().find_map(leftmost_block),
    }
}
