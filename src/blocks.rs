//! Block size classes and range alignment
//!
//! Every block in the pool comes from a small fixed set of size classes:
//! one metadata class plus a graduated set of data classes. The smallest
//! data class doubles as the alignment unit for every offset and length
//! handled by the index. Bigger classes are preferred when a write is large
//! enough, which keeps the extent tree shallow; the caller-supplied limit
//! keeps short file tails from landing in multi-megabyte blocks.

use crate::alloc::BlockAllocator;
use crate::error::{BlockMapError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Size of every metadata block (inodes, object tables, node arrays)
pub const METADATA_BLOCK_SIZE: u64 = 4096;

/// Default smallest data block size (16 KiB)
pub const DEFAULT_MIN_BLOCK_SIZE: u64 = 0x4000;

const METADATA_CLASS_ID: u64 = 128;
const FIRST_DATA_CLASS_ID: u64 = 129;
const FIXED_CLASS_ID: u64 = 254;

/// One allocation class: a fixed unit size carved from a dedicated pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockClass {
    /// Unit size in bytes
    pub size: u64,

    /// Allocation granularity hint: how many units the allocator should
    /// reserve per internal chunk
    pub units_per_block: u32,

    /// Stable identifier the class is registered under
    pub class_id: u64,
}

/// Pool-creation configuration for block size classes.
///
/// Applied exactly once, when the pool is created; the resulting alignment
/// unit is fixed for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockClassConfig {
    /// Smallest data class size; becomes the pool's alignment unit.
    /// Must be a non-zero power of two.
    pub min_block_size: u64,

    /// Use a single data class of this size instead of the graduated set.
    /// Rounded up to the alignment unit.
    pub fixed_block_size: Option<u64>,
}

impl Default for BlockClassConfig {
    fn default() -> Self {
        BlockClassConfig {
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            fixed_block_size: None,
        }
    }
}

/// The pool's block size classes and alignment unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockClasses {
    metadata: BlockClass,
    data: Vec<BlockClass>,
    fixed: Option<BlockClass>,
    alignment: u64,
}

impl BlockClasses {
    /// Build the class set from a pool-creation configuration.
    pub fn new(config: &BlockClassConfig) -> Result<Self> {
        let min = config.min_block_size;
        if min == 0 || !min.is_power_of_two() {
            return Err(BlockMapError::InvalidBlockSize(min));
        }

        let mut classes = BlockClasses {
            metadata: BlockClass {
                size: METADATA_BLOCK_SIZE,
                units_per_block: 100,
                class_id: METADATA_CLASS_ID,
            },
            data: Vec::new(),
            fixed: None,
            alignment: min,
        };

        if let Some(size) = config.fixed_block_size {
            if size < min {
                return Err(BlockMapError::InvalidBlockSize(size));
            }
            let size = classes.align_up(size).min(classes.max_block_size());
            classes.fixed = Some(BlockClass {
                size,
                units_per_block: 1000,
                class_id: FIXED_CLASS_ID,
            });
            debug!(size, "using fixed data block size");
        } else {
            // Graduated sizes; anything between min and 256 KiB collapses
            // into the 256 KiB class, and so on upward.
            let sizes = [min, 256 * 1024, 4 * 1024 * 1024];
            let hints = [100u32, 50, 10];
            for (i, (&size, &units)) in sizes.iter().zip(hints.iter()).enumerate() {
                if size < min {
                    continue;
                }
                classes.data.push(BlockClass {
                    size,
                    units_per_block: units,
                    class_id: FIRST_DATA_CLASS_ID + i as u64,
                });
            }
        }

        Ok(classes)
    }

    /// The alignment unit: the smallest data block size, always a power of
    /// two, fixed for the pool's lifetime.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Largest representable block size, rounded down to the alignment unit.
    pub fn max_block_size(&self) -> u64 {
        u64::from(u32::MAX) - (u64::from(u32::MAX) % self.alignment)
    }

    /// The class backing metadata allocations (node arrays, object tables).
    pub fn metadata_class(&self) -> BlockClass {
        self.metadata
    }

    /// Pick the data class for a write of `size` bytes, never exceeding
    /// `limit`.
    ///
    /// Returns the smallest class that fits `size`, unless that class would
    /// exceed `limit`, in which case the largest class within `limit` wins.
    /// `limit` below the alignment unit is a caller bug.
    pub fn data_class(&self, size: u64, limit: u64) -> BlockClass {
        if let Some(fixed) = self.fixed {
            assert!(limit >= fixed.size, "limit {} below fixed block size", limit);
            return fixed;
        }

        assert!(limit >= self.alignment, "limit {} below alignment unit", limit);

        for (i, class) in self.data.iter().enumerate() {
            if class.size > limit {
                return self.data[i - 1];
            }
            if size <= class.size {
                return *class;
            }
        }

        self.data[self.data.len() - 1]
    }

    /// Round `n` down to the alignment unit.
    pub fn align_down(&self, n: u64) -> u64 {
        n & !(self.alignment - 1)
    }

    /// Round `n` up to the alignment unit.
    pub fn align_up(&self, n: u64) -> u64 {
        self.align_down(n + self.alignment - 1)
    }

    /// Widen `(offset, length)` outward to aligned boundaries.
    ///
    /// The result covers whole blocks and always contains the input interval.
    pub fn expand_to_block_bounds(&self, offset: u64, length: u64) -> (u64, u64) {
        let length = length + offset % self.alignment;
        let offset = offset - offset % self.alignment;
        (offset, self.align_up(length))
    }

    /// Shrink `(offset, length)` inward to aligned boundaries.
    ///
    /// The result is contained in the input interval and may be empty.
    pub fn narrow_to_block_bounds(&self, offset: u64, length: u64) -> (u64, u64) {
        let end = self.align_down(offset + length);
        let offset = self.align_up(offset);
        if end > offset {
            (offset, end - offset)
        } else {
            (offset, 0)
        }
    }

    /// Declare every class with the external allocator at pool
    /// initialization.
    pub fn register_classes<A: BlockAllocator>(&self, allocator: &mut A) -> Result<()> {
        allocator.register_class(&self.metadata)?;

        if let Some(fixed) = &self.fixed {
            allocator.register_class(fixed)?;
            return Ok(());
        }

        for class in &self.data {
            allocator.register_class(class)?;
        }

        Ok(())
    }
}
