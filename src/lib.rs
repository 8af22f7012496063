//! # Blockmap - Block Indexing Core for Persistent-Memory File Storage
//!
//! `blockmap-rs` provides the indexing structures a persistent-memory file
//! storage engine builds on:
//!
//! - **Extent index** ([`OffsetMap`]): a sparse, height-adaptive trie
//!   mapping byte ranges of a file to physical block handles
//! - **Object tables** ([`HashTable`]): a bucketized id-to-object lookup
//!   that survives adversarial key sets by re-randomizing its hash
//! - **Size classes** ([`BlockClasses`]): block size classification and the
//!   alignment unit shared by the whole index
//!
//! The engine around this crate owns the physical allocator, the
//! transaction mechanism, and all locking; these structures are
//! single-threaded and synchronous, and reference blocks only through
//! durable relative handles supplied by the allocator.
//!
//! ## Quick Start
//!
//! ```rust
//! use blockmap_rs::{BlockClassConfig, BlockClasses, HashTable, Result};
//!
//! # fn main() -> Result<()> {
//! let classes = BlockClasses::new(&BlockClassConfig::default())?;
//!
//! // A 100 KiB write fits the 256 KiB class; the tail of a short extent
//! // stays within its limit.
//! let class = classes.data_class(100 * 1024, u64::MAX);
//! assert_eq!(class.size, 256 * 1024);
//!
//! // Object table keyed by inode number.
//! let mut cache: HashTable<u64> = HashTable::new()?;
//! cache.put(1, 0x4000)?;
//! assert_eq!(cache.get(1), Some(&0x4000));
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod blocks;
pub mod error;
pub mod hash_table;
pub mod offset_map;

pub use crate::alloc::{BlockAllocator, BlockDesc, BlockHandle, BlockResolver};
pub use crate::blocks::{
    BlockClass, BlockClassConfig, BlockClasses, DEFAULT_MIN_BLOCK_SIZE, METADATA_BLOCK_SIZE,
};
pub use crate::error::{BlockMapError, Result};
pub use crate::hash_table::HashTable;
pub use crate::offset_map::OffsetMap;
