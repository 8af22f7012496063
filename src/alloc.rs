//! Contracts between the index and the physical block allocator
//!
//! The allocator itself lives outside this crate. It hands out fixed-size
//! blocks by allocation class and identifies them with durable relative
//! handles, so references stored in the index stay valid across process
//! restarts and pool relocation.

use crate::blocks::BlockClass;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;

/// Durable relative reference to an allocator-owned block.
///
/// Zero is reserved as the null value and is unrepresentable, which lets
/// `Option<BlockHandle>` keep the same footprint as a raw offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHandle(NonZeroU64);

impl BlockHandle {
    /// Wrap a raw relative offset; returns `None` for the reserved zero value.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(BlockHandle)
    }

    /// The raw relative offset backing this handle.
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Descriptor of a physical block. Owned by the allocator/object layer;
/// the index only stores handles to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDesc {
    /// Byte offset of the file range this block backs
    pub offset: u64,

    /// Block size in bytes (one of the declared class sizes)
    pub size: u64,

    /// Logically preceding block, resolved through the pool context
    pub prev: Option<BlockHandle>,
}

impl BlockDesc {
    /// First byte past the range covered by this block
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Read access to block descriptors through a pool context.
///
/// Implemented by the embedding engine's pool object and supplied to
/// [`OffsetMap`](crate::offset_map::OffsetMap) at construction.
pub trait BlockResolver {
    /// Resolve a handle to its descriptor.
    ///
    /// Handles stored in the index are kept live by the owning object layer;
    /// resolving a dangling handle is a caller bug and may panic.
    fn block(&self, handle: BlockHandle) -> &BlockDesc;
}

impl<R: BlockResolver + ?Sized> BlockResolver for &R {
    fn block(&self, handle: BlockHandle) -> &BlockDesc {
        (**self).block(handle)
    }
}

/// Allocation interface of the external physical allocator.
///
/// Defines the narrow contract the index needs: per-class block pools,
/// fixed-size allocation by class id, and reclamation by handle.
pub trait BlockAllocator {
    /// Declare an allocation class so blocks of `class.size` can be carved
    /// from a dedicated pool.
    ///
    /// Returns [`ClassRejected`](crate::error::BlockMapError::ClassRejected)
    /// if the allocator does not support per-class pools.
    fn register_class(&mut self, class: &BlockClass) -> Result<()>;

    /// Allocate one block from the class's pool.
    fn allocate(&mut self, class_id: u64) -> Result<BlockHandle>;

    /// Return a block to its pool.
    fn free(&mut self, handle: BlockHandle) -> Result<()>;
}
