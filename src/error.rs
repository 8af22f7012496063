use std::collections::TryReserveError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockMapError {
    #[error("Allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("Invalid block size: {0} (must be a non-zero power of two)")]
    InvalidBlockSize(u64),

    #[error("Allocator rejected allocation class {class_id} (unit size {size})")]
    ClassRejected { class_id: u64, size: u64 },

    #[error("Out of space: allocation class {0} has no free blocks")]
    OutOfSpace(u64),

    #[error("Unknown allocation class: {0}")]
    UnknownClass(u64),

    #[error("Invalid block handle: {0}")]
    InvalidHandle(u64),

    #[error("Block end {0} exceeds the maximum indexable range")]
    OffsetOutOfRange(u64),

    #[error("Entry not found for key {0}")]
    EntryNotFound(u64),
}

pub type Result<T> = std::result::Result<T, BlockMapError>;
