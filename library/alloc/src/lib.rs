//! Memory management primitives for the Subpython runtime.
//!
//! This crate provides the lowest tier of the runtime's memory system: a
//! [`BlockAllocator`] which carves variable-sized blocks out of a single
//! contiguous region of memory using a best-fit policy over an explicit
//! free list. Blocks are addressed by their byte offset into the region
//! rather than by raw pointers, so the owner of the allocator is free to
//! relocate or re-target the region without invalidating anything but the
//! offsets it explicitly rewrites.
//!
//! The value layer and the copying collector which sit on top of this crate
//! live in `subpython_rt`.
pub mod pool;
mod error;
mod utils;

pub use self::error::MemoryError;
pub use self::pool::{Block, BlockAllocator};
pub use self::utils::*;

/// The minimum alignment of every block in a pool
pub const MIN_ALIGN: usize = 8;
