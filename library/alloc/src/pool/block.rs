use static_assertions::const_assert;

use crate::MIN_ALIGN;

use super::raw;

/// Byte offset of the type tag of a block
pub const TAG_OFFSET: usize = 0;
/// Byte offset of the auxiliary header word, free for use by the owner of a block
pub const AUX_OFFSET: usize = 4;
/// Byte offset of the total size of a block, header included
pub const SIZE_OFFSET: usize = 8;
/// Byte offset of the link word.
///
/// In a free block this holds the address of the next free block. Allocated
/// blocks hand this word over to their owner (the value layer keeps the
/// reference count here).
pub const LINK_OFFSET: usize = 16;
/// The size of a block header, which is also the smallest block we hand out
pub const HEADER_SIZE: usize = 24;

/// The type tag written into every free block
pub const FREE_TAG: u32 = 8;
/// The byte pattern written over block payloads when poisoning is enabled
pub const FREE_PATTERN: u8 = 0xCC;

/// Marks the end of the free list
const NIL: u64 = u64::MAX;

const_assert!(HEADER_SIZE % MIN_ALIGN == 0);
const_assert!(LINK_OFFSET + 8 <= HEADER_SIZE);
const_assert!(SIZE_OFFSET + 8 <= LINK_OFFSET);

/// A read-only view of the header of the block starting at some address in a pool.
///
/// The header layout is shared between free and allocated blocks: a 32-bit tag,
/// a 32-bit auxiliary word, the 64-bit block size, and the 64-bit link word.
#[derive(Copy, Clone)]
pub struct Block<'a> {
    memory: &'a [u8],
    addr: usize,
}
impl<'a> Block<'a> {
    #[inline]
    pub fn new(memory: &'a [u8], addr: usize) -> Self {
        debug_assert!(addr + HEADER_SIZE <= memory.len());
        Self { memory, addr }
    }

    /// The address of the first byte of this block
    #[inline(always)]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// The address one byte past the end of this block
    #[inline]
    pub fn end(&self) -> usize {
        self.addr + self.size()
    }

    #[inline]
    pub fn tag(&self) -> u32 {
        raw::load_u32(self.memory, self.addr + TAG_OFFSET)
    }

    #[inline]
    pub fn aux(&self) -> u32 {
        raw::load_u32(self.memory, self.addr + AUX_OFFSET)
    }

    /// The total footprint of this block in bytes, header included
    #[inline]
    pub fn size(&self) -> usize {
        raw::load_usize(self.memory, self.addr + SIZE_OFFSET)
    }

    #[inline(always)]
    pub fn is_free(&self) -> bool {
        self.tag() == FREE_TAG
    }

    /// The raw contents of the link word
    #[inline]
    pub fn link(&self) -> u64 {
        raw::load_u64(self.memory, self.addr + LINK_OFFSET)
    }

    /// The next block in the free list, if this is a free block with a successor
    #[inline]
    pub fn next_free(&self) -> Option<usize> {
        debug_assert!(self.is_free());
        match self.link() {
            NIL => None,
            next => Some(next as usize),
        }
    }

    /// The bytes following the header of this block
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.memory[(self.addr + HEADER_SIZE)..self.end()]
    }
}

/// Rewrites the header at `addr` as a free block of `size` bytes linked to `next`
pub(crate) fn write_free_header(memory: &mut [u8], addr: usize, size: usize, next: Option<usize>) {
    raw::store_u32(memory, addr + TAG_OFFSET, FREE_TAG);
    raw::store_u32(memory, addr + AUX_OFFSET, 0);
    raw::store_usize(memory, addr + SIZE_OFFSET, size);
    set_next_free(memory, addr, next);
}

#[inline]
pub(crate) fn set_next_free(memory: &mut [u8], addr: usize, next: Option<usize>) {
    raw::store_u64(
        memory,
        addr + LINK_OFFSET,
        next.map(|n| n as u64).unwrap_or(NIL),
    );
}

#[inline]
pub(crate) fn set_size(memory: &mut [u8], addr: usize, size: usize) {
    raw::store_usize(memory, addr + SIZE_OFFSET, size);
}
