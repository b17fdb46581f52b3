//! A best-fit block allocator over a contiguous byte region.
//!
//! Every block, free or allocated, begins with a [`HEADER_SIZE`]-byte header
//! (see [`Block`]). Free blocks are threaded onto a singly-linked free list
//! through their link word. Freed blocks are pushed onto the head of that list
//! and are never merged with their neighbours, so a region fragments over time
//! until its owner re-initializes it.
pub mod raw;
mod block;

use core::cmp;
use core::ops::Range;

use log::trace;

pub use self::block::*;

use crate::{align_down, align_up, is_aligned, MemoryError, MIN_ALIGN};

/// Hands out blocks from a region of an owned buffer.
///
/// The buffer itself can be larger than the active region. Calling
/// [`BlockAllocator::init`] retargets the allocator at another part of the
/// buffer without disturbing the bytes outside of the new region, which is
/// what lets a copying collector evacuate from one half of the buffer into
/// the other.
pub struct BlockAllocator {
    memory: Box<[u8]>,
    region: Range<usize>,
    free_list: Option<usize>,
    poison: bool,
}
impl BlockAllocator {
    /// Creates an allocator owning `memory`.
    ///
    /// No region is active yet, so every allocation fails until [`init`](Self::init)
    /// has been called. When `poison` is set, the payload of every freed block
    /// is overwritten with [`FREE_PATTERN`].
    pub fn new(memory: Box<[u8]>, poison: bool) -> Self {
        Self {
            memory,
            region: 0..0,
            free_list: None,
            poison,
        }
    }

    /// Creates an allocator over a zeroed buffer of `size` bytes, with the whole buffer active
    pub fn with_capacity(size: usize, poison: bool) -> Self {
        let memory = vec![0u8; size].into_boxed_slice();
        let mut this = Self::new(memory, poison);
        this.init(0..align_down(size, MIN_ALIGN));
        this
    }

    /// Makes `region` the active region, turning it into a single free block.
    ///
    /// Anything previously allocated in the old region is forgotten, but its
    /// bytes are left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `region` is not aligned, does not fit in the buffer, or cannot
    /// hold a single block header.
    pub fn init(&mut self, region: Range<usize>) {
        assert!(region.start <= region.end && region.end <= self.memory.len());
        assert!(is_aligned(region.start, MIN_ALIGN));
        let size = align_down(region.end - region.start, MIN_ALIGN);
        assert!(
            size >= HEADER_SIZE,
            "a region of {} bytes cannot hold a block",
            size
        );

        let region = region.start..(region.start + size);
        block::write_free_header(&mut self.memory, region.start, size, None);
        self.free_list = Some(region.start);
        trace!(target: "alloc", "initialized region {:#x}..{:#x}", region.start, region.end);
        self.region = region;
    }

    /// Allocates a block large enough to hold `size` bytes, header included.
    ///
    /// The request is rounded up to [`MIN_ALIGN`] and to at least one header.
    /// The smallest free block that fits is chosen, the first one in list order
    /// winning ties. If that block is large enough that the leftover could hold
    /// more than a bare header, it is split and the leftover stays on the free
    /// list in its place; otherwise the whole block is handed out and its size
    /// field keeps reporting its full footprint.
    ///
    /// The returned block still carries [`FREE_TAG`]; the caller is expected to
    /// overwrite the tag and link words.
    pub fn alloc(&mut self, size: usize) -> Result<usize, MemoryError> {
        let size = cmp::max(align_up(size, MIN_ALIGN), HEADER_SIZE);

        // (predecessor, address, size) of the best candidate so far
        let mut best: Option<(Option<usize>, usize, usize)> = None;
        let mut prev = None;
        let mut cursor = self.free_list;
        while let Some(addr) = cursor {
            let block = self.block(addr);
            debug_assert!(block.is_free(), "free list corrupted at {:#x}", addr);
            let free_size = block.size();
            if free_size >= size && best.map_or(true, |(_, _, smallest)| free_size < smallest) {
                best = Some((prev, addr, free_size));
            }
            prev = Some(addr);
            cursor = block.next_free();
        }

        let (prev, addr, free_size) = match best {
            Some(found) => found,
            None => {
                let used = self.used();
                trace!(target: "alloc", "no free block can hold {} bytes ({} in use)", size, used);
                return Err(MemoryError {
                    requested: size,
                    used,
                });
            }
        };

        let next = self.block(addr).next_free();
        let remaining = free_size - size;
        let replacement = if remaining > HEADER_SIZE {
            let split = addr + size;
            block::write_free_header(&mut self.memory, split, remaining, next);
            block::set_size(&mut self.memory, addr, size);
            Some(split)
        } else {
            next
        };
        match prev {
            None => self.free_list = replacement,
            Some(prev) => block::set_next_free(&mut self.memory, prev, replacement),
        }

        trace!(target: "alloc", "allocated {} bytes at {:#x}", self.block(addr).size(), addr);
        Ok(addr)
    }

    /// Returns the block at `addr` to the head of the free list.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is outside of the active region.
    pub fn free(&mut self, addr: usize) {
        assert!(
            self.contains(addr),
            "attempted to free {:#x}, which is outside of the active region",
            addr
        );
        let size = self.block(addr).size();
        debug_assert!(!self.block(addr).is_free(), "double free of block at {:#x}", addr);

        block::write_free_header(&mut self.memory, addr, size, self.free_list);
        self.free_list = Some(addr);
        self.write_pattern(addr);
        trace!(target: "alloc", "freed {} bytes at {:#x}", size, addr);
    }

    /// Fills the payload of the block at `addr` with [`FREE_PATTERN`] if poisoning is enabled
    pub fn write_pattern(&mut self, addr: usize) {
        if !self.poison {
            return;
        }
        let end = self.block(addr).end();
        self.memory[(addr + HEADER_SIZE)..end].fill(FREE_PATTERN);
    }

    /// The number of bytes in the active region not sitting on the free list
    pub fn used(&self) -> usize {
        let free: usize = self.free_blocks().map(|block| block.size()).sum();
        self.region.len() - free
    }

    /// Returns true if `addr` lies in the active region
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.region.contains(&addr)
    }

    #[inline]
    pub fn region(&self) -> Range<usize> {
        self.region.clone()
    }

    #[inline]
    pub fn poison(&self) -> bool {
        self.poison
    }

    /// The whole underlying buffer, including bytes outside of the active region
    #[inline]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    #[inline]
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Gets a view of the header of the block at `addr`
    #[inline]
    pub fn block(&self, addr: usize) -> Block<'_> {
        Block::new(&self.memory, addr)
    }

    /// Iterates over every block of the active region in address order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            memory: &self.memory,
            cursor: self.region.start,
            end: self.region.end,
        }
    }

    /// Iterates over the free list, most recently freed block first
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            memory: &self.memory,
            cursor: self.free_list,
        }
    }
}

/// An address-ordered walk over the blocks of a region, see [`BlockAllocator::blocks`]
pub struct Blocks<'a> {
    memory: &'a [u8],
    cursor: usize,
    end: usize,
}
impl<'a> Iterator for Blocks<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let block = Block::new(self.memory, self.cursor);
        // A zero size can only come from a corrupted header; stop rather than spin
        let size = block.size();
        if size == 0 {
            self.cursor = self.end;
        } else {
            self.cursor += size;
        }
        Some(block)
    }
}

/// A walk over the free list, see [`BlockAllocator::free_blocks`]
pub struct FreeBlocks<'a> {
    memory: &'a [u8],
    cursor: Option<usize>,
}
impl<'a> Iterator for FreeBlocks<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = Block::new(self.memory, self.cursor?);
        self.cursor = block.next_free();
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Marks a block as allocated the way an owner would
    fn claim(allocator: &mut BlockAllocator, addr: usize) {
        raw::store_u32(allocator.memory_mut(), addr + TAG_OFFSET, 2);
    }

    fn alloc(allocator: &mut BlockAllocator, size: usize) -> usize {
        let addr = allocator.alloc(size).unwrap();
        claim(allocator, addr);
        addr
    }

    fn free_sizes(allocator: &BlockAllocator) -> Vec<usize> {
        allocator.free_blocks().map(|b| b.size()).collect()
    }

    #[test]
    fn init_creates_a_single_free_block() {
        let allocator = BlockAllocator::with_capacity(1024, false);
        assert_eq!(allocator.used(), 0);
        assert_eq!(free_sizes(&allocator), vec![1024]);
        assert_eq!(allocator.region(), 0..1024);
    }

    #[test]
    fn a_new_allocator_has_nothing_to_give() {
        let mut allocator = BlockAllocator::new(vec![0; 64].into_boxed_slice(), false);
        assert_eq!(
            allocator.alloc(24),
            Err(MemoryError {
                requested: 24,
                used: 0
            })
        );
    }

    #[test]
    fn requests_are_rounded_and_split() {
        let mut allocator = BlockAllocator::with_capacity(1024, false);
        let a = alloc(&mut allocator, 25);
        assert_eq!(a, 0);
        assert_eq!(allocator.block(a).size(), 32);

        let b = alloc(&mut allocator, 1);
        assert_eq!(b, 32);
        assert_eq!(allocator.block(b).size(), HEADER_SIZE);

        assert_eq!(allocator.used(), 56);
        assert_eq!(free_sizes(&allocator), vec![1024 - 56]);
    }

    #[test]
    fn best_fit_prefers_the_smallest_block_that_fits() {
        let mut allocator = BlockAllocator::with_capacity(512, false);
        let big = alloc(&mut allocator, 128);
        let _guard1 = alloc(&mut allocator, 24);
        let small = alloc(&mut allocator, 32);
        let _guard2 = alloc(&mut allocator, 24);
        let medium = alloc(&mut allocator, 64);
        let _guard3 = alloc(&mut allocator, 24);

        // Leave the tail of the region too small to compete
        let tail = allocator.free_blocks().next().unwrap().size();
        let _filler = alloc(&mut allocator, tail);
        assert!(allocator.free_blocks().next().is_none());

        allocator.free(medium);
        allocator.free(small);
        allocator.free(big);
        assert_eq!(free_sizes(&allocator), vec![128, 32, 64]);

        assert_eq!(allocator.alloc(32), Ok(small));
        claim(&mut allocator, small);
        assert_eq!(free_sizes(&allocator), vec![128, 64]);

        // 64 - 40 leaves exactly one header, which is not worth splitting off
        assert_eq!(allocator.alloc(40), Ok(medium));
        claim(&mut allocator, medium);
        assert_eq!(allocator.block(medium).size(), 64);
        assert_eq!(free_sizes(&allocator), vec![128]);
    }

    #[test]
    fn freed_blocks_are_never_merged() {
        let mut allocator = BlockAllocator::with_capacity(96, false);
        let a = alloc(&mut allocator, 32);
        let b = alloc(&mut allocator, 32);
        let c = alloc(&mut allocator, 32);
        assert_eq!(allocator.used(), 96);

        allocator.free(a);
        allocator.free(b);
        assert_eq!(allocator.used(), 32);
        assert_eq!(free_sizes(&allocator), vec![32, 32]);
        assert_eq!(
            allocator.alloc(48),
            Err(MemoryError {
                requested: 48,
                used: 32
            })
        );

        allocator.free(c);
        assert_eq!(allocator.used(), 0);
    }

    #[test]
    fn freeing_poisons_the_payload() {
        let mut allocator = BlockAllocator::with_capacity(128, true);
        let addr = alloc(&mut allocator, 40);
        allocator.memory_mut()[addr + HEADER_SIZE..addr + 40].fill(0x11);
        allocator.free(addr);

        let block = allocator.block(addr);
        assert!(block.is_free());
        assert!(block.payload().iter().all(|b| *b == FREE_PATTERN));
    }

    #[test]
    fn freeing_without_poison_leaves_the_payload() {
        let mut allocator = BlockAllocator::with_capacity(128, false);
        let addr = alloc(&mut allocator, 40);
        allocator.memory_mut()[addr + HEADER_SIZE..addr + 40].fill(0x11);
        allocator.free(addr);
        assert!(allocator.block(addr).payload().iter().all(|b| *b == 0x11));
    }

    #[test]
    fn reinit_retargets_the_allocator() {
        let mut allocator = BlockAllocator::with_capacity(256, false);
        allocator.init(0..128);
        let a = alloc(&mut allocator, 64);
        raw::store_u64(allocator.memory_mut(), a + HEADER_SIZE, 42);

        allocator.init(128..256);
        assert_eq!(allocator.used(), 0);
        assert!(!allocator.contains(a));
        let b = alloc(&mut allocator, 64);
        assert_eq!(b, 128);
        // Bytes from the previous region are left alone
        assert_eq!(raw::load_u64(allocator.memory(), a + HEADER_SIZE), 42);
    }

    #[test]
    fn blocks_walks_the_region_in_address_order() {
        let mut allocator = BlockAllocator::with_capacity(200, false);
        let a = alloc(&mut allocator, 24);
        let b = alloc(&mut allocator, 48);
        allocator.free(a);

        let walked = allocator
            .blocks()
            .map(|block| (block.addr(), block.size(), block.is_free()))
            .collect::<Vec<_>>();
        assert_eq!(
            walked,
            vec![(a, 24, true), (b, 48, false), (72, 200 - 72, true)]
        );
    }

    #[test]
    #[should_panic]
    fn freeing_outside_the_region_panics() {
        let mut allocator = BlockAllocator::with_capacity(256, false);
        allocator.init(0..128);
        allocator.free(128);
    }
}
