//! Field accessors for the fixed-width integers stored in a pool.
//!
//! Every header and payload field is stored in native byte order at a byte
//! offset into the pool memory. Out-of-bounds accesses panic, since they can
//! only result from a corrupted header or a bad address.
use byteorder::{ByteOrder, NativeEndian};

#[inline]
pub fn load_u32(memory: &[u8], addr: usize) -> u32 {
    NativeEndian::read_u32(&memory[addr..addr + 4])
}

#[inline]
pub fn store_u32(memory: &mut [u8], addr: usize, value: u32) {
    NativeEndian::write_u32(&mut memory[addr..addr + 4], value)
}

#[inline]
pub fn load_i32(memory: &[u8], addr: usize) -> i32 {
    NativeEndian::read_i32(&memory[addr..addr + 4])
}

#[inline]
pub fn store_i32(memory: &mut [u8], addr: usize, value: i32) {
    NativeEndian::write_i32(&mut memory[addr..addr + 4], value)
}

#[inline]
pub fn load_u64(memory: &[u8], addr: usize) -> u64 {
    NativeEndian::read_u64(&memory[addr..addr + 8])
}

#[inline]
pub fn store_u64(memory: &mut [u8], addr: usize, value: u64) {
    NativeEndian::write_u64(&mut memory[addr..addr + 8], value)
}

#[inline]
pub fn load_i64(memory: &[u8], addr: usize) -> i64 {
    NativeEndian::read_i64(&memory[addr..addr + 8])
}

#[inline]
pub fn store_i64(memory: &mut [u8], addr: usize, value: i64) {
    NativeEndian::write_i64(&mut memory[addr..addr + 8], value)
}

#[inline]
pub fn load_usize(memory: &[u8], addr: usize) -> usize {
    load_u64(memory, addr) as usize
}

#[inline]
pub fn store_usize(memory: &mut [u8], addr: usize, value: usize) {
    store_u64(memory, addr, value as u64)
}
