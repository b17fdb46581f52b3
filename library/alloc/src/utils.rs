/// Rounds `size` up to the nearest multiple of `align`
///
/// `align` must be a power of two.
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

/// Rounds `size` down to the nearest multiple of `align`
#[inline]
pub const fn align_down(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    size & !(align - 1)
}

/// Returns true if `addr` is a multiple of `align`
#[inline(always)]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}
