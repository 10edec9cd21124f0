//! Utility functions.

/// Aligns an offset or size up to the next multiple of `align`.
/// `align` must be a power of two.
pub fn align_up(offset: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Aligns an offset up to the next multiple of four, the alignment of every
/// word-sized dex record.
pub fn four_byte_align(offset: u32) -> u32 {
    align_up(offset, 4)
}
