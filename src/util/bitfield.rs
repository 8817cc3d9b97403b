//! Fixed-width bit fields packed into a `u32`
//!
//! Every packed value in the crate (grid coordinates, movement flags) is
//! described by a table of `BitField` constants instead of inline shift and
//! mask arithmetic. Each field knows its offset and width, so packing and
//! unpacking are a single call and can be tested field by field.

/// A field of `width` bits starting at bit `offset` (bit 0 = least significant)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub offset: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(offset: u32, width: u32) -> Self {
        assert!(width > 0 && offset + width <= 32);
        Self { offset, width }
    }

    /// Mask of the field's value, not shifted into position
    #[inline(always)]
    pub const fn mask(self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Largest value the field can hold
    #[inline(always)]
    pub const fn max_value(self) -> u32 {
        self.mask()
    }

    /// Whether `value` fits without truncation
    #[inline(always)]
    pub const fn fits(self, value: u32) -> bool {
        value <= self.mask()
    }

    /// Extract the field from a packed word
    #[inline(always)]
    pub const fn get(self, packed: u32) -> u32 {
        (packed >> self.offset) & self.mask()
    }

    /// Return `packed` with the field replaced by `value` (truncated to width)
    #[inline(always)]
    pub const fn set(self, packed: u32, value: u32) -> u32 {
        let shifted_mask = self.mask() << self.offset;
        (packed & !shifted_mask) | ((value & self.mask()) << self.offset)
    }
}
