//! Bit-level packing for the position section of an observer buffer
//!
//! Values are written most-significant bit first, matching the legacy
//! client's bit reader. The writer keeps its allocation between ticks; call
//! [`BitWriter::clear`] to reuse it.

use bitvec::prelude::*;

/// Append-only MSB-first bit buffer
#[derive(Debug, Default)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bits: BitVec::with_capacity(bytes * 8),
        }
    }

    /// Write the low `width` bits of `value`
    #[inline]
    pub fn write(&mut self, width: u32, value: u32) {
        debug_assert!(width <= 32, "bit width {} out of range", width);
        debug_assert!(
            width == 32 || value >> width == 0,
            "value {} does not fit in {} bits",
            value,
            width
        );
        if width == 0 {
            return;
        }
        let view = value.view_bits::<Msb0>();
        self.bits.extend_from_bitslice(&view[(32 - width) as usize..]);
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.bits.push(value);
    }

    /// Write a two's-complement signed value in `width` bits
    #[inline]
    pub fn write_signed(&mut self, width: u32, value: i32) {
        let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        self.write(width, (value as u32) & mask);
    }

    /// Number of bits written
    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Number of bytes the written bits occupy once padded
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.bits.len().div_ceil(8)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Zero-pad to a byte boundary and append the bytes to `out`.
    ///
    /// The writer must be cleared before it is written to again.
    pub fn finish_into(&mut self, out: &mut Vec<u8>) {
        let padded = self.byte_len() * 8;
        self.bits.resize(padded, false);
        out.extend_from_slice(self.bits.as_raw_slice());
    }
}

/// MSB-first bit reader over a byte slice
pub struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            bits: data.view_bits::<Msb0>(),
            position: 0,
        }
    }

    /// Read `width` bits as an unsigned value
    pub fn read(&mut self, width: u32) -> Option<u32> {
        let width = width as usize;
        if width > 32 || self.position + width > self.bits.len() {
            return None;
        }
        let value = self.bits[self.position..self.position + width]
            .iter()
            .by_vals()
            .fold(0u32, |acc, bit| (acc << 1) | bit as u32);
        self.position += width;
        Some(value)
    }

    pub fn read_bool(&mut self) -> Option<bool> {
        self.read(1).map(|b| b == 1)
    }

    /// Read a two's-complement signed value of `width` bits
    pub fn read_signed(&mut self, width: u32) -> Option<i32> {
        let raw = self.read(width)?;
        if width == 0 || width == 32 {
            return Some(raw as i32);
        }
        let shift = 32 - width;
        Some(((raw << shift) as i32) >> shift)
    }

    /// Current position in bits
    pub fn bit_position(&self) -> usize {
        self.position
    }

    /// Byte offset of the first byte after the bits read so far
    pub fn byte_position(&self) -> usize {
        self.position.div_ceil(8)
    }
}
