//! Packed grid coordinates
//!
//! A coordinate is a level (0-3) plus x/z tile positions (0-16383), packed
//! into one `u32`:
//!
//! | bits  | field |
//! |-------|-------|
//! | 28-29 | level |
//! | 14-27 | x     |
//! | 0-13  | z     |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::bitfield::BitField;

pub const LEVEL: BitField = BitField::new(28, 2);
pub const X: BitField = BitField::new(14, 14);
pub const Z: BitField = BitField::new(0, 14);

/// Side length of a zone in tiles (zones bucket avatars for range queries)
pub const ZONE_SIZE: u32 = 8;

/// Grid coordinate: level + x + z
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CoordGrid(u32);

impl CoordGrid {
    pub const ZERO: CoordGrid = CoordGrid(0);

    /// Build a coordinate. Components outside their field width are truncated.
    pub const fn new(level: u32, x: u32, z: u32) -> Self {
        let packed = LEVEL.set(0, level);
        let packed = X.set(packed, x);
        Self(Z.set(packed, z))
    }

    pub const fn from_packed(packed: u32) -> Self {
        Self(packed & (LEVEL.mask() << LEVEL.offset | X.mask() << X.offset | Z.mask()))
    }

    #[inline]
    pub const fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn level(self) -> u32 {
        LEVEL.get(self.0)
    }

    #[inline]
    pub const fn x(self) -> u32 {
        X.get(self.0)
    }

    #[inline]
    pub const fn z(self) -> u32 {
        Z.get(self.0)
    }

    /// Offset by tile deltas, wrapping inside the field widths
    pub fn translate(self, dlevel: i32, dx: i32, dz: i32) -> Self {
        Self::new(
            (self.level() as i32 + dlevel) as u32,
            (self.x() as i32 + dx) as u32,
            (self.z() as i32 + dz) as u32,
        )
    }

    /// Signed x/z deltas from `self` to `other`
    #[inline]
    pub fn delta_to(self, other: CoordGrid) -> (i32, i32) {
        (
            other.x() as i32 - self.x() as i32,
            other.z() as i32 - self.z() as i32,
        )
    }

    /// Chebyshev distance in tiles, ignoring level
    #[inline]
    pub fn chebyshev_distance(self, other: CoordGrid) -> u32 {
        let (dx, dz) = self.delta_to(other);
        dx.unsigned_abs().max(dz.unsigned_abs())
    }

    /// Same level and within `radius` tiles on both axes
    #[inline]
    pub fn in_range(self, other: CoordGrid, radius: u32) -> bool {
        self.level() == other.level() && self.chebyshev_distance(other) <= radius
    }

    /// Zone this coordinate falls into
    #[inline]
    pub fn zone(self) -> ZoneKey {
        ZoneKey {
            level: self.level() as u8,
            zone_x: (self.x() / ZONE_SIZE) as u16,
            zone_z: (self.z() / ZONE_SIZE) as u16,
        }
    }
}

impl fmt::Display for CoordGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.level(), self.x(), self.z())
    }
}

/// Zone bucket key used by spatial range queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneKey {
    pub level: u8,
    pub zone_x: u16,
    pub zone_z: u16,
}
