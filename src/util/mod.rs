pub mod bitfield;
pub mod coord;
