//! Wire layer: bit/byte buffers, packet assembly and the client-side decoder

pub mod assembler;
pub mod bits;
pub mod bytes;
pub mod decode;
