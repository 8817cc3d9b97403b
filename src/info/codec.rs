//! Chat text compression seam
//!
//! The legacy client decompresses chat with a Huffman table shipped in its
//! cache. The table is a collaborator, so chat encoding goes through
//! [`TextCodec`] and the crate only ships a Latin-1 passthrough.

use std::fmt;

use crate::game::constants::text;
use crate::net::bytes::latin1_bytes;

use super::EncodeError;

/// Compresses chat text for the wire
pub trait TextCodec: fmt::Debug + Send + Sync {
    /// Append the compressed form of `text` to `out`
    fn compress(&self, text: &str, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// Inverse of [`TextCodec::compress`]
    fn decompress(&self, data: &[u8]) -> Option<String>;
}

/// Stores text as raw Latin-1 bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct Latin1Codec;

impl TextCodec for Latin1Codec {
    fn compress(&self, text: &str, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let len = text.chars().count();
        if len > text::MAX_COMPRESSED_BYTES {
            return Err(EncodeError::TooLong {
                field: "chat text",
                len,
                max: text::MAX_COMPRESSED_BYTES,
            });
        }
        out.extend(latin1_bytes(text));
        Ok(())
    }

    fn decompress(&self, data: &[u8]) -> Option<String> {
        Some(data.iter().map(|&b| b as char).collect())
    }
}
