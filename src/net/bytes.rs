//! Byte-level helpers for the extended-info section
//!
//! Multi-byte integers are big-endian. Strings are Latin-1 and terminated by
//! a zero byte; characters outside Latin-1 become `?`.

/// Append primitives to a byte buffer
pub trait ByteWriter {
    fn write_u8(&mut self, value: u8);
    fn write_u16(&mut self, value: u16);
    fn write_u32(&mut self, value: u32);
    fn write_bytes(&mut self, data: &[u8]);

    fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Zero-terminated Latin-1 string
    fn write_str(&mut self, text: &str) {
        for byte in latin1_bytes(text) {
            self.write_u8(byte);
        }
        self.write_u8(0);
    }
}

impl ByteWriter for Vec<u8> {
    #[inline]
    fn write_u8(&mut self, value: u8) {
        self.push(value);
    }

    #[inline]
    fn write_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    #[inline]
    fn write_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    #[inline]
    fn write_bytes(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

/// Latin-1 bytes of `text`, `?` for unrepresentable characters
pub fn latin1_bytes(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.chars().map(|c| {
        let code = c as u32;
        if code == 0 || code > 0xFF {
            b'?'
        } else {
            code as u8
        }
    })
}

/// Number of bytes `text` occupies once written with [`ByteWriter::write_str`]
pub fn encoded_str_len(text: &str) -> usize {
    text.chars().count() + 1
}

/// Cursor over a byte slice
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read n bytes
    pub fn read(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.position + n > self.data.len() {
            return None;
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read(1).map(|b| b[0])
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_u8().map(|b| b as i8)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a zero-terminated Latin-1 string
    pub fn read_str(&mut self) -> Option<String> {
        let rest = &self.data[self.position..];
        let end = rest.iter().position(|&b| b == 0)?;
        let text = rest[..end].iter().map(|&b| b as char).collect();
        self.position += end + 1;
        Some(text)
    }

    /// Get remaining bytes
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }
}
