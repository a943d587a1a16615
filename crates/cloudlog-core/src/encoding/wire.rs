//! Little-endian primitives shared by the record codecs
//!
//! Strings and byte arrays carry a `u32` length prefix.

use byteorder::{ByteOrder, LittleEndian};

use super::DecodeError;

pub(crate) fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16) {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    let mut bytes = [0u8; 4];
    LittleEndian::write_u32(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, value: u64) {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u64(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub(crate) fn put_f64(buf: &mut Vec<u8>, value: f64) {
    let mut bytes = [0u8; 8];
    LittleEndian::write_f64(&mut bytes, value);
    buf.extend_from_slice(&bytes);
}

pub(crate) fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

pub(crate) fn put_str(buf: &mut Vec<u8>, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Reserve a `u32` length slot and return its position
pub(crate) fn begin_len32(buf: &mut Vec<u8>) -> usize {
    let pos = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    pos
}

/// Patch a slot from [`begin_len32`] with the number of bytes written since
pub(crate) fn end_len32(buf: &mut [u8], pos: usize) {
    let len = (buf.len() - pos - 4) as u32;
    LittleEndian::write_u32(&mut buf[pos..pos + 4], len);
}

/// Reserve a `u64` length slot and return its position
pub(crate) fn begin_len64(buf: &mut Vec<u8>) -> usize {
    let pos = buf.len();
    buf.extend_from_slice(&[0u8; 8]);
    pos
}

/// Patch a slot from [`begin_len64`] with the number of bytes written since
pub(crate) fn end_len64(buf: &mut [u8], pos: usize) {
    let len = (buf.len() - pos - 8) as u64;
    LittleEndian::write_u64(&mut buf[pos..pos + 8], len);
}

/// Bounds-checked reader over a borrowed byte slice
#[derive(Debug, Clone)]
pub(crate) struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub(crate) fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    pub(crate) fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub(crate) fn string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Everything not consumed yet
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    pub(crate) fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefixed_string() {
        let mut buf = Vec::new();
        put_str(&mut buf, "pointcloud");
        put_u16(&mut buf, 7);

        assert_eq!(&buf[0..4], &[10, 0, 0, 0]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.string().unwrap(), "pointcloud");
        assert_eq!(reader.u16().unwrap(), 7);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_truncated_read() {
        let buf = [1u8, 2, 3];
        let mut reader = WireReader::new(&buf);
        assert_eq!(
            reader.u32(),
            Err(DecodeError::UnexpectedEof {
                needed: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_len32_patch() {
        let mut buf = Vec::new();
        let slot = begin_len32(&mut buf);
        put_u64(&mut buf, 1);
        put_u64(&mut buf, 2);
        end_len32(&mut buf, slot);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.u32().unwrap(), 16);
    }
}
