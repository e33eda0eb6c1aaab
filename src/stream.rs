use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("read of {len} bytes at {pos:#x} is out of bounds for a {size:#x}-byte stream")]
    OutOfBounds { pos: usize, len: usize, size: usize },
    #[error("unterminated string at {pos:#x}")]
    Unterminated { pos: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Owning byte buffer with a cursor. Scalar reads and writes honor the
/// endianness the stream was constructed with; raw byte transfers never swap.
///
/// Reads past the end are errors. Writes, and seeks past the end, grow the
/// buffer with zeros.
#[derive(Debug, Clone)]
pub struct ByteStream {
    buf: Vec<u8>,
    pos: usize,
    endian: Endian,
}

macro_rules! scalar_io {
    ($read:ident, $write:ident, $ty:ty) => {
        pub fn $read(&mut self) -> Result<$ty, StreamError> {
            let endian = self.endian;
            let bytes = self.read_bytes(std::mem::size_of::<$ty>())?;
            Ok(match endian {
                Endian::Big => BigEndian::$read(bytes),
                Endian::Little => LittleEndian::$read(bytes),
            })
        }

        pub fn $write(&mut self, value: $ty) {
            let mut bytes = [0u8; std::mem::size_of::<$ty>()];
            match self.endian {
                Endian::Big => BigEndian::$write(&mut bytes, value),
                Endian::Little => LittleEndian::$write(&mut bytes, value),
            }
            self.write_bytes(&bytes);
        }
    };
}

impl ByteStream {
    #[must_use]
    pub const fn new(endian: Endian) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            endian,
        }
    }

    #[must_use]
    pub const fn from_vec(buf: Vec<u8>, endian: Endian) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
        }
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub const fn tell(&self) -> usize {
        self.pos
    }

    /// Moves the cursor. Positions past the end are allowed; the gap is
    /// zero-filled by the next write, while a read from there is an error.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], StreamError> {
        let bytes = Self::slice_at(&self.buf, self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_at(&self, pos: usize, len: usize) -> Result<&[u8], StreamError> {
        Self::slice_at(&self.buf, pos, len)
    }

    /// Bytes from `pos` up to (not including) the next NUL.
    pub fn read_cstr_at(&self, pos: usize) -> Result<&[u8], StreamError> {
        if pos > self.buf.len() {
            return Err(StreamError::OutOfBounds {
                pos,
                len: 1,
                size: self.buf.len(),
            });
        }
        let tail = &self.buf[pos..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(StreamError::Unterminated { pos })?;
        Ok(&tail[..end])
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        let end = self.pos + src.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(src);
        self.pos = end;
    }

    pub fn write_at(&mut self, pos: usize, src: &[u8]) {
        let end = pos + src.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[pos..end].copy_from_slice(src);
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn read_i8(&mut self) -> Result<i8, StreamError> {
        #[allow(clippy::cast_possible_wrap)]
        let value = self.read_u8()? as i8;
        Ok(value)
    }

    pub fn write_i8(&mut self, value: i8) {
        #[allow(clippy::cast_sign_loss)]
        let byte = value as u8;
        self.write_u8(byte);
    }

    scalar_io!(read_u16, write_u16, u16);
    scalar_io!(read_i16, write_i16, i16);
    scalar_io!(read_u32, write_u32, u32);
    scalar_io!(read_i32, write_i32, i32);
    scalar_io!(read_u64, write_u64, u64);
    scalar_io!(read_i64, write_i64, i64);
    scalar_io!(read_f32, write_f32, f32);
    scalar_io!(read_f64, write_f64, f64);

    fn slice_at(buf: &[u8], pos: usize, len: usize) -> Result<&[u8], StreamError> {
        if pos.checked_add(len).map_or(true, |end| end > buf.len()) {
            return Err(StreamError::OutOfBounds {
                pos,
                len,
                size: buf.len(),
            });
        }
        Ok(&buf[pos..pos + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_follow_the_stream_endianness() {
        let mut be = ByteStream::new(Endian::Big);
        be.write_u32(0x1234_5678);
        assert_eq!(be.as_slice(), &[0x12, 0x34, 0x56, 0x78]);

        let mut le = ByteStream::new(Endian::Little);
        le.write_u32(0x1234_5678);
        assert_eq!(le.as_slice(), &[0x78, 0x56, 0x34, 0x12]);

        le.seek(0);
        assert_eq!(le.read_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn seek_past_end_extends_with_zeros() {
        let mut s = ByteStream::new(Endian::Little);
        s.write_u8(0xFF);
        s.seek(4);
        s.write_u8(0xAA);
        assert_eq!(s.as_slice(), &[0xFF, 0, 0, 0, 0xAA]);
    }

    #[test]
    fn out_of_bounds_read_is_an_error() {
        let s = ByteStream::from_vec(vec![1, 2, 3], Endian::Little);
        assert!(matches!(
            s.read_at(2, 4),
            Err(StreamError::OutOfBounds { pos: 2, len: 4, size: 3 })
        ));
    }

    #[test]
    fn positional_write_does_not_move_the_cursor() {
        let mut s = ByteStream::from_vec(vec![0; 4], Endian::Little);
        s.seek(1);
        s.write_at(2, &[7, 7, 7]);
        assert_eq!(s.tell(), 1);
        assert_eq!(s.as_slice(), &[0, 0, 7, 7, 7]);
    }

    #[test]
    fn cstr_scan_stops_at_nul() {
        let s = ByteStream::from_vec(b"ab\0cd".to_vec(), Endian::Little);
        assert_eq!(s.read_cstr_at(0).unwrap(), b"ab");
        assert!(matches!(
            s.read_cstr_at(3),
            Err(StreamError::Unterminated { pos: 3 })
        ));
    }
}
