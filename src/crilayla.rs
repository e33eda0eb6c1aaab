use crate::stream::{ByteStream, Endian, StreamError};
use thiserror::Error;

/// "CRILAYLA" as a little-endian u64.
pub const CRILAYLA_MAGIC: u64 = 0x414C_5941_4C49_5243;

/// Length of the raw prefix block stored after the compressed stream and
/// emitted verbatim in front of the decompressed payload.
pub const PREFIX_HEADER_LEN: usize = 0x100;

const VLE_BIT_WIDTHS: [u32; 4] = [2, 3, 5, 8];
const MIN_COPY_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum LaylaError {
    #[error("bad CRILAYLA magic {0:#018x}")]
    BadMagic(u64),
    #[error("back reference at {offset:#x} points outside the {size:#x}-byte output")]
    BadReference { offset: usize, size: usize },
    #[error("compressed stream overruns the declared output size {0:#x}")]
    Overrun(usize),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Consumes bits MSB-first from a byte span. The compressed stream is stored
/// back to front, so callers reverse the span before handing it over; both
/// halves of that convention are required to line up with the on-disk format.
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit_pos: 0 }
    }

    /// Reads `nbits` bits (at most 16), first bit read landing in the most
    /// significant position. Runs dry silently: whatever bits remain are
    /// returned without further shifting.
    pub fn read(&mut self, nbits: u32) -> u16 {
        debug_assert!(nbits <= 16);
        let mut out = 0u16;
        let mut remaining = nbits;
        while self.bit_pos / 8 < self.bytes.len() && remaining > 0 {
            let bit = (self.bytes[self.bit_pos / 8] >> (7 - self.bit_pos % 8)) & 1;
            out = out << 1 | u16::from(bit);
            self.bit_pos += 1;
            remaining -= 1;
        }
        out
    }
}

/// Decodes a CRILAYLA blob into its 0x100-byte prefix header and the
/// decompressed payload, in the order they appear on disk when extracted.
///
/// The output is produced tail first: the write position, the back-reference
/// source, and the bit stream all walk from the end of their buffers toward
/// the start.
pub fn decompress(blob: Vec<u8>) -> Result<(Vec<u8>, Vec<u8>), LaylaError> {
    let mut stream = ByteStream::from_vec(blob, Endian::Little);

    let magic = stream.read_u64()?;
    if magic != CRILAYLA_MAGIC {
        return Err(LaylaError::BadMagic(magic));
    }
    let uncompressed_size = stream.read_u32()? as usize;
    let compressed_size = stream.read_u32()? as usize;

    let header = stream
        .read_at(compressed_size + 0x10, PREFIX_HEADER_LEN)?
        .to_vec();
    let mut compressed = stream.read_at(0x10, compressed_size)?.to_vec();
    compressed.reverse();
    let mut bits = BitReader::new(&compressed);

    let mut out = vec![0u8; uncompressed_size];
    let mut written = 0usize;
    while written < uncompressed_size {
        if bits.read(1) != 0 {
            let offset_raw = bits.read(13) as usize;
            let mut copy_len = MIN_COPY_LEN;
            let mut level = 0;
            loop {
                let width = VLE_BIT_WIDTHS[level];
                let group = bits.read(width);
                copy_len += group as usize;
                if group != (1 << width) - 1 {
                    break;
                }
                // the widest group repeats until it is not saturated
                if level < VLE_BIT_WIDTHS.len() - 1 {
                    level += 1;
                }
            }

            let mut src = uncompressed_size - 1 - written + offset_raw + MIN_COPY_LEN;
            for _ in 0..copy_len {
                if written == uncompressed_size {
                    return Err(LaylaError::Overrun(uncompressed_size));
                }
                // re-validated on every byte: the source index walks down
                // with the copy and a crafted stream can run it out of the
                // output either way
                if src >= uncompressed_size {
                    return Err(LaylaError::BadReference {
                        offset: src,
                        size: uncompressed_size,
                    });
                }
                out[uncompressed_size - 1 - written] = out[src];
                src = src.wrapping_sub(1);
                written += 1;
            }
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let byte = bits.read(8) as u8;
            out[uncompressed_size - 1 - written] = byte;
            written += 1;
        }
    }

    Ok((header, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Builds the on-disk frame for a hand-written bit stream: the bits are
    // packed MSB-first in decode order, then reversed into wire order.
    struct FrameBuilder {
        bits: Vec<bool>,
    }

    impl FrameBuilder {
        fn new() -> Self {
            Self { bits: Vec::new() }
        }

        fn push(&mut self, value: u16, nbits: u32) {
            for i in (0..nbits).rev() {
                self.bits.push(value >> i & 1 == 1);
            }
        }

        fn verbatim(&mut self, byte: u8) {
            self.push(0, 1);
            self.push(u16::from(byte), 8);
        }

        fn finish(self, uncompressed_size: u32, prefix: &[u8; PREFIX_HEADER_LEN]) -> Vec<u8> {
            let mut packed = vec![0u8; self.bits.len().div_ceil(8)];
            for (i, &bit) in self.bits.iter().enumerate() {
                if bit {
                    packed[i / 8] |= 1 << (7 - i % 8);
                }
            }
            packed.reverse();

            let mut frame = Vec::new();
            frame.extend_from_slice(&CRILAYLA_MAGIC.to_le_bytes());
            frame.extend_from_slice(&uncompressed_size.to_le_bytes());
            frame.extend_from_slice(&(packed.len() as u32).to_le_bytes());
            frame.extend_from_slice(&packed);
            frame.extend_from_slice(prefix);
            frame
        }
    }

    #[test]
    fn bit_reader_is_msb_first() {
        let mut bits = BitReader::new(&[0b1011_0001, 0b1000_0000]);
        assert_eq!(bits.read(1), 1);
        assert_eq!(bits.read(3), 0b011);
        assert_eq!(bits.read(5), 0b0001_1);
        // past the end: remaining bits only
        assert_eq!(bits.read(8), 0);
    }

    #[test]
    fn verbatim_bytes_decode_back_to_front() {
        let mut frame = FrameBuilder::new();
        for byte in [b'D', b'C', b'B', b'A'] {
            frame.verbatim(byte);
        }
        let prefix = [0x5A; PREFIX_HEADER_LEN];
        let (header, data) = decompress(frame.finish(4, &prefix)).unwrap();
        assert_eq!(header, prefix);
        assert_eq!(data, b"ABCD");
    }

    #[test]
    fn back_references_copy_from_the_written_tail() {
        // three literals then one overlapping copy of six bytes
        let mut frame = FrameBuilder::new();
        for byte in [b'Z', b'Y', b'X'] {
            frame.verbatim(byte);
        }
        frame.push(1, 1);
        frame.push(0, 13); // reference distance 3
        frame.push(0b11, 2); // saturated first group
        frame.push(0b000, 3); // copy length 3 + 3 + 0
        let prefix = [0; PREFIX_HEADER_LEN];
        let (_, data) = decompress(frame.finish(9, &prefix)).unwrap();
        assert_eq!(data, b"XYZXYZXYZ");
    }

    #[test]
    fn reference_outside_the_output_is_fatal() {
        let mut frame = FrameBuilder::new();
        frame.push(1, 1);
        frame.push(0x1FFF, 13);
        frame.push(0, 2);
        let prefix = [0; PREFIX_HEADER_LEN];
        assert!(matches!(
            decompress(frame.finish(4, &prefix)),
            Err(LaylaError::BadReference { .. })
        ));
    }

    #[test]
    fn copy_past_the_declared_output_is_fatal() {
        // the reference starts in range; its six-byte copy outlives the
        // three bytes of output that remain
        let mut frame = FrameBuilder::new();
        for byte in [b'Z', b'Y', b'X'] {
            frame.verbatim(byte);
        }
        frame.push(1, 1);
        frame.push(0, 13);
        frame.push(0b11, 2);
        frame.push(0b000, 3); // copy length 3 + 3 + 0
        let prefix = [0; PREFIX_HEADER_LEN];
        assert!(matches!(
            decompress(frame.finish(6, &prefix)),
            Err(LaylaError::Overrun(6))
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut blob = vec![0u8; 0x110];
        blob[0] = b'X';
        assert!(matches!(
            decompress(blob),
            Err(LaylaError::BadMagic(_))
        ));
    }
}
