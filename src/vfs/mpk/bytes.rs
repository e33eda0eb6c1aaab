use crate::vfs::ArchiveError;
use bincode::config::{Configuration as BincodeConfig, Fixint, LittleEndian};
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use std::ffi::CStr;
use std::io::{Read, Write};

pub(super) const HEADER_LEN: u64 = 0x40;
pub(super) const ENTRY_RECORD_LEN: u64 = 0x100;

//   256 bytes per entry record
// -  32 bytes of fixed fields
// = 224 bytes for the NUL-terminated name
pub(super) const NAME_FIELD_LEN: usize = 0xE0;

#[derive(Debug, Decode, Encode)]
pub(super) struct MpkHeader {
    pub signature: [u8; 4],
    pub ver_minor: u16,
    pub ver_major: u16,
    pub entry_count: u64,
    pub padding: [u8; 0x30],
}

impl MpkHeader {
    pub fn v2(entry_count: u64) -> Self {
        Self {
            signature: *super::MPK_SIGNATURE,
            ver_minor: 0,
            ver_major: 2,
            entry_count,
            padding: [0; 0x30],
        }
    }
}

/// Version 1 record: 32-bit offsets and sizes, padded out to the same
/// 0x100-byte stride as version 2.
#[derive(Debug, Decode)]
pub(super) struct MpkEntryV1 {
    pub id: u32,
    pub offset: u32,
    pub size: u32,
    pub size_decompressed: u32,
    pub _padding: [u8; 16],
    pub name: [u8; NAME_FIELD_LEN],
}

#[derive(Debug, Decode, Encode)]
pub(super) struct MpkEntryV2 {
    pub compression: u32,
    pub id: u32,
    pub offset: u64,
    pub size: u64,
    pub size_decompressed: u64,
    pub name: [u8; NAME_FIELD_LEN],
}

type MpkConfig = BincodeConfig<LittleEndian, Fixint>;

const BINCODE_CONFIG: MpkConfig = bincode::config::standard()
    .with_little_endian()
    .with_fixed_int_encoding();

pub(super) fn decode_from<D: Decode<()>, R: Read>(reader: &mut R) -> Result<D, DecodeError> {
    bincode::decode_from_std_read::<D, MpkConfig, R>(reader, BINCODE_CONFIG)
}

pub(super) fn encode_into<E: Encode, W: Write>(value: &E, writer: &mut W) -> Result<usize, EncodeError> {
    bincode::encode_into_std_write(value, writer, BINCODE_CONFIG)
}

pub(super) fn entry_name_from_bytes(name: &[u8]) -> Result<String, ArchiveError> {
    let lossy = || ArchiveError::BadEntryName(String::from_utf8_lossy(name).into_owned());
    let cstr = CStr::from_bytes_until_nul(name).map_err(|_| lossy())?;
    cstr.to_str().map(Into::into).map_err(|_| lossy())
}

pub(super) fn entry_name_to_bytes(name: &str) -> Result<[u8; NAME_FIELD_LEN], ArchiveError> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_FIELD_LEN {
        return Err(ArchiveError::NameTooLong(name.to_owned()));
    }
    let mut field = [0u8; NAME_FIELD_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_have_their_on_disk_size() {
        let header = bincode::encode_to_vec(MpkHeader::v2(0), BINCODE_CONFIG).unwrap();
        assert_eq!(header.len() as u64, HEADER_LEN);

        let entry = MpkEntryV2 {
            compression: 0,
            id: 0,
            offset: 0,
            size: 0,
            size_decompressed: 0,
            name: [0; NAME_FIELD_LEN],
        };
        let encoded = bincode::encode_to_vec(entry, BINCODE_CONFIG).unwrap();
        assert_eq!(encoded.len() as u64, ENTRY_RECORD_LEN);
    }

    #[test]
    fn header_fields_are_little_endian() {
        let encoded = bincode::encode_to_vec(MpkHeader::v2(3), BINCODE_CONFIG).unwrap();
        assert_eq!(&encoded[..4], b"MPK\0");
        // version word reads as 0x0002_0000
        assert_eq!(u32::from_le_bytes(encoded[4..8].try_into().unwrap()), 0x0002_0000);
        assert_eq!(u64::from_le_bytes(encoded[8..16].try_into().unwrap()), 3);
    }

    #[test]
    fn names_round_trip_through_the_fixed_field() {
        let field = entry_name_to_bytes("phone_rine.dds").unwrap();
        assert_eq!(entry_name_from_bytes(&field).unwrap(), "phone_rine.dds");
        assert!(entry_name_to_bytes(&"x".repeat(NAME_FIELD_LEN)).is_err());
    }
}
