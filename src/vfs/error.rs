use crate::crilayla::LaylaError;
use crate::utf::UtfError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid file signature '{0}'")]
    BadSignature(String),
    #[error("unsupported MPK archive version {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported CpkMode {0}")]
    UnsupportedCpkMode(u32),
    #[error("archive is missing the '{0}' column")]
    MissingColumn(&'static str),
    #[error("column '{column}' row {row} holds no usable value")]
    BadColumnValue { column: &'static str, row: usize },
    #[error("entry IDs must be contiguous from 0: expected {expected}, found {found}")]
    NonContiguousIds { expected: u64, found: u64 },
    #[error("no entries matched the given patterns")]
    NoMatches,
    #[error("entry with ID {0} not found in archive")]
    EntryNotFound(u64),
    #[error("cannot parse '{0}' as an unpacked entry name")]
    BadEntryName(String),
    #[error("entry name '{0}' does not fit in an entry record")]
    NameTooLong(String),
    #[error("file '{0}' is too large for a CPK entry")]
    FileTooLarge(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Utf(#[from] UtfError),
    #[error(transparent)]
    Layla(#[from] LaylaError),
    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Glob(#[from] globset::Error),
}
