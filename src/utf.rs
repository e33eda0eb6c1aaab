//! Codec for the `@UTF` tabular serialization that CriWare packages use as
//! their metadata substrate: typed columns over a row block, with string and
//! byte-array cells stored in side pools.

mod table;
mod value;

pub use table::{mask, Column, Table};
pub use value::{Value, ValueKind};

use crate::stream::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UtfError {
    #[error("bad @UTF magic {0:#010x}")]
    BadMagic(u32),
    #[error("unknown column type tag {0:#x}")]
    UnknownTag(u8),
    #[error("column '{column}' holds {expected:?} cells, got {found:?}")]
    TypeMismatch {
        column: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("column '{column}' has no cell for row {row}")]
    MissingRow { column: String, row: usize },
    #[error("column '{0}' was never given a type")]
    UntypedColumn(String),
    #[error("pool string is not valid UTF-8")]
    BadString(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Stream(#[from] StreamError),
}
