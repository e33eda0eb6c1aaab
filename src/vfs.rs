pub mod cpk;
mod error;
pub mod mpk;

pub use error::ArchiveError;

use std::fs::File;
use std::io::Read;
use std::path::Path;

pub trait Archive: Sized {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError>;

    fn list_entries(&self);

    /// Extracts the entries matching `patterns` (IDs or globs; everything
    /// when empty) into `outdir`, defaulting to a directory named after the
    /// archive.
    fn extract_entries(&self, patterns: &[String], outdir: Option<&Path>)
        -> Result<(), ArchiveError>;

    /// Builds a fresh archive at `archive` from the unpacked files in
    /// `indir`.
    fn pack_dir<P: AsRef<Path>, Q: AsRef<Path>>(indir: P, archive: Q) -> Result<(), ArchiveError>;
}

/// An archive of either supported format, picked by file signature.
#[derive(Debug)]
pub enum AnyArchive {
    Mpk(mpk::MpkArchive),
    Cpk(cpk::CpkArchive),
}

impl AnyArchive {
    /// Opens an archive by sniffing the four magic bytes at offset 0, the
    /// only place the two container formats can be told apart.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let mut magic = [0u8; 4];
        File::open(&path)?.read_exact(&mut magic)?;
        match &magic {
            mpk::MPK_SIGNATURE => Ok(Self::Mpk(mpk::MpkArchive::from_file(path)?)),
            b"CPK " => Ok(Self::Cpk(cpk::CpkArchive::from_file(path)?)),
            _ => Err(ArchiveError::BadSignature(
                String::from_utf8_lossy(&magic).into_owned(),
            )),
        }
    }

    pub fn list_entries(&self) {
        match self {
            Self::Mpk(archive) => archive.list_entries(),
            Self::Cpk(archive) => archive.list_entries(),
        }
    }

    pub fn extract_entries(
        &self,
        patterns: &[String],
        outdir: Option<&Path>,
    ) -> Result<(), ArchiveError> {
        match self {
            Self::Mpk(archive) => archive.extract_entries(patterns, outdir),
            Self::Cpk(archive) => archive.extract_entries(patterns, outdir),
        }
    }
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_the_next_block() {
        assert_eq!(align_up(0, 2048), 0);
        assert_eq!(align_up(1, 2048), 2048);
        assert_eq!(align_up(2048, 2048), 2048);
        assert_eq!(align_up(0x40 + 0x100, 2048), 0x800);
        assert_eq!(align_up(2049, 2048), 4096);
    }
}
