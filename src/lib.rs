#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::path::{Path, PathBuf};

pub mod crilayla;
pub mod stream;
pub mod utf;
pub mod vfs;

/// Where an archive's entries land when no output directory is given:
/// `chara.mpk` and `data0.cpk` extract into `chara/` and `data0/`. A name
/// with no extension to strip gets a `.d` suffix instead, so the directory
/// cannot collide with the archive it came from.
#[must_use]
pub fn default_extract_dir<P: AsRef<Path>>(archive: P) -> PathBuf {
    let archive = archive.as_ref();
    match (archive.file_stem(), archive.extension()) {
        (Some(stem), Some(_)) => PathBuf::from(stem),
        _ => {
            let mut dir = archive.file_name().unwrap_or_default().to_os_string();
            dir.push(".d");
            PathBuf::from(dir)
        }
    }
}
