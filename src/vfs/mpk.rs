use crate::vfs::{align_up, Archive, ArchiveError};
use self::bytes::{MpkEntryV1, MpkEntryV2, MpkHeader};
use bytesize::ByteSize;
use flate2::read::ZlibDecoder;
use globset::GlobSetBuilder;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

mod bytes;

pub const MPK_SIGNATURE: &[u8; 4] = b"MPK\0";

const PAYLOAD_ALIGN: u64 = 2048;

#[derive(Debug)]
pub struct MpkEntry {
    id: u32,
    name: String,
    offset: u64,
    size: u64,
    size_decompressed: u64,
}

impl MpkEntry {
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn size_decompressed(&self) -> u64 {
        self.size_decompressed
    }

    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.size != self.size_decompressed
    }

    /// The on-disk name an unpacked entry gets: hex ID, underscore, stored
    /// name, e.g. `0x1e_phone_rine.dds`.
    #[must_use]
    pub fn unpacked_filename(&self) -> String {
        format!("0x{:x}_{}", self.id, self.name)
    }
}

impl TryFrom<MpkEntryV1> for MpkEntry {
    type Error = ArchiveError;

    fn try_from(record: MpkEntryV1) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            name: bytes::entry_name_from_bytes(&record.name)?,
            offset: u64::from(record.offset),
            size: u64::from(record.size),
            size_decompressed: u64::from(record.size_decompressed),
        })
    }
}

impl TryFrom<MpkEntryV2> for MpkEntry {
    type Error = ArchiveError;

    fn try_from(record: MpkEntryV2) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            name: bytes::entry_name_from_bytes(&record.name)?,
            offset: record.offset,
            size: record.size,
            size_decompressed: record.size_decompressed,
        })
    }
}

/// Splits `0x<hex>_<name>` back into an entry ID and stored name.
fn parse_unpacked_filename(file_name: &str) -> Result<(u32, String), ArchiveError> {
    let bad = || ArchiveError::BadEntryName(file_name.to_owned());
    let (id_part, name) = file_name.split_once('_').ok_or_else(bad)?;
    let digits = id_part
        .strip_prefix("0x")
        .or_else(|| id_part.strip_prefix("0X"))
        .unwrap_or(id_part);
    let id = u32::from_str_radix(digits, 16).map_err(|_| bad())?;
    Ok((id, name.to_owned()))
}

#[derive(Debug)]
pub struct MpkArchive {
    reader: RefCell<BufReader<File>>,
    file_path: PathBuf,
    entries: IndexMap<u32, MpkEntry>,
}

impl MpkArchive {
    pub fn entries(&self) -> impl Iterator<Item = &MpkEntry> {
        self.entries.values()
    }

    fn build(mut reader: BufReader<File>, path: &Path) -> Result<Self, ArchiveError> {
        reader.seek(SeekFrom::Start(0))?;
        let header: MpkHeader = bytes::decode_from(&mut reader)?;
        if &header.signature != MPK_SIGNATURE {
            return Err(ArchiveError::BadSignature(
                String::from_utf8_lossy(&header.signature).into_owned(),
            ));
        }
        if header.ver_major != 1 && header.ver_major != 2 {
            return Err(ArchiveError::UnsupportedVersion(header.ver_major));
        }
        let is_old_format = header.ver_major == 1;

        #[allow(clippy::cast_possible_truncation)]
        let mut entries = IndexMap::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let entry: MpkEntry = if is_old_format {
                bytes::decode_from::<MpkEntryV1, _>(&mut reader)?.try_into()?
            } else {
                bytes::decode_from::<MpkEntryV2, _>(&mut reader)?.try_into()?
            };

            // Some shipped archives overstate their entry count and pad the
            // table with all-zero records; no real entry lives at offset 0.
            if entry.offset == 0 {
                continue;
            }

            entries.insert(entry.id, entry);
        }

        Ok(Self {
            reader: RefCell::new(reader),
            file_path: path.to_path_buf(),
            entries,
        })
    }

    /// Entries matching the given IDs (decimal) or name globs.
    fn select_entries(&self, patterns: &[String]) -> Result<Vec<&MpkEntry>, ArchiveError> {
        let mut selected = Vec::new();
        let mut globs = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(id) = pattern.parse::<u32>() {
                selected.push(
                    self.entries
                        .get(&id)
                        .ok_or(ArchiveError::EntryNotFound(u64::from(id)))?,
                );
            } else {
                globs.add(pattern.parse()?);
            }
        }

        let globs = globs.build()?;
        if !globs.is_empty() {
            for entry in self.entries.values() {
                if globs.is_match(entry.name()) && !selected.iter().any(|e| e.id == entry.id) {
                    selected.push(entry);
                }
            }
        }

        if selected.is_empty() {
            return Err(ArchiveError::NoMatches);
        }
        Ok(selected)
    }

    fn extract_entry<W: Write>(&self, entry: &MpkEntry, writer: &mut W) -> Result<(), ArchiveError> {
        let mut reader = self.reader.borrow_mut();
        reader.seek(SeekFrom::Start(entry.offset))?;
        let mut limited = reader.by_ref().take(entry.size);
        if entry.is_compressed() {
            io::copy(&mut ZlibDecoder::new(limited), writer)?;
        } else {
            io::copy(&mut limited, writer)?;
        }
        Ok(())
    }
}

impl Archive for MpkArchive {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let reader = BufReader::new(File::open(&path)?);
        Self::build(reader, path.as_ref())
    }

    #[allow(clippy::print_literal)] // readability >>>
    fn list_entries(&self) {
        println!("{:<6} {:<24} {:<12} {}", "ID", "Name", "Size", "Offset");
        println!("================================================");
        for entry in self.entries.values() {
            println!(
                "{:<6} {:<24} {:<12} {:#x}",
                entry.id(),
                entry.name(),
                format!(
                    "{}{}",
                    ByteSize::b(entry.size_decompressed()),
                    if entry.is_compressed() { "*" } else { "" }
                ),
                entry.offset()
            );
        }
    }

    fn extract_entries(
        &self,
        patterns: &[String],
        outdir: Option<&Path>,
    ) -> Result<(), ArchiveError> {
        let entries = if patterns.is_empty() {
            self.entries.values().collect()
        } else {
            self.select_entries(patterns)?
        };

        let outdir =
            outdir.map_or_else(|| crate::default_extract_dir(&self.file_path), Path::to_path_buf);
        fs::create_dir_all(&outdir)?;

        for entry in entries {
            println!(
                "magpak: extracting{} file '{}'",
                if entry.is_compressed() { " compressed" } else { "" },
                entry.unpacked_filename()
            );
            let file = File::create(outdir.join(entry.unpacked_filename()))?;
            let mut writer = BufWriter::new(file);
            self.extract_entry(entry, &mut writer)?;
            writer.flush()?;
        }

        Ok(())
    }

    fn pack_dir<P: AsRef<Path>, Q: AsRef<Path>>(indir: P, archive: Q) -> Result<(), ArchiveError> {
        let mut sources = Vec::new();
        for dir_entry in fs::read_dir(indir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let file_name = file_name
                .to_str()
                .ok_or_else(|| ArchiveError::BadEntryName(file_name.to_string_lossy().into_owned()))?;
            let (id, name) = parse_unpacked_filename(file_name)?;
            let size = dir_entry.metadata()?.len();
            sources.push((id, name, dir_entry.path(), size));
        }
        sources.sort_by_key(|(id, ..)| *id);

        // entry IDs have to be exactly 0..N-1, or the table has holes
        for (index, (id, ..)) in sources.iter().enumerate() {
            if u64::from(*id) != index as u64 {
                return Err(ArchiveError::NonContiguousIds {
                    expected: index as u64,
                    found: u64::from(*id),
                });
            }
        }

        let archive = archive.as_ref();
        let out_dir = match archive.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent)?;
                parent
            }
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(out_dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            bytes::encode_into(&MpkHeader::v2(sources.len() as u64), &mut writer)?;

            let table_end = bytes::HEADER_LEN + sources.len() as u64 * bytes::ENTRY_RECORD_LEN;
            writer.seek(SeekFrom::Start(align_up(table_end, PAYLOAD_ALIGN)))?;

            let mut records = Vec::with_capacity(sources.len());
            for (id, name, path, size) in &sources {
                println!("magpak: packing file '{name}'");
                let offset = writer.stream_position()?;
                io::copy(&mut File::open(path)?, &mut writer)?;
                records.push(MpkEntryV2 {
                    compression: 0,
                    id: *id,
                    offset,
                    size: *size,
                    size_decompressed: *size,
                    name: bytes::entry_name_to_bytes(name)?,
                });
                let pos = writer.stream_position()?;
                writer.seek(SeekFrom::Start(align_up(pos, PAYLOAD_ALIGN)))?;
            }

            writer.seek(SeekFrom::Start(bytes::HEADER_LEN))?;
            for record in &records {
                bytes::encode_into(record, &mut writer)?;
            }
            writer.flush()?;
        }
        tmp.persist(archive).map_err(|e| ArchiveError::Io(e.error))?;

        Ok(())
    }
}
