use crate::crilayla;
use crate::utf::{self, Table, Value, ValueKind};
use crate::vfs::{align_up, Archive, ArchiveError};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use bytesize::ByteSize;
use globset::GlobSetBuilder;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// "CPK " and "ITOC" as little-endian u32 four-char codes.
pub const CPK_MAGIC: u32 = 0x204B_5043;
pub const ITOC_MAGIC: u32 = 0x434F_5449;

const ITOC_OFFSET: u64 = 0x800;
const CONTENT_ALIGN: u16 = 2048;

/// The reference tooling books the 16-byte container header into the ITOC
/// block's length field; kept for byte compatibility.
const ITOC_LENGTH_SLACK: u64 = 0x10;

#[derive(Debug)]
pub struct CpkEntry {
    id: u16,
    offset: u64,
    size: u64,
    size_decompressed: u64,
}

impl CpkEntry {
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
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
}

#[derive(Debug)]
pub struct CpkArchive {
    reader: RefCell<BufReader<File>>,
    file_path: PathBuf,
    entries: IndexMap<u16, CpkEntry>,
}

impl CpkArchive {
    pub fn entries(&self) -> impl Iterator<Item = &CpkEntry> {
        self.entries.values()
    }

    fn build(mut reader: BufReader<File>, path: &Path) -> Result<Self, ArchiveError> {
        reader.seek(SeekFrom::Start(0))?;
        let cpk = Table::parse(&read_table_payload(&mut reader, CPK_MAGIC)?)?;

        if let Some(mode) = optional_u32(&cpk, "CpkMode")? {
            if mode != 0 {
                return Err(ArchiveError::UnsupportedCpkMode(mode));
            }
        }
        let content_offset = require_u64(&cpk, "ContentOffset")?;
        let itoc_offset = require_u64(&cpk, "ItocOffset")?;
        let align = require_u16(&cpk, "Align")?;

        reader.seek(SeekFrom::Start(itoc_offset))?;
        let itoc = Table::parse(&read_table_payload(&mut reader, ITOC_MAGIC)?)?;

        let mut entries = Vec::new();
        for inner in ["DataL", "DataH"] {
            let Some(payload) = itoc.column(inner).and_then(|c| c.get(0)) else {
                continue;
            };
            let payload = payload.as_bytes().ok_or(ArchiveError::BadColumnValue {
                column: "DataL/DataH",
                row: 0,
            })?;
            collect_entries(&Table::parse(payload)?, &mut entries)?;
        }

        // Offsets are not stored; they follow from the IDs: walk the content
        // region in ID order, each entry aligned up to the declared block.
        entries.sort_by_key(CpkEntry::id);
        assign_offsets(&mut entries, content_offset, align);

        Ok(Self {
            reader: RefCell::new(reader),
            file_path: path.to_path_buf(),
            entries: entries.into_iter().map(|e| (e.id, e)).collect(),
        })
    }

    fn select_entries(&self, patterns: &[String]) -> Result<Vec<&CpkEntry>, ArchiveError> {
        let mut selected = Vec::new();
        let mut globs = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(id) = pattern.parse::<u16>() {
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
                if globs.is_match(entry.id.to_string()) && !selected.iter().any(|e| e.id == entry.id)
                {
                    selected.push(entry);
                }
            }
        }

        if selected.is_empty() {
            return Err(ArchiveError::NoMatches);
        }
        Ok(selected)
    }

    fn extract_entry(&self, entry: &CpkEntry, outdir: &Path) -> Result<(), ArchiveError> {
        println!(
            "magpak: extracting{} file '{}'",
            if entry.is_compressed() { " compressed" } else { "" },
            entry.id
        );

        let mut reader = self.reader.borrow_mut();
        reader.seek(SeekFrom::Start(entry.offset))?;
        #[allow(clippy::cast_possible_truncation)]
        let mut raw = vec![0u8; entry.size as usize];
        reader.read_exact(&mut raw)?;

        let path = outdir.join(entry.id.to_string());
        if entry.is_compressed() {
            let (header, data) = crilayla::decompress(raw)?;
            let mut file = File::create(path)?;
            file.write_all(&header)?;
            file.write_all(&data)?;
        } else {
            fs::write(path, &raw)?;
        }
        Ok(())
    }
}

impl Archive for CpkArchive {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let reader = BufReader::new(File::open(&path)?);
        Self::build(reader, path.as_ref())
    }

    #[allow(clippy::print_literal)] // readability >>>
    fn list_entries(&self) {
        println!("{:<6} {:<12} {:<12} {}", "ID", "Size", "Extracted", "Offset");
        println!("============================================");
        for entry in self.entries.values() {
            println!(
                "{:<6} {:<12} {:<12} {:#x}",
                entry.id(),
                format!(
                    "{}{}",
                    ByteSize::b(entry.size()),
                    if entry.is_compressed() { "*" } else { "" }
                ),
                ByteSize::b(entry.size_decompressed()).to_string(),
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
            self.extract_entry(entry, &outdir)?;
        }
        Ok(())
    }

    fn pack_dir<P: AsRef<Path>, Q: AsRef<Path>>(indir: P, archive: Q) -> Result<(), ArchiveError> {
        let mut files = Vec::new();
        for dir_entry in fs::read_dir(indir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let file_name = file_name.to_string_lossy();
            let id: u16 = file_name
                .parse()
                .map_err(|_| ArchiveError::BadEntryName(file_name.into_owned()))?;
            let size = dir_entry.metadata()?.len();
            if u32::try_from(size).is_err() {
                return Err(ArchiveError::FileTooLarge(dir_entry.path()));
            }
            files.push((id, size, dir_entry.path()));
        }
        files.sort_by_key(|(id, ..)| *id);

        // DataL would hold entries up to 64 KiB with u16 size columns; the
        // wider DataH columns cover everything, so DataL stays schema-only.
        let mut data_l = Table::new();
        data_l.declare("ID", ValueKind::U16);
        data_l.declare("FileSize", ValueKind::U16);
        data_l.declare("ExtractSize", ValueKind::U16);

        let mut data_h = Table::new();
        #[allow(clippy::cast_possible_truncation)]
        for (id, size, _) in &files {
            data_h.push("ID", Value::U16(*id))?;
            data_h.push("FileSize", Value::U32(*size as u32))?;
            data_h.push("ExtractSize", Value::U32(*size as u32))?;
        }

        let mut itoc = Table::new();
        itoc.push("DataL", Value::Bytes(data_l.commit()?))?;
        itoc.push("DataH", Value::Bytes(data_h.commit()?))?;
        let mut itoc_payload = itoc.commit()?;
        let itoc_size = itoc_payload.len() as u64 + ITOC_LENGTH_SLACK;

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

            writer.seek(SeekFrom::Start(ITOC_OFFSET))?;
            writer.write_u32::<LE>(ITOC_MAGIC)?;
            writer.write_u32::<LE>(0)?;
            writer.write_u64::<LE>(itoc_size)?;
            utf::mask(&mut itoc_payload);
            writer.write_all(&itoc_payload)?;

            let content_offset = align_up(writer.stream_position()?, u64::from(CONTENT_ALIGN));
            writer.seek(SeekFrom::Start(content_offset))?;
            for (id, _, path) in &files {
                println!("magpak: packing file '{id}'");
                io::copy(&mut File::open(path)?, &mut writer)?;
                let pos = writer.stream_position()?;
                writer.seek(SeekFrom::Start(align_up(pos, u64::from(CONTENT_ALIGN))))?;
            }
            let content_end = writer.stream_position()?;

            let mut cpk = Table::new();
            cpk.push("ContentOffset", Value::U64(content_offset))?;
            cpk.push("ContentSize", Value::U64(content_end - content_offset))?;
            cpk.push("ItocOffset", Value::U64(ITOC_OFFSET))?;
            cpk.push("ItocSize", Value::U64(itoc_size))?;
            cpk.push("Align", Value::U16(CONTENT_ALIGN))?;
            cpk.push("CpkMode", Value::U32(0))?;
            let mut cpk_payload = cpk.commit()?;
            utf::mask(&mut cpk_payload);

            writer.seek(SeekFrom::Start(0))?;
            writer.write_u32::<LE>(CPK_MAGIC)?;
            writer.write_u32::<LE>(0)?;
            writer.write_u64::<LE>(cpk_payload.len() as u64)?;
            writer.write_all(&cpk_payload)?;
            writer.flush()?;
        }
        tmp.persist(archive).map_err(|e| ArchiveError::Io(e.error))?;

        Ok(())
    }
}

/// Reads a `CPK`/`ITOC` block: 16-byte container header, then the table
/// payload, unmasking it when it does not already read as `@UTF`.
fn read_table_payload<R: Read>(reader: &mut R, expected_magic: u32) -> Result<Vec<u8>, ArchiveError> {
    let magic = reader.read_u32::<LE>()?;
    if magic != expected_magic {
        return Err(ArchiveError::BadSignature(
            String::from_utf8_lossy(&magic.to_le_bytes()).into_owned(),
        ));
    }
    let _pad = reader.read_u32::<LE>()?;
    let length = reader.read_u64::<LE>()?;

    // The ITOC length field runs 0x10 past the payload, so hitting end of
    // file inside that slack is fine; the table carries its own size.
    let mut payload = Vec::new();
    reader.take(length).read_to_end(&mut payload)?;

    if payload.len() < 4 {
        return Err(ArchiveError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "table payload shorter than its magic",
        )));
    }
    if &payload[..4] != b"@UTF" {
        utf::mask(&mut payload);
    }
    Ok(payload)
}

fn collect_entries(table: &Table, out: &mut Vec<CpkEntry>) -> Result<(), ArchiveError> {
    let Some(ids) = table.column("ID") else {
        return Ok(());
    };
    for row in 0..ids.values().len() {
        let id = ids
            .get(row)
            .and_then(Value::as_u16)
            .ok_or(ArchiveError::BadColumnValue { column: "ID", row })?;
        // size columns are u16 in DataL and u32 in DataH; widen either way
        let size = row_u64(table, "FileSize", row)?;
        let size_decompressed = row_u64(table, "ExtractSize", row)?;
        out.push(CpkEntry {
            id,
            offset: 0,
            size,
            size_decompressed,
        });
    }
    Ok(())
}

fn assign_offsets(entries: &mut [CpkEntry], content_offset: u64, align: u16) {
    let mut offset = content_offset;
    for entry in entries {
        entry.offset = offset;
        offset = align_up(offset + entry.size, u64::from(align));
    }
}

fn row_u64(table: &Table, column: &'static str, row: usize) -> Result<u64, ArchiveError> {
    table
        .column(column)
        .ok_or(ArchiveError::MissingColumn(column))?
        .get(row)
        .and_then(Value::as_u64)
        .ok_or(ArchiveError::BadColumnValue { column, row })
}

fn require_u64(table: &Table, column: &'static str) -> Result<u64, ArchiveError> {
    row_u64(table, column, 0)
}

fn require_u16(table: &Table, column: &'static str) -> Result<u16, ArchiveError> {
    table
        .column(column)
        .ok_or(ArchiveError::MissingColumn(column))?
        .get(0)
        .and_then(Value::as_u16)
        .ok_or(ArchiveError::BadColumnValue { column, row: 0 })
}

fn optional_u32(table: &Table, column: &'static str) -> Result<Option<u32>, ArchiveError> {
    match table.column(column).and_then(|c| c.get(0)) {
        Some(value) => value
            .as_u32()
            .map(Some)
            .ok_or(ArchiveError::BadColumnValue { column, row: 0 }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u16, size: u64) -> CpkEntry {
        CpkEntry {
            id,
            offset: 0,
            size,
            size_decompressed: size,
        }
    }

    #[test]
    fn offsets_follow_ids_with_block_alignment() {
        let mut entries = vec![entry(0, 100), entry(1, 2100), entry(2, 1)];
        assign_offsets(&mut entries, 0x800, 2048);
        assert_eq!(entries[0].offset(), 0x800);
        assert_eq!(entries[1].offset(), 0x1000);
        assert_eq!(entries[2].offset(), 0x2000);
        for e in &entries {
            assert_eq!(e.offset() % 2048, 0);
        }
    }

    #[test]
    fn inner_tables_widen_their_size_columns() {
        let mut narrow = Table::new();
        narrow.push("ID", Value::U16(4)).unwrap();
        narrow.push("FileSize", Value::U16(0x1234)).unwrap();
        narrow.push("ExtractSize", Value::U16(0x2345)).unwrap();

        let mut entries = Vec::new();
        collect_entries(&narrow, &mut entries).unwrap();
        assert_eq!(entries[0].id(), 4);
        assert_eq!(entries[0].size(), 0x1234);
        assert_eq!(entries[0].size_decompressed(), 0x2345);
    }

    #[test]
    fn container_header_is_validated_and_unmasked() {
        let mut table = Table::new();
        table.push("Align", Value::U16(2048)).unwrap();
        let mut payload = table.commit().unwrap();
        utf::mask(&mut payload);

        let mut block = Vec::new();
        block.extend_from_slice(&CPK_MAGIC.to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes());
        block.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        block.extend_from_slice(&payload);

        let recovered = read_table_payload(&mut block.as_slice(), CPK_MAGIC).unwrap();
        assert_eq!(&recovered[..4], b"@UTF");
        assert!(read_table_payload(&mut block.as_slice(), ITOC_MAGIC).is_err());
    }
}
