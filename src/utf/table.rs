use super::value::{Value, ValueKind};
use super::UtfError;
use crate::stream::{ByteStream, Endian};
use indexmap::IndexMap;

/// `@UTF` read as a big-endian u32.
const SUB_MAGIC: u32 = 0x4055_5446;

/// magic, length, row offset, string pool, data pool, name, field count,
/// row stride, row count.
const SUB_HEADER_LEN: usize = 32;

/// Pool offsets in the sub-header are relative to its start plus this.
const POOL_BASE: usize = 8;

const FLAG_NAMED: u8 = 0x10;
const FLAG_DEFAULT: u8 = 0x20;
const FLAG_VALID: u8 = 0x40;

/// Every string pool opens with these two reserved entries (plus the
/// terminator the reference tooling carries along); CriWare's lookup skips
/// the first two slots unconditionally.
const STRING_POOL_PREFIX: &[u8] = b"<NULL>\0El Psy Kongroo\0\0";

/// XOR stream cipher some table payloads are wrapped in. Applying it twice
/// restores the original bytes.
pub fn mask(data: &mut [u8]) {
    let mut key: u32 = 25951;
    for byte in data {
        *byte ^= key as u8;
        key = key.wrapping_mul(16661);
    }
}

/// A single table column: declaration-ordered name, type, schema flags, and
/// its cells. A column with a default carries that default as `values[0]`
/// and contributes nothing to the row block; an invalid column is schema
/// only and holds no cells at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    kind: Option<ValueKind>,
    has_default: bool,
    is_valid: bool,
    values: Vec<Value>,
}

impl Column {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: None,
            has_default: false,
            is_valid: false,
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> Option<ValueKind> {
        self.kind
    }

    #[must_use]
    pub const fn has_default(&self) -> bool {
        self.has_default
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.is_valid
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    fn check_kind(&mut self, value: &Value) -> Result<ValueKind, UtfError> {
        let kind = value.kind();
        match self.kind {
            None => self.kind = Some(kind),
            Some(declared) if declared != kind => {
                return Err(UtfError::TypeMismatch {
                    column: self.name.clone(),
                    expected: declared,
                    found: kind,
                })
            }
            Some(_) => {}
        }
        Ok(kind)
    }

    /// Appends a cell, fixing the column type on first use.
    pub fn push(&mut self, value: Value) -> Result<(), UtfError> {
        self.check_kind(&value)?;
        self.values.push(value);
        self.is_valid = true;
        Ok(())
    }

    /// Marks the column defaulted, with `value` as the schema-level cell.
    pub fn set_default(&mut self, value: Value) -> Result<(), UtfError> {
        self.check_kind(&value)?;
        self.values.insert(0, value);
        self.has_default = true;
        self.is_valid = true;
        Ok(())
    }
}

/// An `@UTF` table: columns in declaration order, addressable by name.
/// Constructed either empty (then populated and `commit`ted to a payload) or
/// by `parse`ing a payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: IndexMap<String, Column>,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    fn column_mut(&mut self, name: &str) -> &mut Column {
        self.columns
            .entry(name.to_owned())
            .or_insert_with(|| Column::new(name))
    }

    /// Declares a schema-only column: typed, but invalid and cell-less
    /// until something is pushed.
    pub fn declare(&mut self, name: &str, kind: ValueKind) {
        self.column_mut(name).kind = Some(kind);
    }

    pub fn push(&mut self, name: &str, value: Value) -> Result<(), UtfError> {
        self.column_mut(name).push(value)
    }

    pub fn set_default(&mut self, name: &str, value: Value) -> Result<(), UtfError> {
        self.column_mut(name).set_default(value)
    }

    /// Reads a table from an unmasked payload (container header stripped).
    pub fn parse(payload: &[u8]) -> Result<Self, UtfError> {
        let mut s = ByteStream::from_vec(payload.to_vec(), Endian::Big);

        let magic = s.read_u32()?;
        if magic != SUB_MAGIC {
            return Err(UtfError::BadMagic(magic));
        }
        let _length = s.read_u32()?;
        // Tables written by CriWare's own tools carry a u16 format version in
        // the high half of this word; schema blocks never approach 64 KiB, so
        // a nonzero high half always means the versioned layout.
        let row_word = s.read_u32()?;
        let row_offset = if row_word > 0xFFFF {
            row_word & 0xFFFF
        } else {
            row_word
        };
        let string_pool_offset = s.read_u32()?;
        let data_pool_offset = s.read_u32()?;
        let _name_offset = s.read_u32()?;
        let field_count = s.read_u16()?;
        let row_stride = s.read_u16()?;
        let row_count = s.read_u32()?;

        let strings_base = string_pool_offset as usize + POOL_BASE;
        let data_base = data_pool_offset as usize + POOL_BASE;

        let mut columns = IndexMap::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            let flags = s.read_u8()?;
            let kind = ValueKind::from_tag(flags & 0xF)?;
            let name = if flags & FLAG_NAMED != 0 {
                read_pool_string(&mut s, strings_base)?
            } else {
                String::new()
            };
            let mut column = Column::new(&name);
            column.kind = Some(kind);
            column.has_default = flags & FLAG_DEFAULT != 0;
            column.is_valid = flags & FLAG_VALID != 0;
            if column.has_default {
                let value = read_value(&mut s, kind, strings_base, data_base)?;
                column.values.push(value);
            }
            columns.insert(name, column);
        }

        let row_base = row_offset as usize + POOL_BASE;
        for row in 0..row_count as usize {
            s.seek(row_base + row * usize::from(row_stride));
            for column in columns.values_mut() {
                if column.has_default || !column.is_valid {
                    continue;
                }
                let kind = column.kind.unwrap_or(ValueKind::U8);
                let value = read_value(&mut s, kind, strings_base, data_base)?;
                column.values.push(value);
            }
        }

        Ok(Self { columns })
    }

    /// Serializes the table to a payload: sub-header, schema, row block,
    /// string pool, data pool. The sub-header `length` covers everything
    /// after the magic and length words themselves.
    pub fn commit(&self) -> Result<Vec<u8>, UtfError> {
        let mut s = ByteStream::new(Endian::Big);
        s.seek(SUB_HEADER_LEN);
        let mut strings = STRING_POOL_PREFIX.to_vec();
        let mut data = Vec::new();

        for column in self.columns.values() {
            let kind = column
                .kind
                .ok_or_else(|| UtfError::UntypedColumn(column.name.clone()))?;
            let mut flags = kind.tag();
            if !column.name.is_empty() {
                flags |= FLAG_NAMED;
            }
            if column.has_default {
                flags |= FLAG_DEFAULT;
            }
            if column.is_valid {
                flags |= FLAG_VALID;
            }
            s.write_u8(flags);
            if !column.name.is_empty() {
                write_pool_string(&mut s, &mut strings, &column.name);
            }
            if column.has_default {
                let value = column.get(0).ok_or_else(|| UtfError::MissingRow {
                    column: column.name.clone(),
                    row: 0,
                })?;
                write_value(&mut s, value, &mut strings, &mut data);
            }
        }

        let row_count = self.columns.values().next().map_or(0, |c| c.values.len());
        #[allow(clippy::cast_possible_truncation)]
        let row_offset = (s.tell() - POOL_BASE) as u32;
        let mut row_stride = 0u16;
        for row in 0..row_count {
            for column in self.columns.values() {
                if column.has_default || !column.is_valid {
                    continue;
                }
                let value = column.get(row).ok_or_else(|| UtfError::MissingRow {
                    column: column.name.clone(),
                    row,
                })?;
                write_value(&mut s, value, &mut strings, &mut data);
                if row == 0 {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        row_stride += value.kind().wire_len() as u16;
                    }
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let string_pool_offset = (s.tell() - POOL_BASE) as u32;
        s.write_bytes(&strings);
        #[allow(clippy::cast_possible_truncation)]
        let data_pool_offset = (s.tell() - POOL_BASE) as u32;
        s.write_bytes(&data);
        #[allow(clippy::cast_possible_truncation)]
        let length = (s.len() - POOL_BASE) as u32;

        s.seek(0);
        s.write_u32(SUB_MAGIC);
        s.write_u32(length);
        s.write_u32(row_offset);
        s.write_u32(string_pool_offset);
        s.write_u32(data_pool_offset);
        s.write_u32(0);
        #[allow(clippy::cast_possible_truncation)]
        s.write_u16(self.columns.len() as u16);
        s.write_u16(row_stride);
        #[allow(clippy::cast_possible_truncation)]
        s.write_u32(row_count as u32);

        Ok(s.into_vec())
    }
}

fn read_pool_string(s: &mut ByteStream, base: usize) -> Result<String, UtfError> {
    let offset = s.read_u32()? as usize;
    let bytes = s.read_cstr_at(base + offset)?.to_vec();
    Ok(String::from_utf8(bytes)?)
}

fn write_pool_string(s: &mut ByteStream, strings: &mut Vec<u8>, text: &str) {
    #[allow(clippy::cast_possible_truncation)]
    s.write_u32(strings.len() as u32);
    strings.extend_from_slice(text.as_bytes());
    strings.push(0);
}

fn read_value(
    s: &mut ByteStream,
    kind: ValueKind,
    strings_base: usize,
    data_base: usize,
) -> Result<Value, UtfError> {
    Ok(match kind {
        ValueKind::U8 => Value::U8(s.read_u8()?),
        ValueKind::I8 => Value::I8(s.read_i8()?),
        ValueKind::U16 => Value::U16(s.read_u16()?),
        ValueKind::I16 => Value::I16(s.read_i16()?),
        ValueKind::U32 => Value::U32(s.read_u32()?),
        ValueKind::I32 => Value::I32(s.read_i32()?),
        ValueKind::U64 => Value::U64(s.read_u64()?),
        ValueKind::I64 => Value::I64(s.read_i64()?),
        ValueKind::F32 => Value::F32(s.read_f32()?),
        ValueKind::F64 => Value::F64(s.read_f64()?),
        ValueKind::String => Value::String(read_pool_string(s, strings_base)?),
        ValueKind::Bytes => {
            let offset = s.read_u32()? as usize;
            let len = s.read_u32()? as usize;
            Value::Bytes(s.read_at(data_base + offset, len)?.to_vec())
        }
    })
}

fn write_value(s: &mut ByteStream, value: &Value, strings: &mut Vec<u8>, data: &mut Vec<u8>) {
    match value {
        Value::U8(v) => s.write_u8(*v),
        Value::I8(v) => s.write_i8(*v),
        Value::U16(v) => s.write_u16(*v),
        Value::I16(v) => s.write_i16(*v),
        Value::U32(v) => s.write_u32(*v),
        Value::I32(v) => s.write_i32(*v),
        Value::U64(v) => s.write_u64(*v),
        Value::I64(v) => s.write_i64(*v),
        Value::F32(v) => s.write_f32(*v),
        Value::F64(v) => s.write_f64(*v),
        Value::String(text) => write_pool_string(s, strings, text),
        Value::Bytes(bytes) => {
            #[allow(clippy::cast_possible_truncation)]
            {
                s.write_u32(data.len() as u32);
                s.write_u32(bytes.len() as u32);
            }
            data.extend_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be_u32(payload: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(payload[at..at + 4].try_into().unwrap())
    }

    fn sample_table() -> Table {
        let mut t = Table::new();
        for row in 0..2u8 {
            t.push("Flags", Value::U8(row)).unwrap();
            t.push("Delta", Value::I16(-5 - i16::from(row))).unwrap();
            t.push("Count", Value::U32(1000 + u32::from(row))).unwrap();
            t.push("Span", Value::U64(u64::from(row) << 40)).unwrap();
            t.push("Ratio", Value::F32(0.5 + f32::from(row))).unwrap();
            t.push("Label", Value::String(format!("row{row}"))).unwrap();
            t.push("Blob", Value::Bytes(vec![row; 5])).unwrap();
        }
        t.set_default("Origin", Value::String("tool".into())).unwrap();
        t
    }

    #[test]
    fn commit_then_parse_preserves_every_column() {
        let table = sample_table();
        let payload = table.commit().unwrap();
        let parsed = Table::parse(&payload).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn length_word_excludes_magic_and_itself() {
        let payload = sample_table().commit().unwrap();
        assert_eq!(be_u32(&payload, 4) as usize, payload.len() - 8);
    }

    #[test]
    fn string_pool_opens_with_the_reserved_entries() {
        let payload = sample_table().commit().unwrap();
        let pool = be_u32(&payload, 12) as usize + 8;
        assert_eq!(
            &payload[pool..pool + STRING_POOL_PREFIX.len()],
            STRING_POOL_PREFIX
        );
    }

    #[test]
    fn schema_only_columns_survive_a_round_trip() {
        let mut table = Table::new();
        table.declare("ID", ValueKind::U16);
        table.declare("FileSize", ValueKind::U16);
        table.declare("ExtractSize", ValueKind::U16);
        let payload = table.commit().unwrap();
        let parsed = Table::parse(&payload).unwrap();
        assert_eq!(parsed, table);
        let id = parsed.column("ID").unwrap();
        assert!(!id.is_valid());
        assert!(id.values().is_empty());
    }

    #[test]
    fn versioned_row_offset_word_is_accepted() {
        let table = sample_table();
        let mut payload = table.commit().unwrap();
        // graft a format version into the high half of the row offset word
        assert_eq!(&payload[8..10], &[0, 0]);
        payload[9] = 1;
        let parsed = Table::parse(&payload).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn mask_is_an_involution() {
        let original: Vec<u8> = (0..=255).collect();
        let mut masked = original.clone();
        mask(&mut masked);
        assert_ne!(masked, original);
        mask(&mut masked);
        assert_eq!(masked, original);
    }

    #[test]
    fn masked_payload_no_longer_reads_as_utf() {
        let mut payload = sample_table().commit().unwrap();
        assert_eq!(&payload[..4], b"@UTF");
        mask(&mut payload);
        assert_ne!(&payload[..4], b"@UTF");
        mask(&mut payload);
        assert_eq!(&payload[..4], b"@UTF");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut payload = sample_table().commit().unwrap();
        payload[0] = b'#';
        assert!(matches!(
            Table::parse(&payload),
            Err(UtfError::BadMagic(_))
        ));
    }

    #[test]
    fn cell_type_is_fixed_by_first_use() {
        let mut table = Table::new();
        table.push("ID", Value::U16(1)).unwrap();
        assert!(matches!(
            table.push("ID", Value::U32(2)),
            Err(UtfError::TypeMismatch { .. })
        ));
    }
}
