//! Minimal `#~` table stream access for assembly identity.
//!
//! This module parses the compressed metadata table stream far enough to read the handful
//! of tables the signing pipeline needs: `Assembly` (public key, hash algorithm),
//! `CustomAttribute` / `MemberRef` / `TypeRef` (target framework attribute resolution).
//!
//! Row sizes depend on heap index widths and on the row counts of every table referenced
//! by simple or coded indexes, so the full column layout of all ECMA-335 II.22 tables is
//! modeled even though only a few tables are ever read.
//!
//! # References
//!
//! - [ECMA-335 II.24.2.6: `#~` stream](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Table id of the `Module` table
pub const TABLE_MODULE: u8 = 0x00;
/// Table id of the `TypeRef` table
pub const TABLE_TYPE_REF: u8 = 0x01;
/// Table id of the `TypeDef` table
pub const TABLE_TYPE_DEF: u8 = 0x02;
/// Table id of the `MemberRef` table
pub const TABLE_MEMBER_REF: u8 = 0x0A;
/// Table id of the `CustomAttribute` table
pub const TABLE_CUSTOM_ATTRIBUTE: u8 = 0x0C;
/// Table id of the `Assembly` table
pub const TABLE_ASSEMBLY: u8 = 0x20;
/// Table id of the `MethodDef` table
pub const TABLE_METHOD_DEF: u8 = 0x06;

/// A column of a metadata table row, in the units relevant for size computation.
#[derive(Clone, Copy)]
enum Column {
    /// Fixed width in bytes
    Fixed(u8),
    /// Index into the `#Strings` heap
    Str,
    /// Index into the `#GUID` heap
    Guid,
    /// Index into the `#Blob` heap
    Blob,
    /// Simple index into another table
    Table(u8),
    /// Coded index spanning several tables
    Coded(CodedIndex),
}

/// The coded index families of ECMA-335 II.24.2.6.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CodedIndex {
    /// TypeDef, TypeRef or TypeSpec
    TypeDefOrRef,
    /// Field, Param or Property
    HasConstant,
    /// Any element that can carry a custom attribute
    HasCustomAttribute,
    /// Field or Param
    HasFieldMarshal,
    /// TypeDef, MethodDef or Assembly
    HasDeclSecurity,
    /// TypeDef, TypeRef, ModuleRef, MethodDef or TypeSpec
    MemberRefParent,
    /// Event or Property
    HasSemantics,
    /// MethodDef or MemberRef
    MethodDefOrRef,
    /// Field or MethodDef
    MemberForwarded,
    /// File, AssemblyRef or ExportedType
    Implementation,
    /// MethodDef or MemberRef constructor of a custom attribute
    CustomAttributeType,
    /// Module, ModuleRef, AssemblyRef or TypeRef
    ResolutionScope,
    /// TypeDef or MethodDef
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Member tables by tag value. `None` marks tags that are defined but unused.
    fn members(self) -> &'static [Option<u8>] {
        match self {
            CodedIndex::TypeDefOrRef => &[Some(0x02), Some(0x01), Some(0x1B)],
            CodedIndex::HasConstant => &[Some(0x04), Some(0x08), Some(0x17)],
            CodedIndex::HasCustomAttribute => &[
                Some(0x06),
                Some(0x04),
                Some(0x01),
                Some(0x02),
                Some(0x08),
                Some(0x09),
                Some(0x0A),
                Some(0x00),
                Some(0x0E),
                Some(0x17),
                Some(0x14),
                Some(0x11),
                Some(0x1A),
                Some(0x1B),
                Some(0x20),
                Some(0x23),
                Some(0x26),
                Some(0x27),
                Some(0x28),
                Some(0x2A),
                Some(0x2C),
                Some(0x2B),
            ],
            CodedIndex::HasFieldMarshal => &[Some(0x04), Some(0x08)],
            CodedIndex::HasDeclSecurity => &[Some(0x02), Some(0x06), Some(0x20)],
            CodedIndex::MemberRefParent => &[
                Some(0x02),
                Some(0x01),
                Some(0x1A),
                Some(0x06),
                Some(0x1B),
            ],
            CodedIndex::HasSemantics => &[Some(0x14), Some(0x17)],
            CodedIndex::MethodDefOrRef => &[Some(0x06), Some(0x0A)],
            CodedIndex::MemberForwarded => &[Some(0x04), Some(0x06)],
            CodedIndex::Implementation => &[Some(0x26), Some(0x23), Some(0x27)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(0x06), Some(0x0A), None]
            }
            CodedIndex::ResolutionScope => {
                &[Some(0x00), Some(0x1A), Some(0x23), Some(0x01)]
            }
            CodedIndex::TypeOrMethodDef => &[Some(0x02), Some(0x06)],
        }
    }

    /// Number of tag bits used by this family.
    fn tag_bits(self) -> u32 {
        let members = self.members().len() as u32;
        32 - (members - 1).leading_zeros()
    }
}

/// A resolved coded index: target table and 1-based row number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodedTarget {
    /// The table the index points into
    pub table: u8,
    /// 1-based row number, 0 meaning null
    pub row: u32,
}

/// Column layout per II.22. Tables absent from this list never appear in a `#~` stream.
fn layout(table: u8) -> Option<&'static [Column]> {
    use Column::{Blob, Coded, Fixed, Guid, Str, Table};

    Some(match table {
        0x00 => &[Fixed(2), Str, Guid, Guid, Guid],
        0x01 => &[Coded(CodedIndex::ResolutionScope), Str, Str],
        0x02 => &[
            Fixed(4),
            Str,
            Str,
            Coded(CodedIndex::TypeDefOrRef),
            Table(0x04),
            Table(0x06),
        ],
        0x04 => &[Fixed(2), Str, Blob],
        0x06 => &[Fixed(4), Fixed(2), Fixed(2), Str, Blob, Table(0x08)],
        0x08 => &[Fixed(2), Fixed(2), Str],
        0x09 => &[Table(0x02), Coded(CodedIndex::TypeDefOrRef)],
        0x0A => &[Coded(CodedIndex::MemberRefParent), Str, Blob],
        0x0B => &[Fixed(2), Coded(CodedIndex::HasConstant), Blob],
        0x0C => &[
            Coded(CodedIndex::HasCustomAttribute),
            Coded(CodedIndex::CustomAttributeType),
            Blob,
        ],
        0x0D => &[Coded(CodedIndex::HasFieldMarshal), Blob],
        0x0E => &[Fixed(2), Coded(CodedIndex::HasDeclSecurity), Blob],
        0x0F => &[Fixed(2), Fixed(4), Table(0x02)],
        0x10 => &[Fixed(4), Table(0x04)],
        0x11 => &[Blob],
        0x12 => &[Table(0x02), Table(0x14)],
        0x14 => &[Fixed(2), Str, Coded(CodedIndex::TypeDefOrRef)],
        0x15 => &[Table(0x02), Table(0x17)],
        0x17 => &[Fixed(2), Str, Blob],
        0x18 => &[Fixed(2), Table(0x06), Coded(CodedIndex::HasSemantics)],
        0x19 => &[
            Table(0x02),
            Coded(CodedIndex::MethodDefOrRef),
            Coded(CodedIndex::MethodDefOrRef),
        ],
        0x1A => &[Str],
        0x1B => &[Blob],
        0x1C => &[
            Fixed(2),
            Coded(CodedIndex::MemberForwarded),
            Str,
            Table(0x1A),
        ],
        0x1D => &[Fixed(4), Table(0x04)],
        0x20 => &[
            Fixed(4),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(4),
            Blob,
            Str,
            Str,
        ],
        0x21 => &[Fixed(4)],
        0x22 => &[Fixed(4), Fixed(4), Fixed(4)],
        0x23 => &[
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(4),
            Blob,
            Str,
            Str,
            Blob,
        ],
        0x24 => &[Fixed(4), Table(0x23)],
        0x25 => &[Fixed(4), Fixed(4), Fixed(4), Table(0x23)],
        0x26 => &[Fixed(4), Str, Blob],
        0x27 => &[Fixed(4), Fixed(4), Str, Str, Coded(CodedIndex::Implementation)],
        0x28 => &[Fixed(4), Fixed(4), Str, Coded(CodedIndex::Implementation)],
        0x29 => &[Table(0x02), Table(0x02)],
        0x2A => &[Fixed(2), Fixed(2), Coded(CodedIndex::TypeOrMethodDef), Str],
        0x2B => &[Coded(CodedIndex::MethodDefOrRef), Blob],
        0x2C => &[Table(0x2A), Coded(CodedIndex::TypeDefOrRef)],
        _ => return None,
    })
}

/// Parsed `#~` stream: row counts, computed row sizes and per-table data offsets.
#[derive(Debug)]
pub struct TablesStream<'a> {
    data: &'a [u8],
    heap_sizes: u8,
    row_counts: [u32; 64],
    row_sizes: [u32; 64],
    offsets: [usize; 64],
}

impl<'a> TablesStream<'a> {
    /// Parses the `#~` stream header and computes the physical layout of all present
    /// tables.
    ///
    /// # Arguments
    /// * `data` - The raw bytes of the `#~` stream
    ///
    /// # Errors
    /// Returns an error for truncated data, or [`crate::Error::NotSupported`] if the
    /// stream declares a table this reader does not model (e.g. portable PDB tables).
    pub fn parse(data: &'a [u8]) -> Result<TablesStream<'a>> {
        if data.len() < 24 {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);
        parser.read_le::<u32>()?; // Reserved
        parser.read_le::<u8>()?; // MajorVersion
        parser.read_le::<u8>()?; // MinorVersion
        let heap_sizes = parser.read_le::<u8>()?;
        parser.read_le::<u8>()?; // Reserved
        let valid = parser.read_le::<u64>()?;
        parser.read_le::<u64>()?; // Sorted

        let mut row_counts = [0_u32; 64];
        for (table, count) in row_counts.iter_mut().enumerate() {
            if valid & (1_u64 << table) != 0 {
                if layout(table as u8).is_none() {
                    return Err(crate::Error::NotSupported);
                }
                *count = parser.read_le::<u32>()?;
            }
        }

        let mut stream = TablesStream {
            data,
            heap_sizes,
            row_counts,
            row_sizes: [0; 64],
            offsets: [0; 64],
        };

        let mut offset = parser.pos();
        for table in 0..64_u8 {
            if stream.row_counts[table as usize] == 0 {
                continue;
            }

            let row_size = stream.compute_row_size(table);
            stream.row_sizes[table as usize] = row_size;
            stream.offsets[table as usize] = offset;
            offset += row_size as usize * stream.row_counts[table as usize] as usize;
        }

        if offset > data.len() {
            return Err(OutOfBounds);
        }

        Ok(stream)
    }

    /// Returns the number of rows in the given table.
    #[must_use]
    pub fn rows(&self, table: u8) -> u32 {
        self.row_counts[table as usize]
    }

    /// Returns `true` if `#Strings` heap indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_strings(&self) -> bool {
        self.heap_sizes & 0x01 != 0
    }

    /// Returns `true` if `#GUID` heap indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_guids(&self) -> bool {
        self.heap_sizes & 0x02 != 0
    }

    /// Returns `true` if `#Blob` heap indexes are 4 bytes wide.
    #[must_use]
    pub fn wide_blobs(&self) -> bool {
        self.heap_sizes & 0x04 != 0
    }

    fn table_index_wide(&self, table: u8) -> bool {
        self.row_counts[table as usize] >= 0x1_0000
    }

    fn coded_index_wide(&self, coded: CodedIndex) -> bool {
        let max_rows = coded
            .members()
            .iter()
            .flatten()
            .map(|table| self.row_counts[*table as usize])
            .max()
            .unwrap_or(0);

        max_rows >= 1_u32 << (16 - coded.tag_bits())
    }

    fn column_size(&self, column: Column) -> u32 {
        match column {
            Column::Fixed(width) => u32::from(width),
            Column::Str => {
                if self.wide_strings() {
                    4
                } else {
                    2
                }
            }
            Column::Guid => {
                if self.wide_guids() {
                    4
                } else {
                    2
                }
            }
            Column::Blob => {
                if self.wide_blobs() {
                    4
                } else {
                    2
                }
            }
            Column::Table(table) => {
                if self.table_index_wide(table) {
                    4
                } else {
                    2
                }
            }
            Column::Coded(coded) => {
                if self.coded_index_wide(coded) {
                    4
                } else {
                    2
                }
            }
        }
    }

    fn compute_row_size(&self, table: u8) -> u32 {
        layout(table)
            .expect("layout checked during parse")
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }

    /// Returns a cursor positioned at the start of a row.
    ///
    /// # Arguments
    /// * `table` - Table id
    /// * `row` - 1-based row number
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the table or row does not exist.
    pub fn row(&self, table: u8, row: u32) -> Result<RowCursor<'a, '_>> {
        if row == 0 || row > self.row_counts[table as usize] {
            return Err(OutOfBounds);
        }

        let start = self.offsets[table as usize]
            + (row - 1) as usize * self.row_sizes[table as usize] as usize;

        let mut parser = Parser::new(self.data);
        parser.seek(start)?;

        Ok(RowCursor {
            stream: self,
            parser,
        })
    }
}

/// Sequential reader over the columns of a single table row.
pub struct RowCursor<'a, 'b> {
    stream: &'b TablesStream<'a>,
    parser: Parser<'a>,
}

impl RowCursor<'_, '_> {
    /// Reads a fixed 2-byte column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.parser.read_le::<u16>()
    }

    /// Reads a fixed 4-byte column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.parser.read_le::<u32>()
    }

    /// Reads a `#Strings` heap index column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data.
    pub fn read_str_index(&mut self) -> Result<u32> {
        self.parser.read_le_dyn(self.stream.wide_strings())
    }

    /// Reads a `#GUID` heap index column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data.
    pub fn read_guid_index(&mut self) -> Result<u32> {
        self.parser.read_le_dyn(self.stream.wide_guids())
    }

    /// Reads a `#Blob` heap index column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data.
    pub fn read_blob_index(&mut self) -> Result<u32> {
        self.parser.read_le_dyn(self.stream.wide_blobs())
    }

    /// Reads a simple table index column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data.
    pub fn read_table_index(&mut self, table: u8) -> Result<u32> {
        self.parser.read_le_dyn(self.stream.table_index_wide(table))
    }

    /// Reads and decodes a coded index column.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data, or a malformed error for
    /// a tag value with no table assigned.
    pub fn read_coded(&mut self, coded: CodedIndex) -> Result<CodedTarget> {
        let value = self.parser.read_le_dyn(self.stream.coded_index_wide(coded))?;
        let tag_bits = coded.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;
        let row = value >> tag_bits;

        let members = coded.members();
        let table = members
            .get(tag)
            .copied()
            .flatten()
            .ok_or_else(|| malformed_error!("Invalid coded index tag - {}", tag))?;

        Ok(CodedTarget { table, row })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a `#~` stream containing only an Assembly table with one row.
    fn assembly_only_stream(public_key_index: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0_u32.to_le_bytes()); // Reserved
        data.push(2); // MajorVersion
        data.push(0); // MinorVersion
        data.push(0); // HeapSizes - all narrow
        data.push(1); // Reserved
        data.extend_from_slice(&(1_u64 << 0x20).to_le_bytes()); // Valid
        data.extend_from_slice(&0_u64.to_le_bytes()); // Sorted
        data.extend_from_slice(&1_u32.to_le_bytes()); // Assembly rows

        data.extend_from_slice(&0x8004_u32.to_le_bytes()); // HashAlgId SHA1
        data.extend_from_slice(&1_u16.to_le_bytes()); // MajorVersion
        data.extend_from_slice(&2_u16.to_le_bytes()); // MinorVersion
        data.extend_from_slice(&3_u16.to_le_bytes()); // BuildNumber
        data.extend_from_slice(&4_u16.to_le_bytes()); // RevisionNumber
        data.extend_from_slice(&0x0001_u32.to_le_bytes()); // Flags - PublicKey
        data.extend_from_slice(&public_key_index.to_le_bytes()); // PublicKey
        data.extend_from_slice(&1_u16.to_le_bytes()); // Name
        data.extend_from_slice(&0_u16.to_le_bytes()); // Culture
        data
    }

    #[test]
    fn parse_assembly_row() {
        let data = assembly_only_stream(7);
        let stream = TablesStream::parse(&data).unwrap();

        assert_eq!(stream.rows(TABLE_ASSEMBLY), 1);
        assert_eq!(stream.rows(TABLE_MODULE), 0);

        let mut row = stream.row(TABLE_ASSEMBLY, 1).unwrap();
        assert_eq!(row.read_u32().unwrap(), 0x8004);
        assert_eq!(row.read_u16().unwrap(), 1);
        assert_eq!(row.read_u16().unwrap(), 2);
        assert_eq!(row.read_u16().unwrap(), 3);
        assert_eq!(row.read_u16().unwrap(), 4);
        assert_eq!(row.read_u32().unwrap(), 0x0001);
        assert_eq!(row.read_blob_index().unwrap(), 7);
        assert_eq!(row.read_str_index().unwrap(), 1);
        assert_eq!(row.read_str_index().unwrap(), 0);
    }

    #[test]
    fn row_bounds() {
        let data = assembly_only_stream(0);
        let stream = TablesStream::parse(&data).unwrap();

        assert!(stream.row(TABLE_ASSEMBLY, 0).is_err());
        assert!(stream.row(TABLE_ASSEMBLY, 2).is_err());
        assert!(stream.row(TABLE_MODULE, 1).is_err());
    }

    #[test]
    fn rejects_unknown_tables() {
        let mut data = Vec::new();
        data.extend_from_slice(&0_u32.to_le_bytes());
        data.push(2);
        data.push(0);
        data.push(0);
        data.push(1);
        data.extend_from_slice(&(1_u64 << 0x30).to_le_bytes()); // portable PDB Document table
        data.extend_from_slice(&0_u64.to_le_bytes());
        data.extend_from_slice(&1_u32.to_le_bytes());

        assert!(matches!(
            TablesStream::parse(&data).unwrap_err(),
            crate::Error::NotSupported
        ));
    }

    #[test]
    fn coded_index_tags() {
        assert_eq!(CodedIndex::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndex::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndex::ResolutionScope.tag_bits(), 2);
        assert_eq!(CodedIndex::MethodDefOrRef.tag_bits(), 1);
    }

    #[test]
    fn rejects_truncated() {
        assert!(TablesStream::parse(&[0_u8; 8]).is_err());
    }
}
