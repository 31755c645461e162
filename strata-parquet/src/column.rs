use std::fmt::{Debug, Formatter};

use strata_buffer::{Buffer, ByteBuffer, NativeType};
use strata_error::{StrataResult, strata_bail};

use crate::PhysicalType;
use crate::schema::{ColumnType, Field};

/// The decoded contents of a column.
#[derive(Clone)]
pub enum ColumnData {
    /// Little-endian fixed-width values, one per entry. Booleans are one byte each.
    Fixed {
        physical_type: PhysicalType,
        values: ByteBuffer,
    },
    /// Variable-width byte arrays. Entry `i` spans `data[offsets[i]..offsets[i + 1]]`.
    Binary {
        offsets: Buffer<i32>,
        data: ByteBuffer,
        /// The entries are text. Their UTF-8 is not validated.
        string: bool,
    },
    /// Entry `i` spans the child entries `offsets[i]..offsets[i + 1]`.
    List {
        offsets: Buffer<i32>,
        child: Box<Column>,
    },
    Struct { children: Vec<Column> },
}

/// A decoded, null-aware column.
#[derive(Clone)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) nullable: bool,
    pub(crate) len: usize,
    /// Bit `i` (LSB first) is set when entry `i` is valid.
    pub(crate) validity: Option<Buffer<u32>>,
    pub(crate) null_count: usize,
    pub(crate) data: ColumnData,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    /// The validity bitmap, absent for columns that cannot hold nulls.
    pub fn validity(&self) -> Option<&Buffer<u32>> {
        self.validity.as_ref()
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        match &self.validity {
            None => idx < self.len,
            Some(words) => {
                idx < self.len && words.as_slice()[idx / 32] >> (idx % 32) & 1 == 1
            }
        }
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// The type of this column and its children.
    pub fn dtype(&self) -> ColumnType {
        match &self.data {
            ColumnData::Fixed { physical_type, .. } => ColumnType::Primitive(*physical_type),
            ColumnData::Binary { string: true, .. } => ColumnType::String,
            ColumnData::Binary { .. } => ColumnType::Primitive(PhysicalType::ByteArray),
            ColumnData::List { child, .. } => ColumnType::List(Box::new(child.field())),
            ColumnData::Struct { children } => {
                ColumnType::Struct(children.iter().map(Column::field).collect())
            }
        }
    }

    pub fn field(&self) -> Field {
        Field {
            name: self.name.clone(),
            nullable: self.nullable,
            dtype: self.dtype(),
        }
    }

    /// Reinterpret fixed-width values as `T`. Entries that are null hold zeroes.
    pub fn values<T: NativeType>(&self) -> StrataResult<Buffer<T>> {
        let ColumnData::Fixed {
            physical_type,
            values,
        } = &self.data
        else {
            strata_bail!("column {:?} is not fixed width", self.name);
        };
        if physical_type.fixed_width() != Some(size_of::<T>()) {
            strata_bail!(
                "column {:?} holds {physical_type} values, not {} byte values",
                self.name,
                size_of::<T>()
            );
        }
        if values.is_empty() {
            return Ok(Buffer::empty());
        }
        Ok(Buffer::from_byte_buffer(values.clone()))
    }

    /// The raw bytes of entry `idx` of a fixed-width or byte array column.
    pub fn value_bytes(&self, idx: usize) -> Option<&[u8]> {
        if idx >= self.len {
            return None;
        }
        match &self.data {
            ColumnData::Fixed {
                physical_type,
                values,
            } => {
                let width = physical_type.fixed_width()?;
                values.as_slice().get(idx * width..(idx + 1) * width)
            }
            ColumnData::Binary { offsets, data, .. } => {
                let start = usize::try_from(offsets.as_slice()[idx]).ok()?;
                let end = usize::try_from(offsets.as_slice()[idx + 1]).ok()?;
                data.as_slice().get(start..end)
            }
            _ => None,
        }
    }

    /// Entry `idx` of a string column, `None` when it is out of range or not valid UTF-8.
    pub fn value_str(&self, idx: usize) -> Option<&str> {
        match &self.data {
            ColumnData::Binary { string: true, .. } => {
                std::str::from_utf8(self.value_bytes(idx)?).ok()
            }
            _ => None,
        }
    }

    /// Offsets of a list or byte array column, one more than its length.
    pub fn offsets(&self) -> Option<&Buffer<i32>> {
        match &self.data {
            ColumnData::Binary { offsets, .. } | ColumnData::List { offsets, .. } => Some(offsets),
            _ => None,
        }
    }

    /// The element column of a list.
    pub fn child(&self) -> Option<&Column> {
        match &self.data {
            ColumnData::List { child, .. } => Some(child),
            _ => None,
        }
    }

    /// The fields of a struct.
    pub fn children(&self) -> &[Column] {
        match &self.data {
            ColumnData::Struct { children } => children,
            _ => &[],
        }
    }
}

impl Debug for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("dtype", &self.dtype().to_string())
            .field("len", &self.len)
            .field("null_count", &self.null_count)
            .finish()
    }
}

impl Debug for ColumnData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed {
                physical_type,
                values,
            } => f
                .debug_struct("Fixed")
                .field("physical_type", physical_type)
                .field("bytes", &values.len())
                .finish(),
            Self::Binary {
                offsets,
                data,
                string,
            } => f
                .debug_struct("Binary")
                .field("offsets", &offsets.len())
                .field("bytes", &data.len())
                .field("string", string)
                .finish(),
            Self::List { offsets, child } => f
                .debug_struct("List")
                .field("offsets", &offsets.len())
                .field("child", child)
                .finish(),
            Self::Struct { children } => f.debug_list().entries(children).finish(),
        }
    }
}

/// Where the rows of a [`Table`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub column_names: Vec<String>,
    pub num_rows: usize,
    /// The row groups read from each source, in read order.
    pub row_groups: Vec<Vec<usize>>,
}

/// The result of a read: one column per selected top-level field.
#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<Column>,
    pub metadata: TableMetadata,
}

impl Table {
    pub fn num_rows(&self) -> usize {
        self.metadata.num_rows
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}
