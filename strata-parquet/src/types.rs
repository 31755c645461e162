use std::fmt::{Display, Formatter};

use strata_error::{StrataResult, strata_bail};

/// Block compression codec of a column chunk, by its Thrift id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Codec {
    Uncompressed,
    Snappy,
    Gzip,
    Lzo,
    Brotli,
    /// LZ4 with the Hadoop block framing.
    Lz4,
    Zstd,
    /// A single raw LZ4 block.
    Lz4Raw,
}

impl Codec {
    pub fn try_from_thrift(id: i32) -> StrataResult<Self> {
        Ok(match id {
            0 => Self::Uncompressed,
            1 => Self::Snappy,
            2 => Self::Gzip,
            3 => Self::Lzo,
            4 => Self::Brotli,
            5 => Self::Lz4,
            6 => Self::Zstd,
            7 => Self::Lz4Raw,
            _ => strata_bail!(InvalidSerde: "unknown compression codec id {id}"),
        })
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uncompressed => "uncompressed",
            Self::Snappy => "snappy",
            Self::Gzip => "gzip",
            Self::Lzo => "lzo",
            Self::Brotli => "brotli",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::Lz4Raw => "lz4_raw",
        };
        f.write_str(name)
    }
}

/// Encoding of a page's values or levels, by its Thrift id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Plain,
    PlainDictionary,
    Rle,
    BitPacked,
    DeltaBinaryPacked,
    DeltaLengthByteArray,
    DeltaByteArray,
    RleDictionary,
    ByteStreamSplit,
}

impl Encoding {
    pub fn try_from_thrift(id: i32) -> StrataResult<Self> {
        Ok(match id {
            0 => Self::Plain,
            2 => Self::PlainDictionary,
            3 => Self::Rle,
            4 => Self::BitPacked,
            5 => Self::DeltaBinaryPacked,
            6 => Self::DeltaLengthByteArray,
            7 => Self::DeltaByteArray,
            8 => Self::RleDictionary,
            9 => Self::ByteStreamSplit,
            _ => strata_bail!(InvalidSerde: "unknown encoding id {id}"),
        })
    }

    /// Whether values are indices into the chunk dictionary.
    pub fn is_dictionary(&self) -> bool {
        matches!(self, Self::PlainDictionary | Self::RleDictionary)
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Physical storage type of a leaf column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Boolean,
    Int32,
    Int64,
    Int96,
    Float,
    Double,
    ByteArray,
    FixedLenByteArray(usize),
}

impl PhysicalType {
    /// Width in bytes of one decoded value, or `None` for variable width byte arrays.
    ///
    /// Booleans decode to one byte per value.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            Self::Int32 | Self::Float => Some(4),
            Self::Int64 | Self::Double => Some(8),
            Self::Int96 => Some(12),
            Self::FixedLenByteArray(width) => Some(*width),
            Self::ByteArray => None,
        }
    }

    pub fn is_byte_array(&self) -> bool {
        matches!(self, Self::ByteArray)
    }
}

impl Display for PhysicalType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FixedLenByteArray(width) => write!(f, "fixed_len_byte_array({width})"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// The kind of page a header describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageKind {
    Dictionary,
    #[default]
    DataV1,
    DataV2,
}

impl PageKind {
    pub fn is_data(&self) -> bool {
        !matches!(self, Self::Dictionary)
    }
}

/// The contiguous range of global rows selected by a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub skip: usize,
    pub num: usize,
}

impl RowWindow {
    pub fn new(skip: usize, num: usize) -> Self {
        Self { skip, num }
    }

    pub fn end(&self) -> usize {
        self.skip + self.num
    }

    #[inline]
    pub fn contains(&self, row: usize) -> bool {
        row >= self.skip && row < self.end()
    }

    /// Number of rows of `start..start + len` that fall inside the window.
    pub fn overlap(&self, start: usize, len: usize) -> usize {
        let lo = start.max(self.skip);
        let hi = (start + len).min(self.end());
        hi.saturating_sub(lo)
    }
}
