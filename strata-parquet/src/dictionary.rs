use strata_buffer::{MemoryPool, Reservation};
use strata_error::{StrataResult, strata_bail};

use crate::page_header::PageInfo;
use crate::{Encoding, PhysicalType};

/// Every PLAIN byte-array entry starts with a 4-byte length.
const LENGTH_PREFIX: usize = 4;

/// The decoded dictionary page of a column chunk, borrowing the page body.
#[derive(Debug)]
pub(crate) enum ChunkDictionary<'a> {
    Fixed {
        data: &'a [u8],
        width: usize,
    },
    Binary {
        entries: Vec<&'a [u8]>,
        _reservation: Reservation,
    },
}

impl<'a> ChunkDictionary<'a> {
    /// Decode a dictionary page. Byte-array entry tables are reserved against `pool`.
    pub fn try_new(
        page: &PageInfo,
        body: &'a [u8],
        physical_type: PhysicalType,
        pool: &MemoryPool,
    ) -> StrataResult<Self> {
        if !matches!(page.encoding, Encoding::Plain | Encoding::PlainDictionary) {
            strata_bail!(
                NotImplemented: format!("{} dictionary pages", page.encoding),
                "strata-parquet"
            );
        }
        let len = page.num_values;
        match physical_type {
            PhysicalType::Boolean => {
                strata_bail!(NotImplemented: "boolean dictionaries", "strata-parquet")
            }
            PhysicalType::ByteArray => {
                if len > body.len() / LENGTH_PREFIX {
                    strata_bail!(
                        InvalidSerde: "dictionary of {len} byte arrays cannot fit in {} bytes",
                        body.len()
                    );
                }
                let reservation = pool.reserve(len * size_of::<&[u8]>())?;
                let mut entries = Vec::with_capacity(len);
                let mut rest = body;
                for idx in 0..len {
                    let Some((prefix, tail)) = rest.split_first_chunk::<LENGTH_PREFIX>() else {
                        strata_bail!(InvalidSerde: "dictionary ends before entry {idx} of {len}");
                    };
                    let entry_len = u32::from_le_bytes(*prefix) as usize;
                    if entry_len > tail.len() {
                        strata_bail!(InvalidSerde: "dictionary entry {idx} overruns the page");
                    }
                    let (entry, tail) = tail.split_at(entry_len);
                    entries.push(entry);
                    rest = tail;
                }
                Ok(Self::Binary {
                    entries,
                    _reservation: reservation,
                })
            }
            other => {
                let width = other.fixed_width().unwrap_or_default();
                let Some(needed) = len.checked_mul(width).filter(|n| *n <= body.len()) else {
                    strata_bail!(
                        InvalidSerde: "dictionary of {len} {other} values does not fit in {} bytes",
                        body.len()
                    );
                };
                Ok(Self::Fixed {
                    data: &body[..needed],
                    width,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Fixed { data, width } => data.len().checked_div(*width).unwrap_or_default(),
            Self::Binary { entries, .. } => entries.len(),
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&'a [u8]> {
        match self {
            Self::Fixed { data, width } => data.get(idx * width..(idx + 1) * width),
            Self::Binary { entries, .. } => entries.get(idx).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_error::ErrorKind;

    use super::*;
    use crate::PageKind;
    use crate::test_util::{plain_binary, plain_i32};

    fn pool() -> MemoryPool {
        MemoryPool::unbounded()
    }

    fn dict_page(num_values: usize) -> PageInfo {
        PageInfo {
            kind: PageKind::Dictionary,
            num_values,
            ..PageInfo::default()
        }
    }

    #[test]
    fn fixed_entries() {
        let body = plain_i32(&[10, 20, 30]);
        let dict = ChunkDictionary::try_new(&dict_page(3), &body, PhysicalType::Int32, &pool()).unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get(1), Some(20i32.to_le_bytes().as_slice()));
        assert_eq!(dict.get(3), None);
    }

    #[test]
    fn binary_entries() {
        let body = plain_binary(&[b"a", b"", b"xyz"]);
        let dict = ChunkDictionary::try_new(&dict_page(3), &body, PhysicalType::ByteArray, &pool()).unwrap();
        assert_eq!(dict.get(2), Some(b"xyz".as_slice()));
        assert_eq!(dict.get(1), Some(b"".as_slice()));
    }

    #[test]
    fn short_dictionary() {
        let body = plain_binary(&[b"a"]);
        let err =
            ChunkDictionary::try_new(&dict_page(2), &body, PhysicalType::ByteArray, &pool()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        let err = ChunkDictionary::try_new(&dict_page(2), &[0; 7], PhysicalType::Int32, &pool()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn boolean_dictionary_is_unsupported() {
        let err = ChunkDictionary::try_new(&dict_page(1), &[1], PhysicalType::Boolean, &pool()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn entry_count_is_bounded_by_the_page() {
        let huge = dict_page(i32::MAX as usize);
        let err =
            ChunkDictionary::try_new(&huge, &[1, 0, 0, 0], PhysicalType::ByteArray, &pool())
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        let err = ChunkDictionary::try_new(&dict_page(usize::MAX), &[0; 8], PhysicalType::Int64, &pool())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn binary_entries_are_reserved() {
        let pool = MemoryPool::with_limit(size_of::<&[u8]>() * 3);
        let body = plain_binary(&[b"a", b"b", b"c"]);
        let dict = ChunkDictionary::try_new(&dict_page(3), &body, PhysicalType::ByteArray, &pool)
            .unwrap();
        assert_eq!(pool.used(), size_of::<&[u8]>() * 3);
        let err = ChunkDictionary::try_new(&dict_page(3), &body, PhysicalType::ByteArray, &pool)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        drop(dict);
        assert_eq!(pool.used(), 0);
    }
}
