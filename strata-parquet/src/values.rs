//! Decoders for the values section of a data page.

use strata_error::{StrataResult, strata_bail, strata_err};

use crate::dictionary::ChunkDictionary;
use crate::rle::RleDecoder;
use crate::{Encoding, PhysicalType};

const FALSE: &[u8] = &[0];
const TRUE: &[u8] = &[1];

/// Yields the encoded bytes of one value at a time.
///
/// Fixed-width values come back as their little-endian bytes, booleans as a single `0` or `1`
/// byte, and byte arrays as their contents.
#[derive(Debug, Clone)]
pub(crate) enum ValueDecoder<'a> {
    PlainFixed {
        data: &'a [u8],
        width: usize,
        pos: usize,
    },
    PlainBool {
        data: &'a [u8],
        index: usize,
    },
    RleBool(RleDecoder<'a>),
    PlainBinary {
        data: &'a [u8],
        pos: usize,
    },
    Dictionary {
        indices: RleDecoder<'a>,
        dictionary: &'a ChunkDictionary<'a>,
    },
}

impl<'a> ValueDecoder<'a> {
    pub fn try_new(
        encoding: Encoding,
        physical_type: PhysicalType,
        data: &'a [u8],
        dictionary: Option<&'a ChunkDictionary<'a>>,
    ) -> StrataResult<Self> {
        Ok(match (encoding, physical_type) {
            (e, _) if e.is_dictionary() => {
                let dictionary = dictionary.ok_or_else(|| {
                    strata_err!(InvalidSerde: "dictionary encoded page in a chunk without a dictionary")
                })?;
                let Some((width, indices)) = data.split_first() else {
                    strata_bail!(InvalidSerde: "dictionary encoded page has no index bit width");
                };
                Self::Dictionary {
                    indices: RleDecoder::try_new(indices, *width)?,
                    dictionary,
                }
            }
            (Encoding::Plain, PhysicalType::Boolean) => Self::PlainBool { data, index: 0 },
            (Encoding::Rle, PhysicalType::Boolean) => {
                let Some((prefix, rest)) = data.split_first_chunk::<4>() else {
                    strata_bail!(InvalidSerde: "rle boolean page too short for its length");
                };
                let len = (u32::from_le_bytes(*prefix) as usize).min(rest.len());
                Self::RleBool(RleDecoder::try_new(&rest[..len], 1)?)
            }
            (Encoding::Plain, PhysicalType::ByteArray) => Self::PlainBinary { data, pos: 0 },
            (Encoding::Plain, other) => Self::PlainFixed {
                data,
                width: other.fixed_width().unwrap_or_default(),
                pos: 0,
            },
            (encoding, physical_type) => strata_bail!(
                NotImplemented: format!("{encoding} encoded {physical_type} values"),
                "strata-parquet"
            ),
        })
    }

    /// The bytes of the next value.
    #[inline]
    pub fn next_value(&mut self) -> StrataResult<&'a [u8]> {
        match self {
            Self::PlainFixed { data, width, pos } => {
                let data: &'a [u8] = *data;
                let end = *pos + *width;
                let Some(value) = data.get(*pos..end) else {
                    strata_bail!(InvalidSerde: "plain values end at byte {}", data.len());
                };
                *pos = end;
                Ok(value)
            }
            Self::PlainBool { data, index } => {
                let Some(byte) = data.get(*index / 8) else {
                    strata_bail!(InvalidSerde: "plain booleans end after {} values", data.len() * 8);
                };
                let bit = byte >> (*index % 8) & 1;
                *index += 1;
                Ok(if bit == 1 { TRUE } else { FALSE })
            }
            Self::RleBool(decoder) => Ok(if decoder.next_value()? == 1 { TRUE } else { FALSE }),
            Self::PlainBinary { data, pos } => {
                let data: &'a [u8] = *data;
                let Some(prefix) = data.get(*pos..*pos + 4) else {
                    strata_bail!(InvalidSerde: "byte array length overruns the page at byte {pos}");
                };
                let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
                let start = *pos + 4;
                let Some(value) = data.get(start..start + len) else {
                    strata_bail!(
                        InvalidSerde: "byte array of {len} bytes overruns the page at byte {start}"
                    );
                };
                *pos = start + len;
                Ok(value)
            }
            Self::Dictionary {
                indices,
                dictionary,
            } => {
                let idx = indices.next_value()? as usize;
                dictionary.get(idx).ok_or_else(|| {
                    strata_err!(
                        InvalidSerde: "dictionary index {idx} out of range for {} entries",
                        dictionary.len()
                    )
                })
            }
        }
    }

    /// Skip `n` values.
    pub fn skip(&mut self, n: usize) -> StrataResult<()> {
        match self {
            Self::PlainFixed { width, pos, .. } => {
                *pos += n * *width;
                Ok(())
            }
            Self::PlainBool { index, .. } => {
                *index += n;
                Ok(())
            }
            Self::RleBool(decoder) => decoder.skip(n),
            Self::Dictionary { indices, .. } => indices.skip(n),
            Self::PlainBinary { .. } => {
                for _ in 0..n {
                    self.next_value()?;
                }
                Ok(())
            }
        }
    }
}
