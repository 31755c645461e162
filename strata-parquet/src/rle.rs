//! The RLE / bit-packed hybrid encoding used by levels, dictionary indices and booleans.

use strata_error::{StrataResult, strata_bail, strata_err};

#[derive(Debug, Clone)]
enum Run<'a> {
    Empty,
    Repeat {
        value: u32,
        remaining: usize,
    },
    Packed {
        data: &'a [u8],
        index: usize,
        len: usize,
    },
}

/// Decodes a hybrid RLE stream of `bit_width` wide values.
#[derive(Debug, Clone)]
pub(crate) struct RleDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    bit_width: u8,
    run: Run<'a>,
}

impl<'a> RleDecoder<'a> {
    pub fn try_new(data: &'a [u8], bit_width: u8) -> StrataResult<Self> {
        if bit_width > 32 {
            strata_bail!(InvalidSerde: "rle bit width {bit_width} is wider than 32 bits");
        }
        Ok(Self {
            data,
            pos: 0,
            bit_width,
            run: Run::Empty,
        })
    }

    fn read_header(&mut self) -> StrataResult<u64> {
        let mut result = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self.data.get(self.pos).ok_or_else(|| {
                strata_err!(InvalidSerde: "rle stream ends in a run header at byte {}", self.pos)
            })?;
            self.pos += 1;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        strata_bail!(InvalidSerde: "rle run header longer than 10 bytes")
    }

    fn next_run(&mut self) -> StrataResult<()> {
        if self.pos >= self.data.len() {
            strata_bail!(
                InvalidSerde: "rle stream of {} bytes exhausted",
                self.data.len()
            );
        }
        let header = self.read_header()?;
        let count = usize::try_from(header >> 1)
            .map_err(|_| strata_err!(InvalidSerde: "rle run length overflows"))?;
        let width = usize::from(self.bit_width);
        if header & 1 == 1 {
            let groups = count;
            let len = groups.checked_mul(width).ok_or_else(|| {
                strata_err!(InvalidSerde: "bit-packed run length overflows")
            })?;
            // The final run may be cut short of its declared size.
            let available = len.min(self.data.len() - self.pos);
            let data = &self.data[self.pos..self.pos + available];
            self.pos += available;
            let values = if width == 0 {
                groups * 8
            } else {
                (available * 8 / width).min(groups * 8)
            };
            self.run = Run::Packed {
                data,
                index: 0,
                len: values,
            };
        } else {
            let byte_width = width.div_ceil(8);
            let end = self.pos + byte_width;
            let Some(bytes) = self.data.get(self.pos..end) else {
                strata_bail!(InvalidSerde: "rle stream ends in a repeated value");
            };
            let mut value = [0u8; 4];
            value[..byte_width].copy_from_slice(bytes);
            self.pos = end;
            self.run = Run::Repeat {
                value: u32::from_le_bytes(value),
                remaining: count,
            };
        }
        Ok(())
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn unpack(data: &[u8], index: usize, bit_width: u8) -> u32 {
        let width = usize::from(bit_width);
        let bit = index * width;
        let mut word = 0u64;
        for (k, byte) in data[bit / 8..].iter().take(5).enumerate() {
            word |= u64::from(*byte) << (8 * k);
        }
        let mask = (1u64 << width) - 1;
        ((word >> (bit % 8)) & mask) as u32
    }

    /// Decode the next value.
    #[inline]
    pub fn next_value(&mut self) -> StrataResult<u32> {
        if self.bit_width == 0 {
            return Ok(0);
        }
        loop {
            match &mut self.run {
                Run::Repeat { value, remaining } if *remaining > 0 => {
                    *remaining -= 1;
                    return Ok(*value);
                }
                Run::Packed { data, index, len } if *index < *len => {
                    let value = Self::unpack(data, *index, self.bit_width);
                    *index += 1;
                    return Ok(value);
                }
                _ => self.next_run()?,
            }
        }
    }

    /// Skip `n` values without decoding them.
    pub fn skip(&mut self, mut n: usize) -> StrataResult<()> {
        if self.bit_width == 0 {
            return Ok(());
        }
        while n > 0 {
            match &mut self.run {
                Run::Repeat { remaining, .. } if *remaining > 0 => {
                    let step = n.min(*remaining);
                    *remaining -= step;
                    n -= step;
                }
                Run::Packed { index, len, .. } if *index < *len => {
                    let step = n.min(*len - *index);
                    *index += step;
                    n -= step;
                }
                _ => self.next_run()?,
            }
        }
        Ok(())
    }
}

/// Bits needed to store values up to `max`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn bit_width(max: u32) -> u8 {
    (32 - max.leading_zeros()) as u8
}
