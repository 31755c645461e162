//! Splits a page body into its level streams and values.

use strata_error::{StrataResult, strata_bail};

use crate::page_header::PageInfo;
use crate::rle::{RleDecoder, bit_width};
use crate::{Encoding, PageKind};

/// Decodes one level stream, yielding zero for every entry when the column has no such levels.
#[derive(Debug, Clone)]
pub(crate) struct LevelDecoder<'a> {
    inner: Option<RleDecoder<'a>>,
    max: u16,
}

impl<'a> LevelDecoder<'a> {
    fn try_new(data: &'a [u8], max: u16) -> StrataResult<Self> {
        let inner = if max == 0 {
            None
        } else {
            Some(RleDecoder::try_new(data, bit_width(u32::from(max)))?)
        };
        Ok(Self { inner, max })
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_level(&mut self) -> StrataResult<u16> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let level = inner.next_value()?;
        if level > u32::from(self.max) {
            strata_bail!(InvalidSerde: "level {level} exceeds the maximum of {}", self.max);
        }
        Ok(level as u16)
    }
}

/// The level streams of a data page, followed by its encoded values.
#[derive(Debug, Clone)]
pub(crate) struct PageLevels<'a> {
    pub def: LevelDecoder<'a>,
    pub rep: LevelDecoder<'a>,
    pub values: &'a [u8],
}

impl PageLevels<'_> {
    /// The next (definition, repetition) pair.
    #[inline]
    pub fn next_pair(&mut self) -> StrataResult<(u16, u16)> {
        let rep = self.rep.next_level()?;
        let def = self.def.next_level()?;
        Ok((def, rep))
    }
}

/// Take one length-prefixed V1 level stream off the front of `body`.
fn take_v1<'a>(
    body: &mut &'a [u8],
    encoding: Encoding,
    max: u16,
    what: &str,
) -> StrataResult<&'a [u8]> {
    if max == 0 {
        return Ok(&[]);
    }
    match encoding {
        Encoding::Rle => {}
        Encoding::BitPacked => {
            strata_bail!(NotImplemented: format!("bit-packed {what} levels"), "strata-parquet")
        }
        other => strata_bail!(InvalidSerde: "{other} is not a level encoding"),
    }
    let Some((prefix, rest)) = body.split_first_chunk::<4>() else {
        strata_bail!(InvalidSerde: "page too short for the {what} level length");
    };
    let len = u32::from_le_bytes(*prefix) as usize;
    if len > rest.len() {
        strata_bail!(
            InvalidSerde: "{what} levels of {len} bytes overrun the page body of {}",
            rest.len()
        );
    }
    let (levels, values) = rest.split_at(len);
    *body = values;
    Ok(levels)
}

/// Locate the levels and values of a data page.
pub(crate) fn split_page<'a>(
    page: &PageInfo,
    body: &'a [u8],
    max_def: u16,
    max_rep: u16,
) -> StrataResult<PageLevels<'a>> {
    let (rep, def, values) = match page.kind {
        PageKind::DataV1 => {
            let mut rest = body;
            let rep = take_v1(&mut rest, page.rep_level_encoding, max_rep, "repetition")?;
            let def = take_v1(&mut rest, page.def_level_encoding, max_def, "definition")?;
            (rep, def, rest)
        }
        PageKind::DataV2 => {
            if page.levels_len() > body.len() {
                strata_bail!(InvalidSerde: "v2 levels overrun the page body");
            }
            let (rep, rest) = body.split_at(page.rep_levels_len);
            let (def, values) = rest.split_at(page.def_levels_len);
            (rep, def, values)
        }
        PageKind::Dictionary => {
            strata_bail!(AssertionFailed: "dictionary pages have no levels")
        }
    };
    Ok(PageLevels {
        def: LevelDecoder::try_new(def, max_def)?,
        rep: LevelDecoder::try_new(rep, max_rep)?,
        values,
    })
}
