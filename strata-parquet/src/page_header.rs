//! Walks the page headers of every column chunk.
//!
//! Headers are decoded in two passes. The first skims each chunk and counts its pages so the page
//! table can be allocated once with its exact size. The second decodes every header in full and
//! fills that table, with each chunk writing only its own disjoint slice.

use std::ops::Range;

use rayon::prelude::*;
use strata_buffer::ByteBuffer;
use strata_error::{ContextExt, StrataResult, strata_bail, strata_err};

use crate::chunk::ColumnChunkDescriptor;
use crate::thrift::{CompactReader, FieldHeader, I32, STRUCT};
use crate::{Encoding, PageKind};

const DATA_PAGE: i32 = 0;
const INDEX_PAGE: i32 = 1;
const DICTIONARY_PAGE: i32 = 2;
const DATA_PAGE_V2: i32 = 3;

/// Where the decodable bytes of a page live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PageData {
    #[default]
    Unset,
    /// The page bytes are used in place, at this range of its chunk's buffer.
    Chunk(Range<usize>),
    /// The page was decompressed into this range of the decompression arena.
    Arena(Range<usize>),
}

/// Everything known about one page, filled in stage by stage.
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    /// Index of the page's chunk in the read plan.
    pub chunk: usize,
    pub kind: PageKind,
    pub encoding: Encoding,
    pub def_level_encoding: Encoding,
    pub rep_level_encoding: Encoding,
    /// Level entries in the page.
    pub num_values: usize,
    /// Rows starting in the page. Zero for dictionary pages.
    pub num_rows: usize,
    /// Row of the page's first row, relative to the start of its chunk.
    pub chunk_row: usize,
    /// Offset of the page header within the chunk.
    pub header_offset: usize,
    pub header_len: usize,
    pub compressed_len: usize,
    pub uncompressed_len: usize,
    /// V2 pages store their levels uncompressed ahead of the values.
    pub def_levels_len: usize,
    pub rep_levels_len: usize,
    pub is_compressed: bool,
    pub data: PageData,
}

impl PageInfo {
    /// Offset of the page body within the chunk.
    pub fn data_offset(&self) -> usize {
        self.header_offset + self.header_len
    }

    /// Bytes of the body as stored in the chunk.
    pub fn chunk_range(&self) -> Range<usize> {
        self.data_offset()..self.data_offset() + self.compressed_len
    }

    /// Length of the uncompressed level prefix of a V2 page.
    pub fn levels_len(&self) -> usize {
        self.def_levels_len + self.rep_levels_len
    }

    pub fn is_dictionary(&self) -> bool {
        self.kind == PageKind::Dictionary
    }

    /// The decodable body of the page, from its chunk's bytes or the decompression arena.
    pub fn body<'a>(&self, chunk: &'a [u8], arena: &'a [u8]) -> StrataResult<&'a [u8]> {
        match &self.data {
            PageData::Chunk(range) => Ok(&chunk[range.clone()]),
            PageData::Arena(range) => Ok(&arena[range.clone()]),
            PageData::Unset => {
                strata_bail!(AssertionFailed: "page of chunk {} was not decompressed", self.chunk)
            }
        }
    }
}

/// The page table of a read, in chunk order.
#[derive(Debug, Clone, Default)]
pub struct PageTable {
    pub pages: Vec<PageInfo>,
    /// The pages of each chunk, including its dictionary page.
    pub chunk_pages: Vec<Range<usize>>,
    /// The dictionary page of each chunk, if it has one.
    pub dictionaries: Vec<Option<usize>>,
}

impl PageTable {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Indices of the data pages of `chunk`.
    pub fn data_pages(&self, chunk: usize) -> Range<usize> {
        let range = self.chunk_pages[chunk].clone();
        match self.dictionaries[chunk] {
            Some(dict) if dict == range.start => range.start + 1..range.end,
            _ => range,
        }
    }
}

/// Resolves page bodies against the fetched chunks and the decompression arena.
#[derive(Debug, Clone, Copy)]
pub struct PageBodies<'a> {
    pub buffers: &'a [ByteBuffer],
    pub arena: &'a [u8],
}

impl<'a> PageBodies<'a> {
    pub fn body(&self, page: &PageInfo) -> StrataResult<&'a [u8]> {
        page.body(self.buffers[page.chunk].as_slice(), self.arena)
    }
}

#[derive(Debug, Default)]
struct RawHeader {
    page_type: i32,
    uncompressed_len: i32,
    compressed_len: i32,
    v1: Option<RawDataV1>,
    v2: Option<RawDataV2>,
    dictionary: Option<RawDictionary>,
    header_len: usize,
}

#[derive(Debug, Default)]
struct RawDataV1 {
    num_values: i32,
    encoding: i32,
    def_encoding: i32,
    rep_encoding: i32,
}

#[derive(Debug)]
struct RawDataV2 {
    num_values: i32,
    num_rows: i32,
    encoding: i32,
    def_len: i32,
    rep_len: i32,
    is_compressed: bool,
}

impl Default for RawDataV2 {
    fn default() -> Self {
        Self {
            num_values: 0,
            num_rows: 0,
            encoding: 0,
            def_len: 0,
            rep_len: 0,
            is_compressed: true,
        }
    }
}

#[derive(Debug, Default)]
struct RawDictionary {
    num_values: i32,
    encoding: i32,
}

fn read_i32_field(r: &mut CompactReader<'_>, h: FieldHeader) -> StrataResult<i32> {
    if h.field_type != I32 {
        strata_bail!(InvalidSerde: "field {} should be an i32, found type {}", h.id, h.field_type);
    }
    r.read_i32()
}

fn expect_struct(h: FieldHeader) -> StrataResult<()> {
    if h.field_type != STRUCT {
        strata_bail!(InvalidSerde: "field {} should be a struct, found type {}", h.id, h.field_type);
    }
    Ok(())
}

/// Decode one `PageHeader`. With `full` unset, the nested page-kind headers are skipped.
fn read_header(data: &[u8], full: bool) -> StrataResult<RawHeader> {
    let mut r = CompactReader::new(data);
    let mut header = RawHeader::default();
    let mut seen_type = false;
    r.struct_begin()?;
    while let Some(h) = r.read_field_header()? {
        match h.id {
            1 => {
                header.page_type = read_i32_field(&mut r, h)?;
                seen_type = true;
            }
            2 => header.uncompressed_len = read_i32_field(&mut r, h)?,
            3 => header.compressed_len = read_i32_field(&mut r, h)?,
            5 if full => {
                expect_struct(h)?;
                header.v1 = Some(read_data_v1(&mut r)?);
            }
            7 if full => {
                expect_struct(h)?;
                header.dictionary = Some(read_dictionary(&mut r)?);
            }
            8 if full => {
                expect_struct(h)?;
                header.v2 = Some(read_data_v2(&mut r)?);
            }
            _ => r.skip(h.field_type)?,
        }
    }
    r.struct_end();
    if !seen_type {
        strata_bail!(InvalidSerde: "page header has no page type");
    }
    if header.compressed_len < 0 || header.uncompressed_len < 0 {
        strata_bail!(
            InvalidSerde: "page header has negative sizes: {} compressed, {} uncompressed",
            header.compressed_len,
            header.uncompressed_len
        );
    }
    header.header_len = r.position();
    Ok(header)
}

fn read_data_v1(r: &mut CompactReader<'_>) -> StrataResult<RawDataV1> {
    let mut v1 = RawDataV1::default();
    r.struct_begin()?;
    while let Some(h) = r.read_field_header()? {
        match h.id {
            1 => v1.num_values = read_i32_field(r, h)?,
            2 => v1.encoding = read_i32_field(r, h)?,
            3 => v1.def_encoding = read_i32_field(r, h)?,
            4 => v1.rep_encoding = read_i32_field(r, h)?,
            _ => r.skip(h.field_type)?,
        }
    }
    r.struct_end();
    Ok(v1)
}

fn read_data_v2(r: &mut CompactReader<'_>) -> StrataResult<RawDataV2> {
    let mut v2 = RawDataV2::default();
    r.struct_begin()?;
    while let Some(h) = r.read_field_header()? {
        match h.id {
            1 => v2.num_values = read_i32_field(r, h)?,
            3 => v2.num_rows = read_i32_field(r, h)?,
            4 => v2.encoding = read_i32_field(r, h)?,
            5 => v2.def_len = read_i32_field(r, h)?,
            6 => v2.rep_len = read_i32_field(r, h)?,
            7 => v2.is_compressed = r.field_bool(h)?,
            _ => r.skip(h.field_type)?,
        }
    }
    r.struct_end();
    Ok(v2)
}

fn read_dictionary(r: &mut CompactReader<'_>) -> StrataResult<RawDictionary> {
    let mut dict = RawDictionary::default();
    r.struct_begin()?;
    while let Some(h) = r.read_field_header()? {
        match h.id {
            1 => dict.num_values = read_i32_field(r, h)?,
            2 => dict.encoding = read_i32_field(r, h)?,
            _ => r.skip(h.field_type)?,
        }
    }
    r.struct_end();
    Ok(dict)
}

fn non_negative(v: i32, what: &str) -> StrataResult<usize> {
    usize::try_from(v).map_err(|_| strata_err!(InvalidSerde: "negative {what}: {v}"))
}

/// Offset just past the body of a page starting at `offset`.
fn page_end(data: &[u8], offset: usize, header: &RawHeader) -> StrataResult<usize> {
    let end = offset + header.header_len + non_negative(header.compressed_len, "page size")?;
    if end > data.len() {
        strata_bail!(
            InvalidSerde: "page at byte {offset} ends at {end}, past the chunk end {}",
            data.len()
        );
    }
    Ok(end)
}

fn count_chunk(data: &[u8]) -> StrataResult<usize> {
    let mut offset = 0;
    let mut count = 0;
    while offset < data.len() {
        let header = read_header(&data[offset..], false)?;
        match header.page_type {
            DATA_PAGE | DICTIONARY_PAGE | DATA_PAGE_V2 => count += 1,
            INDEX_PAGE => {}
            other => strata_bail!(InvalidSerde: "unknown page type {other} at byte {offset}"),
        }
        offset = page_end(data, offset, &header)?;
    }
    Ok(count)
}

/// First pass: the number of dictionary and data pages in each chunk.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn count_page_headers(
    chunks: &[ColumnChunkDescriptor],
    buffers: &[ByteBuffer],
) -> StrataResult<Vec<usize>> {
    chunks
        .par_iter()
        .zip(buffers.par_iter())
        .enumerate()
        .map(|(idx, (chunk, buffer))| {
            count_chunk(buffer.as_slice()).with_context(|| {
                format!(
                    "column chunk {idx} (source {}, row group {}, column {})",
                    chunk.source, chunk.row_group, chunk.leaf
                )
            })
        })
        .collect()
}

fn encoding(v: i32) -> StrataResult<Encoding> {
    Encoding::try_from_thrift(v)
}

fn decode_chunk(
    chunk_idx: usize,
    chunk: &ColumnChunkDescriptor,
    data: &[u8],
    pages: &mut [PageInfo],
) -> StrataResult<Option<usize>> {
    let mut offset = 0;
    let mut page_idx = 0;
    let mut dictionary = None;
    let mut values_seen = 0u64;
    let mut rows_seen = 0usize;

    while offset < data.len() {
        let header = read_header(&data[offset..], true)?;
        let end = page_end(data, offset, &header)?;
        if header.page_type == INDEX_PAGE {
            offset = end;
            continue;
        }
        let Some(page) = pages.get_mut(page_idx) else {
            strata_bail!(AssertionFailed: "chunk has more pages than were counted");
        };
        *page = PageInfo {
            chunk: chunk_idx,
            header_offset: offset,
            header_len: header.header_len,
            compressed_len: non_negative(header.compressed_len, "compressed size")?,
            uncompressed_len: non_negative(header.uncompressed_len, "uncompressed size")?,
            is_compressed: true,
            ..PageInfo::default()
        };

        match header.page_type {
            DICTIONARY_PAGE => {
                let dict = header.dictionary.ok_or_else(|| {
                    strata_err!(InvalidSerde: "dictionary page without a dictionary header")
                })?;
                if page_idx != 0 {
                    strata_bail!(
                        InvalidSerde: "dictionary page at position {page_idx}, it must come first"
                    );
                }
                page.kind = PageKind::Dictionary;
                page.encoding = encoding(dict.encoding)?;
                page.num_values = non_negative(dict.num_values, "dictionary size")?;
                dictionary = Some(page_idx);
            }
            DATA_PAGE => {
                let v1 = header.v1.ok_or_else(|| {
                    strata_err!(InvalidSerde: "data page without a data page header")
                })?;
                page.kind = PageKind::DataV1;
                page.encoding = encoding(v1.encoding)?;
                page.def_level_encoding = encoding(v1.def_encoding)?;
                page.rep_level_encoding = encoding(v1.rep_encoding)?;
                page.num_values = non_negative(v1.num_values, "value count")?;
                // Row counts of list pages are only known once their levels are decoded.
                page.num_rows = if chunk.max_rep == 0 {
                    page.num_values
                } else {
                    0
                };
            }
            DATA_PAGE_V2 => {
                let v2 = header.v2.ok_or_else(|| {
                    strata_err!(InvalidSerde: "v2 data page without a v2 header")
                })?;
                page.kind = PageKind::DataV2;
                page.encoding = encoding(v2.encoding)?;
                page.def_level_encoding = Encoding::Rle;
                page.rep_level_encoding = Encoding::Rle;
                page.num_values = non_negative(v2.num_values, "value count")?;
                page.num_rows = non_negative(v2.num_rows, "row count")?;
                page.def_levels_len = non_negative(v2.def_len, "definition levels size")?;
                page.rep_levels_len = non_negative(v2.rep_len, "repetition levels size")?;
                page.is_compressed = v2.is_compressed;
                if page.levels_len() > page.compressed_len
                    || page.levels_len() > page.uncompressed_len
                {
                    strata_bail!(
                        InvalidSerde: "v2 page levels of {} bytes exceed the page size",
                        page.levels_len()
                    );
                }
            }
            other => strata_bail!(InvalidSerde: "unknown page type {other} at byte {offset}"),
        }

        if page.kind.is_data() {
            page.chunk_row = rows_seen;
            rows_seen += page.num_rows;
            values_seen += page.num_values as u64;
        }
        page_idx += 1;
        offset = end;
    }

    if page_idx != pages.len() {
        strata_bail!(
            AssertionFailed: "decoded {page_idx} pages, {} were counted",
            pages.len()
        );
    }
    if values_seen != chunk.num_values {
        strata_bail!(
            InvalidSerde: "pages hold {values_seen} values, the chunk declares {}",
            chunk.num_values
        );
    }
    if chunk.max_rep == 0 && rows_seen != chunk.num_rows {
        strata_bail!(
            InvalidSerde: "pages hold {rows_seen} rows, the row group declares {}",
            chunk.num_rows
        );
    }
    Ok(dictionary)
}

/// Second pass: decode every header into a page table sized from `counts`.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn decode_page_headers(
    chunks: &[ColumnChunkDescriptor],
    buffers: &[ByteBuffer],
    counts: &[usize],
) -> StrataResult<PageTable> {
    let total = counts.iter().sum();
    let mut pages = vec![PageInfo::default(); total];

    let mut chunk_pages = Vec::with_capacity(counts.len());
    let mut slices = Vec::with_capacity(counts.len());
    let mut rest = pages.as_mut_slice();
    let mut start = 0;
    for count in counts {
        let (head, tail) = rest.split_at_mut(*count);
        slices.push(head);
        rest = tail;
        chunk_pages.push(start..start + count);
        start += count;
    }

    let dictionaries = slices
        .into_par_iter()
        .zip(chunks.par_iter().zip(buffers.par_iter()))
        .enumerate()
        .map(|(idx, (pages, (chunk, buffer)))| {
            decode_chunk(idx, chunk, buffer.as_slice(), pages).with_context(|| {
                format!(
                    "column chunk {idx} (source {}, row group {}, column {})",
                    chunk.source, chunk.row_group, chunk.leaf
                )
            })
        })
        .collect::<StrataResult<Vec<_>>>()?;

    let dictionaries = dictionaries
        .into_iter()
        .zip(&chunk_pages)
        .map(|(dict, range)| dict.map(|d| range.start + d))
        .collect();

    log::debug!("decoded {total} page headers in {} chunks", chunks.len());
    Ok(PageTable {
        pages,
        chunk_pages,
        dictionaries,
    })
}
