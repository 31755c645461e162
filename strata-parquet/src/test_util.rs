//! Encoders for building page bytes by hand in unit tests.
#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

use crate::thrift::{BINARY, BOOL_FALSE, BOOL_TRUE, I32, I64, LIST, STOP, STRUCT};

#[derive(Default)]
pub(crate) struct ThriftWriter {
    buf: Vec<u8>,
    last_ids: Vec<i16>,
}

impl ThriftWriter {
    fn varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    fn zigzag(&mut self, v: i64) {
        self.varint(((v << 1) ^ (v >> 63)) as u64);
    }

    fn field_header(&mut self, id: i16, field_type: u8) {
        let last = self.last_ids.last_mut().unwrap();
        let delta = id - *last;
        if (1..=15).contains(&delta) {
            self.buf.push(((delta as u8) << 4) | field_type);
        } else {
            self.buf.push(field_type);
            self.zigzag(i64::from(id));
        }
        *self.last_ids.last_mut().unwrap() = id;
    }

    pub fn struct_begin(&mut self) {
        self.last_ids.push(0);
    }

    pub fn struct_field_begin(&mut self, id: i16) {
        self.field_header(id, STRUCT);
        self.struct_begin();
    }

    pub fn struct_end(&mut self) {
        self.buf.push(STOP);
        self.last_ids.pop();
    }

    pub fn field_i32(&mut self, id: i16, v: i32) {
        self.field_header(id, I32);
        self.zigzag(i64::from(v));
    }

    pub fn field_i64(&mut self, id: i16, v: i64) {
        self.field_header(id, I64);
        self.zigzag(v);
    }

    pub fn field_binary(&mut self, id: i16, v: &[u8]) {
        self.field_header(id, BINARY);
        self.varint(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    pub fn field_bool(&mut self, id: i16, v: bool) {
        self.field_header(id, if v { BOOL_TRUE } else { BOOL_FALSE });
    }

    pub fn field_list_i32(&mut self, id: i16, values: &[i32]) {
        self.field_header(id, LIST);
        if values.len() < 15 {
            self.buf.push(((values.len() as u8) << 4) | I32);
        } else {
            self.buf.push(0xf0 | I32);
            self.varint(values.len() as u64);
        }
        for v in values {
            self.zigzag(i64::from(*v));
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Header fields of a hand-built page.
#[derive(Debug, Clone)]
pub(crate) enum TestHeader {
    Dictionary {
        num_values: i32,
    },
    DataV1 {
        num_values: i32,
        encoding: i32,
    },
    DataV2 {
        num_values: i32,
        num_nulls: i32,
        num_rows: i32,
        encoding: i32,
        def_len: i32,
        rep_len: i32,
        is_compressed: Option<bool>,
    },
}

/// Thrift encoding constants of the encodings used by tests.
pub(crate) const PLAIN: i32 = 0;
pub(crate) const RLE: i32 = 3;
pub(crate) const RLE_DICTIONARY: i32 = 8;

/// Encode a page header followed by the page body.
pub(crate) fn page(header: TestHeader, uncompressed_len: usize, body: &[u8]) -> Vec<u8> {
    let mut w = ThriftWriter::default();
    w.struct_begin();
    let page_type = match header {
        TestHeader::Dictionary { .. } => 2,
        TestHeader::DataV1 { .. } => 0,
        TestHeader::DataV2 { .. } => 3,
    };
    w.field_i32(1, page_type);
    w.field_i32(2, uncompressed_len as i32);
    w.field_i32(3, body.len() as i32);
    match header {
        TestHeader::DataV1 {
            num_values,
            encoding,
        } => {
            w.struct_field_begin(5);
            w.field_i32(1, num_values);
            w.field_i32(2, encoding);
            w.field_i32(3, RLE);
            w.field_i32(4, RLE);
            w.struct_end();
        }
        TestHeader::Dictionary { num_values } => {
            w.struct_field_begin(7);
            w.field_i32(1, num_values);
            w.field_i32(2, PLAIN);
            w.struct_end();
        }
        TestHeader::DataV2 {
            num_values,
            num_nulls,
            num_rows,
            encoding,
            def_len,
            rep_len,
            is_compressed,
        } => {
            w.struct_field_begin(8);
            w.field_i32(1, num_values);
            w.field_i32(2, num_nulls);
            w.field_i32(3, num_rows);
            w.field_i32(4, encoding);
            w.field_i32(5, def_len);
            w.field_i32(6, rep_len);
            if let Some(is_compressed) = is_compressed {
                w.field_bool(7, is_compressed);
            }
            w.struct_end();
        }
    }
    w.struct_end();
    let mut bytes = w.finish();
    bytes.extend_from_slice(body);
    bytes
}

/// An uncompressed V1 data page of `num_values` entries.
pub(crate) fn data_page_v1(num_values: i32, encoding: i32, body: &[u8]) -> Vec<u8> {
    page(
        TestHeader::DataV1 {
            num_values,
            encoding,
        },
        body.len(),
        body,
    )
}

/// Encode `values` as a sequence of RLE runs, one per run of equal values.
pub(crate) fn rle_runs(values: &[u32], bit_width: u8) -> Vec<u8> {
    let byte_width = usize::from(bit_width).div_ceil(8);
    let mut out = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let v = values[i];
        let run = values[i..].iter().take_while(|x| **x == v).count();
        let mut header = (run as u64) << 1;
        while header >= 0x80 {
            out.push((header as u8) | 0x80);
            header >>= 7;
        }
        out.push(header as u8);
        out.extend_from_slice(&v.to_le_bytes()[..byte_width]);
        i += run;
    }
    out
}

/// Encode `values` as a single bit-packed run, padded to a multiple of eight values.
pub(crate) fn bit_packed_run(values: &[u32], bit_width: u8) -> Vec<u8> {
    let groups = values.len().div_ceil(8);
    let mut out = Vec::new();
    let mut header = ((groups as u64) << 1) | 1;
    while header >= 0x80 {
        out.push((header as u8) | 0x80);
        header >>= 7;
    }
    out.push(header as u8);
    let mut packed = vec![0u8; groups * usize::from(bit_width)];
    for (idx, v) in values.iter().enumerate() {
        for bit in 0..usize::from(bit_width) {
            if v >> bit & 1 == 1 {
                let pos = idx * usize::from(bit_width) + bit;
                packed[pos / 8] |= 1 << (pos % 8);
            }
        }
    }
    out.extend_from_slice(&packed);
    out
}

/// Levels of a V1 page: a little-endian length prefix followed by RLE runs.
pub(crate) fn v1_levels(levels: &[u32], bit_width: u8) -> Vec<u8> {
    let runs = rle_runs(levels, bit_width);
    let mut out = (runs.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&runs);
    out
}

/// Plain encoding of fixed-width little-endian values.
pub(crate) fn plain_i32(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Plain encoding of byte arrays.
pub(crate) fn plain_binary(values: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
        out.extend_from_slice(v);
    }
    out
}

/// Dictionary indices: the bit width byte followed by RLE runs.
pub(crate) fn dictionary_indices(indices: &[u32], bit_width: u8) -> Vec<u8> {
    let mut out = vec![bit_width];
    out.extend_from_slice(&rle_runs(indices, bit_width));
    out
}
