//! A minimal reader for the Thrift compact protocol, enough to walk page headers.

use strata_error::{StrataResult, strata_bail, strata_err};

pub(crate) const STOP: u8 = 0;
pub(crate) const BOOL_TRUE: u8 = 1;
pub(crate) const BOOL_FALSE: u8 = 2;
pub(crate) const BYTE: u8 = 3;
pub(crate) const I16: u8 = 4;
pub(crate) const I32: u8 = 5;
pub(crate) const I64: u8 = 6;
pub(crate) const DOUBLE: u8 = 7;
pub(crate) const BINARY: u8 = 8;
pub(crate) const LIST: u8 = 9;
pub(crate) const SET: u8 = 10;
pub(crate) const MAP: u8 = 11;
pub(crate) const STRUCT: u8 = 12;

/// Nested structs deeper than this are treated as corrupt.
const MAX_DEPTH: usize = 32;

/// A field header: its id and wire type. Boolean fields carry their value in the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldHeader {
    pub id: i16,
    pub field_type: u8,
}

/// Cursor over a compact-protocol encoded buffer.
pub(crate) struct CompactReader<'a> {
    data: &'a [u8],
    pos: usize,
    last_field_ids: Vec<i16>,
}

impl<'a> CompactReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            last_field_ids: Vec::with_capacity(4),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn read_byte(&mut self) -> StrataResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| strata_err!(InvalidSerde: "truncated thrift data at byte {}", self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> StrataResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                strata_err!(
                    InvalidSerde: "truncated thrift data, {} bytes wanted at byte {} of {}",
                    len,
                    self.pos,
                    self.data.len()
                )
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_varint(&mut self) -> StrataResult<u64> {
        let mut result = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read_byte()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        strata_bail!(InvalidSerde: "varint longer than 10 bytes at byte {}", self.pos)
    }

    pub fn read_i64(&mut self) -> StrataResult<i64> {
        let v = self.read_varint()?;
        Ok(((v >> 1) as i64) ^ -((v & 1) as i64))
    }

    pub fn read_i32(&mut self) -> StrataResult<i32> {
        let v = self.read_i64()?;
        i32::try_from(v).map_err(|_| strata_err!(InvalidSerde: "i32 field out of range: {v}"))
    }

    fn read_i16(&mut self) -> StrataResult<i16> {
        let v = self.read_i64()?;
        i16::try_from(v).map_err(|_| strata_err!(InvalidSerde: "i16 field out of range: {v}"))
    }

    pub fn read_binary(&mut self) -> StrataResult<&'a [u8]> {
        let len = usize::try_from(self.read_varint()?)
            .map_err(|_| strata_err!(InvalidSerde: "binary length overflows"))?;
        self.read_bytes(len)
    }

    pub fn struct_begin(&mut self) -> StrataResult<()> {
        if self.last_field_ids.len() >= MAX_DEPTH {
            strata_bail!(InvalidSerde: "thrift structs nested deeper than {MAX_DEPTH}");
        }
        self.last_field_ids.push(0);
        Ok(())
    }

    pub fn struct_end(&mut self) {
        self.last_field_ids.pop();
    }

    /// Read the next field header, or `None` at the end of the current struct.
    pub fn read_field_header(&mut self) -> StrataResult<Option<FieldHeader>> {
        let byte = self.read_byte()?;
        let field_type = byte & 0x0f;
        if field_type == STOP {
            return Ok(None);
        }
        let delta = i16::from(byte >> 4);
        let last = *self.last_field_ids.last().ok_or_else(|| {
            strata_err!(AssertionFailed: "field header read outside of a struct")
        })?;
        let id = if delta == 0 {
            self.read_i16()?
        } else {
            last.checked_add(delta)
                .ok_or_else(|| strata_err!(InvalidSerde: "thrift field id overflows"))?
        };
        if let Some(last) = self.last_field_ids.last_mut() {
            *last = id;
        }
        if field_type > STRUCT {
            strata_bail!(InvalidSerde: "invalid thrift field type {field_type} for field {id}");
        }
        Ok(Some(FieldHeader { id, field_type }))
    }

    /// Decode a boolean struct field, whose value is part of its header.
    pub fn field_bool(&self, header: FieldHeader) -> StrataResult<bool> {
        match header.field_type {
            BOOL_TRUE => Ok(true),
            BOOL_FALSE => Ok(false),
            other => strata_bail!(InvalidSerde: "field {} is not a bool, type {other}", header.id),
        }
    }

    fn read_list_header(&mut self) -> StrataResult<(u8, usize)> {
        let byte = self.read_byte()?;
        let elem_type = byte & 0x0f;
        let short_len = usize::from(byte >> 4);
        let len = if short_len == 15 {
            usize::try_from(self.read_varint()?)
                .map_err(|_| strata_err!(InvalidSerde: "list length overflows"))?
        } else {
            short_len
        };
        Ok((elem_type, len))
    }

    /// Skip a value of `field_type`, including nested containers.
    pub fn skip(&mut self, field_type: u8) -> StrataResult<()> {
        self.skip_value(field_type, 0)
    }

    fn skip_value(&mut self, field_type: u8, depth: usize) -> StrataResult<()> {
        if depth > MAX_DEPTH {
            strata_bail!(InvalidSerde: "thrift value nested deeper than {MAX_DEPTH}");
        }
        match field_type {
            // A struct field's boolean lives in its header.
            BOOL_TRUE | BOOL_FALSE => {}
            BYTE => {
                self.read_byte()?;
            }
            I16 | I32 | I64 => {
                self.read_varint()?;
            }
            DOUBLE => {
                self.read_bytes(8)?;
            }
            BINARY => {
                self.read_binary()?;
            }
            LIST | SET => {
                let (elem_type, len) = self.read_list_header()?;
                for _ in 0..len {
                    if elem_type == BOOL_TRUE || elem_type == BOOL_FALSE {
                        // List elements encode booleans as one byte each.
                        self.read_byte()?;
                    } else {
                        self.skip_value(elem_type, depth + 1)?;
                    }
                }
            }
            MAP => {
                let len = usize::try_from(self.read_varint()?)
                    .map_err(|_| strata_err!(InvalidSerde: "map length overflows"))?;
                if len > 0 {
                    let types = self.read_byte()?;
                    let (key_type, value_type) = (types >> 4, types & 0x0f);
                    for _ in 0..len {
                        self.skip_map_element(key_type, depth)?;
                        self.skip_map_element(value_type, depth)?;
                    }
                }
            }
            STRUCT => {
                self.struct_begin()?;
                while let Some(header) = self.read_field_header()? {
                    self.skip_value(header.field_type, depth + 1)?;
                }
                self.struct_end();
            }
            other => strata_bail!(InvalidSerde: "cannot skip thrift type {other}"),
        }
        Ok(())
    }

    fn skip_map_element(&mut self, element_type: u8, depth: usize) -> StrataResult<()> {
        if element_type == BOOL_TRUE || element_type == BOOL_FALSE {
            self.read_byte()?;
            Ok(())
        } else {
            self.skip_value(element_type, depth + 1)
        }
    }
}
