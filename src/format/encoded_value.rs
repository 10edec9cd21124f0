//! The `encoded_value` grammar.
//!
//! Values are kept as their raw bytes. [`transcode_value`] and [`transcode_array`]
//! walk the grammar once, copying primitives and passing every embedded index through
//! a caller-supplied renumbering function.

use crate::error::{malformed, Error, Result};
use crate::format::leb128;
use crate::format::section::SectionReader;
use crate::index_map::IndexKind;

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_METHOD_TYPE: u8 = 0x15;
const VALUE_METHOD_HANDLE: u8 = 0x16;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

/// Raw bytes of one `encoded_value` or one `encoded_array`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EncodedValue(pub Vec<u8>);

impl EncodedValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Copies one `encoded_value` from `input` to `out`, renumbering its indices.
pub fn transcode_value<F>(input: &mut SectionReader<'_>, out: &mut Vec<u8>, renumber: &mut F) -> Result<()>
where
    F: FnMut(IndexKind, u32) -> Result<u32>,
{
    let arg_and_type = input.read_u8()?;
    let value_type = arg_and_type & 0x1f;
    let arg = arg_and_type >> 5;
    match value_type {
        VALUE_BYTE | VALUE_SHORT | VALUE_CHAR | VALUE_INT | VALUE_LONG | VALUE_FLOAT
        | VALUE_DOUBLE => {
            out.push(arg_and_type);
            out.extend_from_slice(input.read_bytes(arg as usize + 1)?);
        }
        VALUE_METHOD_TYPE => {
            let index = read_index(input, arg)?;
            write_index(out, value_type, renumber(IndexKind::Proto, index)?);
        }
        VALUE_STRING => {
            let index = read_index(input, arg)?;
            write_index(out, value_type, renumber(IndexKind::String, index)?);
        }
        VALUE_TYPE => {
            let index = read_index(input, arg)?;
            write_index(out, value_type, renumber(IndexKind::Type, index)?);
        }
        VALUE_FIELD | VALUE_ENUM => {
            let index = read_index(input, arg)?;
            write_index(out, value_type, renumber(IndexKind::Field, index)?);
        }
        VALUE_METHOD => {
            let index = read_index(input, arg)?;
            write_index(out, value_type, renumber(IndexKind::Method, index)?);
        }
        VALUE_ARRAY => {
            out.push(arg_and_type);
            transcode_array(input, out, renumber)?;
        }
        VALUE_ANNOTATION => {
            out.push(arg_and_type);
            transcode_annotation(input, out, renumber)?;
        }
        VALUE_NULL | VALUE_BOOLEAN => out.push(arg_and_type),
        VALUE_METHOD_HANDLE => {
            return Err(Error::Unsupported {
                what: "method handle encoded values".to_string(),
            })
        }
        other => return Err(malformed!("unknown encoded value type 0x{:02x}", other)),
    }
    Ok(())
}

/// Copies one `encoded_array` (size followed by values).
pub fn transcode_array<F>(input: &mut SectionReader<'_>, out: &mut Vec<u8>, renumber: &mut F) -> Result<()>
where
    F: FnMut(IndexKind, u32) -> Result<u32>,
{
    let size = input.read_uleb128()?;
    leb128::write_unsigned(out, size);
    for _ in 0..size {
        transcode_value(input, out, renumber)?;
    }
    Ok(())
}

fn transcode_annotation<F>(input: &mut SectionReader<'_>, out: &mut Vec<u8>, renumber: &mut F) -> Result<()>
where
    F: FnMut(IndexKind, u32) -> Result<u32>,
{
    let type_index = input.read_uleb128()?;
    leb128::write_unsigned(out, renumber(IndexKind::Type, type_index)?);
    let size = input.read_uleb128()?;
    leb128::write_unsigned(out, size);
    for _ in 0..size {
        let name_index = input.read_uleb128()?;
        leb128::write_unsigned(out, renumber(IndexKind::String, name_index)?);
        transcode_value(input, out, renumber)?;
    }
    Ok(())
}

fn read_index(input: &mut SectionReader<'_>, arg: u8) -> Result<u32> {
    if arg > 3 {
        return Err(malformed!("index value {} bytes wide", arg + 1));
    }
    let mut index = 0u32;
    for (i, &b) in input.read_bytes(arg as usize + 1)?.iter().enumerate() {
        index |= (b as u32) << (8 * i);
    }
    Ok(index)
}

/// Writes an index-typed value with the fewest bytes that hold `index`.
fn write_index(out: &mut Vec<u8>, value_type: u8, index: u32) {
    let byte_count = match index {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    out.push(((byte_count - 1) << 5) | value_type);
    out.extend_from_slice(&index.to_le_bytes()[..byte_count as usize]);
}
