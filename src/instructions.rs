//! Instruction stream re-indexing.
//!
//! Walks a method's code units instruction by instruction and rewrites every operand
//! that refers to a string, type, field, method or proto. Instruction widths never
//! change, so branch targets, switch tables and try ranges stay valid.

use crate::error::{malformed, Error, Result};
use crate::index_map::{IndexKind, IndexMap};

const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
const FILL_ARRAY_DATA_PAYLOAD: u16 = 0x0300;

const CONST_STRING: u8 = 0x1a;
const CONST_STRING_JUMBO: u8 = 0x1b;

/// Width in code units of the instruction with this opcode.
fn instruction_width(opcode: u8) -> usize {
    match opcode {
        0x00 | 0x01 | 0x04 | 0x07 | 0x0a..=0x12 | 0x1d | 0x1e | 0x21 | 0x27 | 0x28
        | 0x3e..=0x43 | 0x73 | 0x79 | 0x7a | 0x7b..=0x8f | 0xb0..=0xcf | 0xe3..=0xf9 => 1,
        0x02 | 0x05 | 0x08 | 0x13 | 0x15 | 0x16 | 0x19 | 0x1a | 0x1c | 0x1f | 0x20 | 0x22
        | 0x23 | 0x29 | 0x2d..=0x3d | 0x44..=0x6d | 0x90..=0xaf | 0xd0..=0xe2 | 0xfe | 0xff => 2,
        0x03 | 0x06 | 0x09 | 0x14 | 0x17 | 0x1b | 0x24..=0x26 | 0x2a..=0x2c | 0x6e..=0x72
        | 0x74..=0x78 | 0xfc | 0xfd => 3,
        0xfa | 0xfb => 4,
        0x18 => 5,
    }
}

/// The kind of index held in the first operand slot (code unit 1), if any.
fn operand_kind(opcode: u8) -> Result<Option<IndexKind>> {
    Ok(match opcode {
        CONST_STRING | CONST_STRING_JUMBO => Some(IndexKind::String),
        // const-class, check-cast, instance-of, new-instance, new-array, filled-new-array[/range]
        0x1c | 0x1f | 0x20 | 0x22 | 0x23 | 0x24 | 0x25 => Some(IndexKind::Type),
        // iget*, iput*, sget*, sput*
        0x52..=0x6d => Some(IndexKind::Field),
        // invoke-*, invoke-*/range, invoke-polymorphic[/range]
        0x6e..=0x72 | 0x74..=0x78 | 0xfa | 0xfb => Some(IndexKind::Method),
        // const-method-type
        0xff => Some(IndexKind::Proto),
        0xfc | 0xfd => {
            return Err(Error::Unsupported {
                what: "invoke-custom".to_string(),
            })
        }
        0xfe => {
            return Err(Error::Unsupported {
                what: "const-method-handle".to_string(),
            })
        }
        _ => None,
    })
}

/// Size in code units of the payload pseudo-instruction starting at `insns[0]`.
fn payload_width(insns: &[u16]) -> Result<Option<usize>> {
    let unit = |i: usize| {
        insns
            .get(i)
            .copied()
            .ok_or_else(|| malformed!("truncated payload"))
    };
    Ok(match insns[0] {
        PACKED_SWITCH_PAYLOAD => Some(4 + unit(1)? as usize * 2),
        SPARSE_SWITCH_PAYLOAD => Some(2 + unit(1)? as usize * 4),
        FILL_ARRAY_DATA_PAYLOAD => {
            let element_width = unit(1)? as usize;
            let size = unit(2)? as usize | (unit(3)? as usize) << 16;
            Some(4 + (size * element_width + 1) / 2)
        }
        _ => None,
    })
}

/// Returns a copy of `instructions` with every index operand translated through
/// `index_map`.
pub fn transform(index_map: &IndexMap, instructions: &[u16]) -> Result<Vec<u16>> {
    let mut out = instructions.to_vec();
    let mut pos = 0;
    while pos < out.len() {
        let opcode = (out[pos] & 0xff) as u8;
        let (width, is_payload) = match payload_width(&out[pos..])? {
            Some(width) => (width, true),
            None => (instruction_width(opcode), false),
        };
        if pos + width > out.len() {
            return Err(malformed!(
                "instruction 0x{:02x} at {} runs past end of code ({} units)",
                opcode,
                pos,
                out.len()
            ));
        }
        if !is_payload {
            rewrite_operands(index_map, opcode, &mut out[pos..pos + width])?;
        }
        pos += width;
    }
    Ok(out)
}

fn rewrite_operands(index_map: &IndexMap, opcode: u8, insn: &mut [u16]) -> Result<()> {
    let Some(kind) = operand_kind(opcode)? else {
        return Ok(());
    };
    if opcode == CONST_STRING_JUMBO {
        let old = insn[1] as u32 | (insn[2] as u32) << 16;
        let new = index_map.translate_index(kind, old)?;
        insn[1] = new as u16;
        insn[2] = (new >> 16) as u16;
        return Ok(());
    }

    let new = index_map.translate_index(kind, insn[1] as u32)?;
    if new > 0xffff {
        // Widening to const-string/jumbo would shift every later branch target.
        return Err(Error::IndexOverflow {
            kind: "const-string",
            index: new,
        });
    }
    insn[1] = new as u16;

    if opcode == 0xfa || opcode == 0xfb {
        // invoke-polymorphic carries its proto in code unit 3
        insn[3] = index_map.translate_index(IndexKind::Proto, insn[3] as u32)? as u16;
    }
    Ok(())
}
