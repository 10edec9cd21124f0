//! Modified UTF-8, the string data encoding of dex files.
//!
//! Strings are kept as UTF-16 code units: the string table is ordered by code unit,
//! and MUTF-8 can carry unpaired surrogates that a Rust `String` cannot.

use crate::error::{malformed, Result};

/// Decodes NUL-terminated MUTF-8 from the start of `bytes`.
///
/// Returns the code units and the number of bytes consumed, terminator included.
pub fn decode(bytes: &[u8]) -> Result<(Vec<u16>, usize)> {
    let mut units = Vec::new();
    let mut pos = 0;
    loop {
        let a = *bytes.get(pos).ok_or_else(|| malformed!("unterminated string data"))?;
        pos += 1;
        if a == 0 {
            return Ok((units, pos));
        }
        if a < 0x80 {
            units.push(a as u16);
        } else if a & 0xe0 == 0xc0 {
            let b = continuation(bytes, pos)?;
            pos += 1;
            units.push((((a & 0x1f) as u16) << 6) | (b & 0x3f) as u16);
        } else if a & 0xf0 == 0xe0 {
            let b = continuation(bytes, pos)?;
            let c = continuation(bytes, pos + 1)?;
            pos += 2;
            units.push((((a & 0x0f) as u16) << 12) | (((b & 0x3f) as u16) << 6) | (c & 0x3f) as u16);
        } else {
            return Err(malformed!("bad MUTF-8 lead byte 0x{:02x}", a));
        }
    }
}

fn continuation(bytes: &[u8], pos: usize) -> Result<u8> {
    match bytes.get(pos) {
        Some(&b) if b & 0xc0 == 0x80 => Ok(b),
        Some(&b) => Err(malformed!("bad MUTF-8 continuation byte 0x{:02x}", b)),
        None => Err(malformed!("truncated MUTF-8 sequence")),
    }
}

/// Encodes code units as MUTF-8, without the terminator.
pub fn encode(units: &[u16], out: &mut Vec<u8>) {
    for &unit in units {
        match unit {
            0x01..=0x7f => out.push(unit as u8),
            0x00 | 0x80..=0x7ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
}
