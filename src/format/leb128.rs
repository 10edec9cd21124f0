//! LEB128 variable-length integers, as used by dex for 32-bit values (at most five bytes).

/// Decodes an unsigned LEB128 value at the start of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` if the encoding is
/// truncated or longer than five bytes.
pub fn read_unsigned(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    for (i, &byte) in bytes.iter().take(5).enumerate() {
        result |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Decodes a signed LEB128 value at the start of `bytes`.
pub fn read_signed(bytes: &[u8]) -> Option<(i32, usize)> {
    let mut result: i32 = 0;
    for (i, &byte) in bytes.iter().take(5).enumerate() {
        result |= ((byte & 0x7f) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            let shift = 7 * (i + 1);
            if shift < 32 && byte & 0x40 != 0 {
                result |= -1i32 << shift;
            }
            return Some((result, i + 1));
        }
    }
    None
}

pub fn write_unsigned(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn write_signed(out: &mut Vec<u8>, mut value: i32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
