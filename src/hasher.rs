//! Whole-image integrity hashes.
//!
//! A dex header carries a SHA-1 signature of everything after it (offset 32 onwards)
//! and an Adler-32 checksum of everything after the checksum (offset 12 onwards). The
//! signature is covered by the checksum, so it must be written first.

use sha1::{Digest, Sha1};

const CHECKSUM_OFFSET: usize = 8;
const SIGNATURE_OFFSET: usize = 12;
const SIGNATURE_END: usize = 32;

const ADLER_MOD: u32 = 65521;
// Largest run that can be summed before the 32-bit accumulators need reducing.
const ADLER_NMAX: usize = 5552;

fn adler32(data: &[u8]) -> u32 {
    let (mut a, mut b) = (1u32, 0u32);
    for chunk in data.chunks(ADLER_NMAX) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }
    (b << 16) | a
}

/// Adler-32 of the image after the checksum field.
pub fn checksum(image: &[u8]) -> u32 {
    adler32(&image[SIGNATURE_OFFSET..])
}

/// SHA-1 of the image after the signature field.
pub fn signature(image: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(&image[SIGNATURE_END..]);
    let mut signature = [0u8; 20];
    signature.copy_from_slice(&digest);
    signature
}

/// Fills in the signature and then the checksum of a fully written image.
pub fn write_hashes(image: &mut [u8]) {
    let signature = signature(image);
    image[SIGNATURE_OFFSET..SIGNATURE_END].copy_from_slice(&signature);
    let checksum = checksum(image);
    image[CHECKSUM_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&checksum.to_le_bytes());
}
