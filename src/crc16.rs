//! IEEE 1212 CRC-16 over quadlets
//!
//! The checksum protecting Config ROM blocks. Polynomial is
//! x^16 + x^12 + x^5 + 1, fed most-significant-bit first, processed
//! four bits per step as laid out in IEEE 1212 annex.

/// Compute the CRC-16 over a run of quadlets.
pub fn crc16(data: &[u32]) -> u16 {
    let mut crc: u32 = 0;
    for &quadlet in data {
        let mut shift = 28i32;
        while shift >= 0 {
            let sum = ((crc >> 12) ^ (quadlet >> shift)) & 0xF;
            crc = ((crc << 4) ^ (sum << 12) ^ (sum << 5) ^ sum) & 0xFFFF;
            shift -= 4;
        }
    }
    crc as u16
}
