//! Fixed-offset field accessors for the binary codecs
//!
//! The binary protocols (OUCH, iLink 3, Optiq, Pillar) read and write
//! fields at fixed offsets inside a buffer region - a ring claim on the
//! way out, the connection's read buffer on the way in. These free
//! functions are the only accessors those codecs use; offsets stay in
//! the per-protocol layout modules.
//!
//! Reads assume framing already checked the region length; all slicing
//! panics are framing bugs, not runtime conditions.

#[inline]
pub fn u16_be(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes(buf[at..at + 2].try_into().unwrap())
}

#[inline]
pub fn u16_le(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(buf[at..at + 2].try_into().unwrap())
}

#[inline]
pub fn u32_be(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
}

#[inline]
pub fn u32_le(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

#[inline]
pub fn u64_be(buf: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(buf[at..at + 8].try_into().unwrap())
}

#[inline]
pub fn u64_le(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

#[inline]
pub fn i64_be(buf: &[u8], at: usize) -> i64 {
    i64::from_be_bytes(buf[at..at + 8].try_into().unwrap())
}

#[inline]
pub fn i64_le(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

#[inline]
pub fn put_u16_be(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_u16_le(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn put_u32_be(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_u32_le(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn put_u64_be(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_u64_le(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn put_i64_be(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_i64_le(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// Left-justified space-padded alpha field, trailing pad trimmed
#[inline]
pub fn alpha(buf: &[u8], at: usize, width: usize) -> &str {
    std::str::from_utf8(&buf[at..at + width])
        .unwrap_or("")
        .trim_end_matches(' ')
}

/// Write text left-justified into a space-padded field, truncating to fit
#[inline]
pub fn put_alpha(buf: &mut [u8], at: usize, width: usize, text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(width);
    buf[at..at + n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[at + n..at + width] {
        *b = b' ';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrips() {
        let mut buf = [0u8; 32];
        put_u32_be(&mut buf, 0, 0xA1B2C3D4);
        assert_eq!(u32_be(&buf, 0), 0xA1B2C3D4);
        assert_eq!(buf[0], 0xA1);

        put_u32_le(&mut buf, 4, 0xA1B2C3D4);
        assert_eq!(u32_le(&buf, 4), 0xA1B2C3D4);
        assert_eq!(buf[4], 0xD4);

        put_i64_be(&mut buf, 8, -42);
        assert_eq!(i64_be(&buf, 8), -42);

        put_u16_le(&mut buf, 16, 514);
        assert_eq!(u16_le(&buf, 16), 514);
        assert_eq!(buf[16], 2);
    }

    #[test]
    fn test_alpha_field() {
        let mut buf = [0u8; 16];
        put_alpha(&mut buf, 0, 8, "AAPL");
        assert_eq!(&buf[..8], b"AAPL    ");
        assert_eq!(alpha(&buf, 0, 8), "AAPL");

        put_alpha(&mut buf, 8, 4, "TOOLONG");
        assert_eq!(alpha(&buf, 8, 4), "TOOL");
    }
}
