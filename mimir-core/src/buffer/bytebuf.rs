use std::io;

use crate::core::errors::BufferError;

type Result<T> = std::result::Result<T, BufferError>;

/// Fixed-capacity wire buffer
///
/// Invariants: `position <= limit <= capacity`. A fresh buffer has
/// `position == 0`, `limit == capacity`.
#[derive(Debug)]
pub struct ByteBuffer {
    data: Box<[u8]>,
    position: usize,
    limit: usize,
    mark: Option<usize>,
}

impl ByteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            position: 0,
            limit: capacity,
            mark: None,
        }
    }

    /// Wrap existing bytes; position 0, limit = len
    pub fn from_vec(data: Vec<u8>) -> Self {
        let limit = data.len();
        Self {
            data: data.into_boxed_slice(),
            position: 0,
            limit,
            mark: None,
        }
    }

    // ------------------------------------------------------------------
    // Cursor discipline
    // ------------------------------------------------------------------

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline(always)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    #[inline(always)]
    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub fn set_position(&mut self, position: usize) {
        debug_assert!(position <= self.limit);
        self.position = position.min(self.limit);
        if let Some(m) = self.mark {
            if m > self.position {
                self.mark = None;
            }
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        debug_assert!(limit <= self.capacity());
        self.limit = limit.min(self.capacity());
        if self.position > self.limit {
            self.position = self.limit;
        }
        if let Some(m) = self.mark {
            if m > self.limit {
                self.mark = None;
            }
        }
    }

    /// limit <- position, position <- 0 (write mode to read mode)
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
    }

    /// Copy `[position, limit)` to the start; position <- copied length,
    /// limit <- capacity (read mode back to write mode, keeping the
    /// unconsumed tail)
    pub fn compact(&mut self) {
        let len = self.remaining();
        self.data.copy_within(self.position..self.limit, 0);
        self.position = len;
        self.limit = self.capacity();
        self.mark = None;
    }

    /// position <- 0, limit <- capacity
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
        self.mark = None;
    }

    /// position <- 0, limit unchanged
    pub fn rewind(&mut self) {
        self.position = 0;
        self.mark = None;
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.position);
    }

    pub fn reset(&mut self) -> Result<()> {
        match self.mark {
            Some(m) => {
                self.position = m;
                Ok(())
            }
            None => Err(BufferError::NoMark),
        }
    }

    // ------------------------------------------------------------------
    // Raw slices
    // ------------------------------------------------------------------

    /// Readable bytes `[position, limit)`
    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Writable bytes `[position, limit)`
    #[inline]
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// Full backing region up to limit (absolute view)
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    // ------------------------------------------------------------------
    // Socket I/O (linear view)
    // ------------------------------------------------------------------

    /// Read from `reader` into `[position, limit)`, advancing position.
    /// Returns the byte count; 0 means EOF or no writable space.
    pub fn read_from<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if !self.has_remaining() {
            return Ok(0);
        }
        let n = reader.read(&mut self.data[self.position..self.limit])?;
        self.position += n;
        Ok(n)
    }

    /// Write `[position, limit)` to `writer`, advancing position past what
    /// was accepted. Returns the byte count written.
    pub fn write_to<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if !self.has_remaining() {
            return Ok(0);
        }
        let n = writer.write(&self.data[self.position..self.limit])?;
        self.position += n;
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Bounds checks
    // ------------------------------------------------------------------

    #[inline(always)]
    fn check_abs(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.limit) {
            return Err(BufferError::OutOfBounds {
                offset,
                len,
                limit: self.limit,
            });
        }
        Ok(())
    }

    #[inline(always)]
    fn check_get(&self, len: usize) -> Result<()> {
        if self.remaining() < len {
            return Err(BufferError::Underflow {
                need: len,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    #[inline(always)]
    fn check_put(&self, len: usize) -> Result<()> {
        if self.remaining() < len {
            return Err(BufferError::Overflow {
                need: len,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Absolute typed accessors (never touch position)
    // ------------------------------------------------------------------

    #[inline]
    pub fn get_u8_at(&self, offset: usize) -> Result<u8> {
        self.check_abs(offset, 1)?;
        Ok(self.data[offset])
    }

    #[inline]
    pub fn put_u8_at(&mut self, offset: usize, v: u8) -> Result<()> {
        self.check_abs(offset, 1)?;
        self.data[offset] = v;
        Ok(())
    }

    #[inline]
    pub fn get_u16_be_at(&self, offset: usize) -> Result<u16> {
        self.check_abs(offset, 2)?;
        Ok(u16::from_be_bytes(self.data[offset..offset + 2].try_into().unwrap()))
    }

    #[inline]
    pub fn get_u16_le_at(&self, offset: usize) -> Result<u16> {
        self.check_abs(offset, 2)?;
        Ok(u16::from_le_bytes(self.data[offset..offset + 2].try_into().unwrap()))
    }

    #[inline]
    pub fn put_u16_be_at(&mut self, offset: usize, v: u16) -> Result<()> {
        self.check_abs(offset, 2)?;
        self.data[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    #[inline]
    pub fn put_u16_le_at(&mut self, offset: usize, v: u16) -> Result<()> {
        self.check_abs(offset, 2)?;
        self.data[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    #[inline]
    pub fn get_u32_be_at(&self, offset: usize) -> Result<u32> {
        self.check_abs(offset, 4)?;
        Ok(u32::from_be_bytes(self.data[offset..offset + 4].try_into().unwrap()))
    }

    #[inline]
    pub fn get_u32_le_at(&self, offset: usize) -> Result<u32> {
        self.check_abs(offset, 4)?;
        Ok(u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap()))
    }

    #[inline]
    pub fn put_u32_be_at(&mut self, offset: usize, v: u32) -> Result<()> {
        self.check_abs(offset, 4)?;
        self.data[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    #[inline]
    pub fn put_u32_le_at(&mut self, offset: usize, v: u32) -> Result<()> {
        self.check_abs(offset, 4)?;
        self.data[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    #[inline]
    pub fn get_u64_be_at(&self, offset: usize) -> Result<u64> {
        self.check_abs(offset, 8)?;
        Ok(u64::from_be_bytes(self.data[offset..offset + 8].try_into().unwrap()))
    }

    #[inline]
    pub fn get_u64_le_at(&self, offset: usize) -> Result<u64> {
        self.check_abs(offset, 8)?;
        Ok(u64::from_le_bytes(self.data[offset..offset + 8].try_into().unwrap()))
    }

    #[inline]
    pub fn put_u64_be_at(&mut self, offset: usize, v: u64) -> Result<()> {
        self.check_abs(offset, 8)?;
        self.data[offset..offset + 8].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    #[inline]
    pub fn put_u64_le_at(&mut self, offset: usize, v: u64) -> Result<()> {
        self.check_abs(offset, 8)?;
        self.data[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    #[inline]
    pub fn get_i32_be_at(&self, offset: usize) -> Result<i32> {
        Ok(self.get_u32_be_at(offset)? as i32)
    }

    #[inline]
    pub fn put_i32_be_at(&mut self, offset: usize, v: i32) -> Result<()> {
        self.put_u32_be_at(offset, v as u32)
    }

    #[inline]
    pub fn get_i64_be_at(&self, offset: usize) -> Result<i64> {
        Ok(self.get_u64_be_at(offset)? as i64)
    }

    #[inline]
    pub fn get_i64_le_at(&self, offset: usize) -> Result<i64> {
        Ok(self.get_u64_le_at(offset)? as i64)
    }

    #[inline]
    pub fn put_i64_be_at(&mut self, offset: usize, v: i64) -> Result<()> {
        self.put_u64_be_at(offset, v as u64)
    }

    #[inline]
    pub fn put_i64_le_at(&mut self, offset: usize, v: i64) -> Result<()> {
        self.put_u64_le_at(offset, v as u64)
    }

    #[inline]
    pub fn get_f32_be_at(&self, offset: usize) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32_be_at(offset)?))
    }

    #[inline]
    pub fn put_f32_be_at(&mut self, offset: usize, v: f32) -> Result<()> {
        self.put_u32_be_at(offset, v.to_bits())
    }

    #[inline]
    pub fn get_f64_be_at(&self, offset: usize) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64_be_at(offset)?))
    }

    #[inline]
    pub fn put_f64_be_at(&mut self, offset: usize, v: f64) -> Result<()> {
        self.put_u64_be_at(offset, v.to_bits())
    }

    #[inline]
    pub fn get_bytes_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check_abs(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    #[inline]
    pub fn put_bytes_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_abs(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// ASCII substring; invalid bytes surface as a lossy view is NOT taken,
    /// the raw slice must be valid UTF-8 (ASCII wire fields always are)
    pub fn get_str_at(&self, offset: usize, len: usize) -> Result<&str> {
        let bytes = self.get_bytes_at(offset, len)?;
        std::str::from_utf8(bytes).map_err(|_| BufferError::OutOfBounds {
            offset,
            len,
            limit: self.limit,
        })
    }

    /// Left-justified space-padded alpha field (OUCH/Pillar convention):
    /// reads `width` bytes and trims trailing spaces
    pub fn get_alpha_at(&self, offset: usize, width: usize) -> Result<&str> {
        let s = self.get_str_at(offset, width)?;
        Ok(s.trim_end_matches(' '))
    }

    /// Write `text` left-justified into a `width`-byte field, space-padded.
    /// Text longer than the field is truncated.
    pub fn put_alpha_at(&mut self, offset: usize, text: &str, width: usize) -> Result<()> {
        self.check_abs(offset, width)?;
        let bytes = text.as_bytes();
        let n = bytes.len().min(width);
        self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
        for b in &mut self.data[offset + n..offset + width] {
            *b = b' ';
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Relative accessors (advance position)
    // ------------------------------------------------------------------

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8> {
        self.check_get(1)?;
        let v = self.data[self.position];
        self.position += 1;
        Ok(v)
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.check_put(1)?;
        self.data[self.position] = v;
        self.position += 1;
        Ok(())
    }

    #[inline]
    pub fn get_u32_be(&mut self) -> Result<u32> {
        let v = self.get_u32_be_at(self.position)?;
        self.position += 4;
        Ok(v)
    }

    #[inline]
    pub fn put_u32_be(&mut self, v: u32) -> Result<()> {
        self.check_put(4)?;
        self.put_u32_be_at(self.position, v)?;
        self.position += 4;
        Ok(())
    }

    #[inline]
    pub fn get_u64_be(&mut self) -> Result<u64> {
        let v = self.get_u64_be_at(self.position)?;
        self.position += 8;
        Ok(v)
    }

    #[inline]
    pub fn put_u64_be(&mut self, v: u64) -> Result<()> {
        self.check_put(8)?;
        self.put_u64_be_at(self.position, v)?;
        self.position += 8;
        Ok(())
    }

    #[inline]
    pub fn get_bytes(&mut self, len: usize) -> Result<&[u8]> {
        self.check_get(len)?;
        let start = self.position;
        self.position += len;
        Ok(&self.data[start..start + len])
    }

    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_put(bytes.len())?;
        let start = self.position;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fresh_buffer() {
        let buf = ByteBuffer::new(64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 64);
        assert_eq!(buf.remaining(), 64);
    }

    #[test]
    fn test_flip_compact_cycle() {
        let mut buf = ByteBuffer::new(16);
        buf.put_bytes(b"hello world").unwrap();

        buf.flip();
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 11);
        assert_eq!(buf.readable(), b"hello world");

        // Consume "hello ", keep "world"
        buf.set_position(6);
        buf.compact();
        assert_eq!(buf.position(), 5);
        assert_eq!(buf.limit(), 16);

        buf.flip();
        assert_eq!(buf.readable(), b"world");
    }

    #[test]
    fn test_mark_reset() {
        let mut buf = ByteBuffer::from_vec(b"abcdef".to_vec());
        buf.get_u8().unwrap();
        buf.mark();
        buf.get_u8().unwrap();
        buf.get_u8().unwrap();
        buf.reset().unwrap();
        assert_eq!(buf.position(), 1);
        assert_eq!(buf.get_u8().unwrap(), b'b');
    }

    #[test]
    fn test_reset_without_mark() {
        let mut buf = ByteBuffer::new(8);
        assert_eq!(buf.reset(), Err(BufferError::NoMark));
    }

    #[test]
    fn test_absolute_does_not_move_position() {
        let mut buf = ByteBuffer::new(32);
        buf.put_u32_be_at(8, 0xDEADBEEF).unwrap();
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.get_u32_be_at(8).unwrap(), 0xDEADBEEF);
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_endianness_variants() {
        let mut buf = ByteBuffer::new(32);
        buf.put_u16_be_at(0, 0x0102).unwrap();
        assert_eq!(buf.get_bytes_at(0, 2).unwrap(), &[0x01, 0x02]);

        buf.put_u16_le_at(2, 0x0102).unwrap();
        assert_eq!(buf.get_bytes_at(2, 2).unwrap(), &[0x02, 0x01]);

        buf.put_u64_le_at(8, 0x0102030405060708).unwrap();
        assert_eq!(buf.get_u64_le_at(8).unwrap(), 0x0102030405060708);
        assert_eq!(buf.get_u64_be_at(8).unwrap(), 0x0807060504030201);
    }

    #[test]
    fn test_float_accessors() {
        let mut buf = ByteBuffer::new(16);
        buf.put_f64_be_at(0, 150.25).unwrap();
        assert_eq!(buf.get_f64_be_at(0).unwrap(), 150.25);
        buf.put_f32_be_at(8, 1.5).unwrap();
        assert_eq!(buf.get_f32_be_at(8).unwrap(), 1.5);
    }

    #[test]
    fn test_signed_accessors() {
        let mut buf = ByteBuffer::new(16);
        buf.put_i64_be_at(0, -1_234_567_890).unwrap();
        assert_eq!(buf.get_i64_be_at(0).unwrap(), -1_234_567_890);

        buf.put_i64_le_at(8, i64::MIN).unwrap();
        assert_eq!(buf.get_i64_le_at(8).unwrap(), i64::MIN);
    }

    #[test]
    fn test_bounds_check() {
        let buf = ByteBuffer::new(8);
        assert!(matches!(
            buf.get_u64_be_at(4),
            Err(BufferError::OutOfBounds { .. })
        ));
        assert!(matches!(
            buf.get_u8_at(8),
            Err(BufferError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_bounds_check_respects_limit() {
        let mut buf = ByteBuffer::new(16);
        buf.set_limit(4);
        assert!(buf.get_u32_be_at(0).is_ok());
        assert!(buf.get_u8_at(4).is_err());
    }

    #[test]
    fn test_relative_underflow_overflow() {
        let mut buf = ByteBuffer::from_vec(vec![1, 2]);
        assert!(matches!(buf.get_u32_be(), Err(BufferError::Underflow { .. })));

        let mut buf = ByteBuffer::new(2);
        assert!(matches!(
            buf.put_u32_be(1),
            Err(BufferError::Overflow { .. })
        ));
    }

    #[test]
    fn test_alpha_field_roundtrip() {
        let mut buf = ByteBuffer::new(32);
        buf.put_alpha_at(0, "AAPL", 8).unwrap();
        assert_eq!(buf.get_bytes_at(0, 8).unwrap(), b"AAPL    ");
        assert_eq!(buf.get_alpha_at(0, 8).unwrap(), "AAPL");
    }

    #[test]
    fn test_alpha_field_truncates() {
        let mut buf = ByteBuffer::new(8);
        buf.put_alpha_at(0, "TOOLONGNAME", 4).unwrap();
        assert_eq!(buf.get_alpha_at(0, 4).unwrap(), "TOOL");
    }

    #[test]
    fn test_read_from_write_to() {
        let mut src = Cursor::new(b"wire bytes".to_vec());
        let mut buf = ByteBuffer::new(32);

        let n = buf.read_from(&mut src).unwrap();
        assert_eq!(n, 10);

        buf.flip();
        let mut out = Vec::new();
        let n = buf.write_to(&mut out).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, b"wire bytes");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_read_from_full_buffer() {
        let mut src = Cursor::new(vec![0u8; 16]);
        let mut buf = ByteBuffer::new(4);
        buf.read_from(&mut src).unwrap();
        // Full: further reads are no-ops, not errors
        assert_eq!(buf.read_from(&mut src).unwrap(), 0);
    }
}
