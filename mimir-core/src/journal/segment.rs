use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::core::errors::JournalError;

/// Segment file magic: identifies a mimir journal segment
pub const SEGMENT_MAGIC: &[u8; 8] = b"MIMIRLOG";
pub const SEGMENT_VERSION: u16 = 1;
pub const SEGMENT_HEADER: usize = 12; // magic + version + reserved

/// Fixed per-entry framing ahead of the variable tail:
/// `[len:4][timestamp:8][seq:4][direction:1][metaLen:2]` then
/// `[metadata][rawLen:4][raw]`. All integers little-endian. `len` counts
/// everything after itself.
pub const ENTRY_FIXED: usize = 8 + 4 + 1 + 2;

/// One memory-mapped segment file
pub struct Segment {
    pub path: PathBuf,
    pub index: u32,
    map: MmapMut,
    /// Bytes in use, including the header
    pub used: usize,
}

impl Segment {
    /// Create a fresh segment pre-sized to `size` bytes
    pub fn create(path: &Path, index: u32, size: usize) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size as u64)?;

        // SAFETY: the file is exclusively owned by this process; segments
        // are never opened for write twice.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[..8].copy_from_slice(SEGMENT_MAGIC);
        map[8..10].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        map[10..12].copy_from_slice(&0u16.to_le_bytes());
        map.flush_range(0, SEGMENT_HEADER)?;

        Ok(Self {
            path: path.to_path_buf(),
            index,
            map,
            used: SEGMENT_HEADER,
        })
    }

    /// Reopen an existing segment, recovering `used` by walking entries
    /// until the first hole (zero length or truncated frame).
    pub fn open(path: &Path, index: u32) -> Result<Self, JournalError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: as in create; recovery happens before any writer exists.
        let map = unsafe { MmapMut::map_mut(&file)? };

        if map.len() < SEGMENT_HEADER || &map[..8] != SEGMENT_MAGIC {
            return Err(JournalError::Corrupt {
                segment: path.display().to_string(),
                offset: 0,
            });
        }

        let mut used = SEGMENT_HEADER;
        loop {
            if used + 4 > map.len() {
                break;
            }
            let len = u32::from_le_bytes(map[used..used + 4].try_into().unwrap()) as usize;
            if len == 0 || used + 4 + len > map.len() {
                break;
            }
            used += 4 + len;
        }

        Ok(Self {
            path: path.to_path_buf(),
            index,
            map,
            used,
        })
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.map.len() - self.used
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Append one framed entry; flushes the written range before
    /// returning so the entry is durable once `write` completes.
    pub fn append(
        &mut self,
        timestamp_ms: u64,
        seq_num: u32,
        direction: u8,
        metadata: Option<&[u8]>,
        raw: &[u8],
    ) -> Result<(), JournalError> {
        let meta_len = metadata.map_or(0, <[u8]>::len);
        let body = ENTRY_FIXED + meta_len + 4 + raw.len();
        let total = 4 + body;

        if total > self.free() {
            return Err(JournalError::EntryTooLarge {
                len: total,
                segment_size: self.capacity(),
            });
        }

        let start = self.used;
        let buf = &mut self.map[start..start + total];
        buf[0..4].copy_from_slice(&(body as u32).to_le_bytes());
        buf[4..12].copy_from_slice(&timestamp_ms.to_le_bytes());
        buf[12..16].copy_from_slice(&seq_num.to_le_bytes());
        buf[16] = direction;
        buf[17..19].copy_from_slice(&(meta_len as u16).to_le_bytes());
        let mut at = 19;
        if let Some(meta) = metadata {
            buf[at..at + meta.len()].copy_from_slice(meta);
            at += meta.len();
        }
        buf[at..at + 4].copy_from_slice(&(raw.len() as u32).to_le_bytes());
        at += 4;
        buf[at..at + raw.len()].copy_from_slice(raw);

        self.map.flush_range(start, total)?;
        self.used += total;
        Ok(())
    }

    /// Bytes currently in use (header included)
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.map[..self.used]
    }

    /// Shrink the backing file to the used length when rolling to the
    /// next segment.
    pub fn seal(&mut self) -> Result<(), JournalError> {
        self.map.flush()?;
        let file = File::options().write(true).open(&self.path)?;
        file.set_len(self.used as u64)?;
        Ok(())
    }
}

/// Walk the framed entries of a segment's bytes.
///
/// Yields `(timestamp_ms, seq, direction, metadata, raw)` tuples and the
/// offset where a malformed frame was found, if any.
pub struct EntryWalker<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> EntryWalker<'a> {
    pub fn new(segment_bytes: &'a [u8]) -> Self {
        Self {
            bytes: segment_bytes,
            pos: SEGMENT_HEADER.min(segment_bytes.len()),
        }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for EntryWalker<'a> {
    type Item = Result<(u64, u32, u8, Option<&'a [u8]>, &'a [u8]), usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 4 > self.bytes.len() {
            return None;
        }
        let len =
            u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap()) as usize;
        if len == 0 {
            return None;
        }
        if len < ENTRY_FIXED + 4 || self.pos + 4 + len > self.bytes.len() {
            return Some(Err(self.pos));
        }

        let body = &self.bytes[self.pos + 4..self.pos + 4 + len];
        let timestamp = u64::from_le_bytes(body[0..8].try_into().unwrap());
        let seq = u32::from_le_bytes(body[8..12].try_into().unwrap());
        let direction = body[12];
        let meta_len = u16::from_le_bytes(body[13..15].try_into().unwrap()) as usize;

        if ENTRY_FIXED + meta_len + 4 > len {
            return Some(Err(self.pos));
        }
        let metadata = if meta_len > 0 {
            Some(&body[15..15 + meta_len])
        } else {
            None
        };
        let raw_len_at = 15 + meta_len;
        let raw_len =
            u32::from_le_bytes(body[raw_len_at..raw_len_at + 4].try_into().unwrap()) as usize;
        if raw_len_at + 4 + raw_len > len {
            return Some(Err(self.pos));
        }
        let raw = &body[raw_len_at + 4..raw_len_at + 4 + raw_len];

        self.pos += 4 + len;
        Some(Ok((timestamp, seq, direction, metadata, raw)))
    }
}
