//! Durable message journal
//!
//! Append-only, per-stream (stream = session id) log of every inbound and
//! outbound message. Entries are framed into size-segmented memory-mapped
//! files and flushed before `write` returns, so the outbound half is
//! trustworthy resend material after a crash. Replay walks segments in
//! file order, which is also write order.
//!
//! On-disk entry frame (little-endian):
//! `[len:4][timestamp:8][seqNum:4][direction:1][metaLen:2][metadata][rawLen:4][raw]`

mod segment;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::errors::JournalError;
use crate::core::Direction;
use segment::{EntryWalker, Segment};

pub use segment::{SEGMENT_HEADER, SEGMENT_MAGIC};

/// Default segment size: 4 MiB
pub const DEFAULT_SEGMENT_SIZE: usize = 4 << 20;

/// Owned journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub timestamp_ms: u64,
    pub seq_num: u32,
    pub direction: Direction,
    pub metadata: Option<Vec<u8>>,
    pub raw: Vec<u8>,
}

/// Borrowed view handed to replay callbacks
#[derive(Debug, Clone, Copy)]
pub struct EntryView<'a> {
    pub timestamp_ms: u64,
    pub seq_num: u32,
    pub direction: Direction,
    pub metadata: Option<&'a [u8]>,
    pub raw: &'a [u8],
}

impl EntryView<'_> {
    pub fn to_owned_entry(&self) -> JournalEntry {
        JournalEntry {
            timestamp_ms: self.timestamp_ms,
            seq_num: self.seq_num,
            direction: self.direction,
            metadata: self.metadata.map(<[u8]>::to_vec),
            raw: self.raw.to_vec(),
        }
    }
}

struct StreamLog {
    name: String,
    dir: PathBuf,
    sealed: Vec<Segment>,
    active: Segment,
    entry_count: u64,
    latest: [Option<JournalEntry>; 2],
}

impl StreamLog {
    fn segment_path(dir: &Path, name: &str, index: u32) -> PathBuf {
        // Stream names are session ids; keep them path-safe
        let safe: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        dir.join(format!("{}.{:06}.mlog", safe, index))
    }

    fn create(dir: &Path, name: &str, segment_size: usize) -> Result<Self, JournalError> {
        let active = Segment::create(&Self::segment_path(dir, name, 0), 0, segment_size)?;
        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            sealed: Vec::new(),
            active,
            entry_count: 0,
            latest: [None, None],
        })
    }

    fn roll(&mut self, segment_size: usize) -> Result<(), JournalError> {
        self.active.seal()?;
        let next_index = self.active.index + 1;
        let next = Segment::create(
            &Self::segment_path(&self.dir, &self.name, next_index),
            next_index,
            segment_size,
        )?;
        let sealed = std::mem::replace(&mut self.active, next);
        self.sealed.push(sealed);
        Ok(())
    }
}

/// The process-wide journal. Cheap to clone and share; per-stream writes
/// serialize on that stream's lock only.
pub struct Journal {
    dir: PathBuf,
    segment_size: usize,
    streams: DashMap<String, Arc<Mutex<StreamLog>>>,
}

impl Journal {
    /// Open (or create) a journal directory, recovering any existing
    /// stream segments.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<Self>, JournalError> {
        Self::open_with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    pub fn open_with_segment_size(
        dir: impl Into<PathBuf>,
        segment_size: usize,
    ) -> Result<Arc<Self>, JournalError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let journal = Self {
            dir: dir.clone(),
            segment_size,
            streams: DashMap::new(),
        };

        // Group existing segment files by stream, highest index last
        let mut found: std::collections::BTreeMap<String, Vec<(u32, PathBuf)>> =
            std::collections::BTreeMap::new();
        for dirent in std::fs::read_dir(&dir)? {
            let path = dirent?.path();
            let Some(fname) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = fname.strip_suffix(".mlog") else {
                continue;
            };
            let Some((stream, idx)) = stem.rsplit_once('.') else {
                continue;
            };
            let Ok(idx) = idx.parse::<u32>() else {
                continue;
            };
            found.entry(stream.to_string()).or_default().push((idx, path));
        }

        for (stream, mut segs) in found {
            segs.sort_by_key(|(idx, _)| *idx);
            let (active_idx, active_path) = segs.pop().unwrap();
            let mut sealed = Vec::with_capacity(segs.len());
            for (idx, path) in segs {
                sealed.push(Segment::open(&path, idx)?);
            }
            let active = Segment::open(&active_path, active_idx)?;

            let mut log = StreamLog {
                name: stream.clone(),
                dir: dir.clone(),
                sealed,
                active,
                entry_count: 0,
                latest: [None, None],
            };

            // Rebuild counters and latest-entry cache from the recovered
            // segments.
            let mut count = 0u64;
            let mut latest: [Option<JournalEntry>; 2] = [None, None];
            for seg in log.sealed.iter().chain(std::iter::once(&log.active)) {
                for item in EntryWalker::new(seg.bytes()) {
                    let (ts, seq, dir_byte, meta, raw) = item.map_err(|offset| {
                        JournalError::Corrupt {
                            segment: seg.path.display().to_string(),
                            offset,
                        }
                    })?;
                    let Some(direction) = Direction::from_byte(dir_byte) else {
                        continue;
                    };
                    count += 1;
                    latest[direction as usize] = Some(JournalEntry {
                        timestamp_ms: ts,
                        seq_num: seq,
                        direction,
                        metadata: meta.map(<[u8]>::to_vec),
                        raw: raw.to_vec(),
                    });
                }
            }
            log.entry_count = count;
            log.latest = latest;

            journal.streams.insert(stream, Arc::new(Mutex::new(log)));
        }

        Ok(Arc::new(journal))
    }

    fn stream(&self, name: &str) -> Result<Arc<Mutex<StreamLog>>, JournalError> {
        use dashmap::mapref::entry::Entry;

        if let Some(existing) = self.streams.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        // The vacant entry holds the shard lock, so exactly one thread
        // creates the segment file for a new stream.
        match self.streams.entry(name.to_string()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(v) => {
                let log = Arc::new(Mutex::new(StreamLog::create(
                    &self.dir,
                    name,
                    self.segment_size,
                )?));
                v.insert(Arc::clone(&log));
                Ok(log)
            }
        }
    }

    /// Append one entry; durable when this returns.
    pub fn write(&self, stream: &str, entry: &JournalEntry) -> Result<(), JournalError> {
        let log = self.stream(stream)?;
        let mut log = log.lock();

        let meta = entry.metadata.as_deref();
        match log.active.append(
            entry.timestamp_ms,
            entry.seq_num,
            entry.direction.as_byte(),
            meta,
            &entry.raw,
        ) {
            Ok(()) => {}
            Err(JournalError::EntryTooLarge { len, .. })
                if len + SEGMENT_HEADER <= self.segment_size =>
            {
                log.roll(self.segment_size)?;
                log.active.append(
                    entry.timestamp_ms,
                    entry.seq_num,
                    entry.direction.as_byte(),
                    meta,
                    &entry.raw,
                )?;
            }
            Err(e) => return Err(e),
        }

        log.entry_count += 1;
        log.latest[entry.direction as usize] = Some(entry.clone());
        Ok(())
    }

    /// Replay entries of `stream` with `from_seq <= seq <= to_seq`
    /// (inclusive), in write order, optionally filtered by direction.
    /// Stops early when the callback returns `false`. Returns the number
    /// of entries delivered.
    pub fn replay<F>(
        &self,
        stream: &str,
        direction: Option<Direction>,
        from_seq: u32,
        to_seq: u32,
        mut callback: F,
    ) -> Result<usize, JournalError>
    where
        F: FnMut(EntryView<'_>) -> bool,
    {
        self.replay_filtered(stream, direction, |view| {
            view.seq_num >= from_seq && view.seq_num <= to_seq
        }, &mut callback)
    }

    /// Replay entries whose timestamp lies in `[from_ms, to_ms]`.
    pub fn replay_by_time<F>(
        &self,
        stream: &str,
        direction: Option<Direction>,
        from_ms: u64,
        to_ms: u64,
        mut callback: F,
    ) -> Result<usize, JournalError>
    where
        F: FnMut(EntryView<'_>) -> bool,
    {
        self.replay_filtered(stream, direction, |view| {
            view.timestamp_ms >= from_ms && view.timestamp_ms <= to_ms
        }, &mut callback)
    }

    fn replay_filtered<P, F>(
        &self,
        stream: &str,
        direction: Option<Direction>,
        mut predicate: P,
        callback: &mut F,
    ) -> Result<usize, JournalError>
    where
        P: FnMut(&EntryView<'_>) -> bool,
        F: FnMut(EntryView<'_>) -> bool,
    {
        let log = self
            .streams
            .get(stream)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| JournalError::UnknownStream(stream.to_string()))?;
        let log = log.lock();

        let mut delivered = 0usize;
        for seg in log.sealed.iter().chain(std::iter::once(&log.active)) {
            for item in EntryWalker::new(seg.bytes()) {
                let (ts, seq, dir_byte, meta, raw) =
                    item.map_err(|offset| JournalError::Corrupt {
                        segment: seg.path.display().to_string(),
                        offset,
                    })?;
                let Some(entry_dir) = Direction::from_byte(dir_byte) else {
                    continue;
                };
                if let Some(want) = direction {
                    if want != entry_dir {
                        continue;
                    }
                }
                let view = EntryView {
                    timestamp_ms: ts,
                    seq_num: seq,
                    direction: entry_dir,
                    metadata: meta,
                    raw,
                };
                if !predicate(&view) {
                    continue;
                }
                delivered += 1;
                if !callback(view) {
                    return Ok(delivered);
                }
            }
        }
        Ok(delivered)
    }

    /// Most recent entry for a stream/direction
    pub fn latest(&self, stream: &str, direction: Direction) -> Option<JournalEntry> {
        let log = self.streams.get(stream)?;
        let log = log.lock();
        log.latest[direction as usize].clone()
    }

    /// All known stream names, sorted
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Entry count for one stream, or across all streams
    pub fn entry_count(&self, stream: Option<&str>) -> u64 {
        match stream {
            Some(name) => self
                .streams
                .get(name)
                .map(|log| log.lock().entry_count)
                .unwrap_or(0),
            None => self
                .streams
                .iter()
                .map(|entry| entry.value().lock().entry_count)
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u32, direction: Direction, raw: &[u8]) -> JournalEntry {
        JournalEntry {
            timestamp_ms: 1_700_000_000_000 + seq as u64,
            seq_num: seq,
            direction,
            metadata: None,
            raw: raw.to_vec(),
        }
    }

    #[test]
    fn test_write_replay_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        journal.write("s1", &entry(1, Direction::Outbound, b"msg-1")).unwrap();
        journal.write("s1", &entry(2, Direction::Outbound, b"msg-2")).unwrap();
        journal.write("s1", &entry(1, Direction::Inbound, b"in-1")).unwrap();

        let mut seen = Vec::new();
        journal
            .replay("s1", Some(Direction::Outbound), 1, u32::MAX, |v| {
                seen.push((v.seq_num, v.raw.to_vec()));
                true
            })
            .unwrap();

        assert_eq!(seen, vec![(1, b"msg-1".to_vec()), (2, b"msg-2".to_vec())]);
    }

    #[test]
    fn test_replay_range_and_early_stop() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        for seq in 1..=10 {
            journal
                .write("s1", &entry(seq, Direction::Outbound, format!("m{}", seq).as_bytes()))
                .unwrap();
        }

        let mut seen = Vec::new();
        let delivered = journal
            .replay("s1", None, 3, 7, |v| {
                seen.push(v.seq_num);
                v.seq_num < 5
            })
            .unwrap();

        assert_eq!(seen, vec![3, 4, 5]);
        assert_eq!(delivered, 3);
    }

    #[test]
    fn test_replay_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        for seq in 1..=5 {
            journal.write("s1", &entry(seq, Direction::Inbound, b"x")).unwrap();
        }

        let mut seen = Vec::new();
        journal
            .replay_by_time(
                "s1",
                None,
                1_700_000_000_002,
                1_700_000_000_004,
                |v| {
                    seen.push(v.seq_num);
                    true
                },
            )
            .unwrap();

        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[test]
    fn test_metadata_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        let mut e = entry(1, Direction::Outbound, b"payload");
        e.metadata = Some(b"{\"msg_type\":\"D\"}".to_vec());
        journal.write("s1", &e).unwrap();

        journal
            .replay("s1", None, 1, 1, |v| {
                assert_eq!(v.metadata, Some(b"{\"msg_type\":\"D\"}".as_slice()));
                assert_eq!(v.raw, b"payload");
                true
            })
            .unwrap();
    }

    #[test]
    fn test_latest_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();

        journal.write("a", &entry(1, Direction::Outbound, b"a1")).unwrap();
        journal.write("a", &entry(2, Direction::Outbound, b"a2")).unwrap();
        journal.write("b", &entry(1, Direction::Inbound, b"b1")).unwrap();

        assert_eq!(journal.latest("a", Direction::Outbound).unwrap().seq_num, 2);
        assert!(journal.latest("a", Direction::Inbound).is_none());
        assert_eq!(journal.entry_count(Some("a")), 2);
        assert_eq!(journal.entry_count(None), 3);
        assert_eq!(journal.stream_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unknown_stream_replay_errors() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let result = journal.replay("nope", None, 0, u32::MAX, |_| true);
        assert!(matches!(result, Err(JournalError::UnknownStream(_))));
    }

    #[test]
    fn test_segment_roll() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny segments force a roll every couple of entries
        let journal = Journal::open_with_segment_size(dir.path(), 256).unwrap();

        for seq in 1..=20 {
            journal
                .write("s1", &entry(seq, Direction::Outbound, &[seq as u8; 64]))
                .unwrap();
        }

        let mut seqs = Vec::new();
        journal
            .replay("s1", None, 1, u32::MAX, |v| {
                seqs.push(v.seq_num);
                true
            })
            .unwrap();
        let expected: Vec<u32> = (1..=20).collect();
        assert_eq!(seqs, expected);

        // More than one segment file on disk
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(files > 1, "expected rolled segments, found {} file(s)", files);
    }

    #[test]
    fn test_reopen_recovers_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = Journal::open_with_segment_size(dir.path(), 512).unwrap();
            for seq in 1..=12 {
                journal
                    .write("fix-a", &entry(seq, Direction::Outbound, &[0xAB; 48]))
                    .unwrap();
            }
        }

        // Fresh process: recover from disk
        let journal = Journal::open_with_segment_size(dir.path(), 512).unwrap();
        assert_eq!(journal.entry_count(Some("fix-a")), 12);
        assert_eq!(
            journal.latest("fix-a", Direction::Outbound).unwrap().seq_num,
            12
        );

        // Appends continue after the recovered tail
        journal.write("fix-a", &entry(13, Direction::Outbound, b"new")).unwrap();
        let mut last = 0;
        journal
            .replay("fix-a", None, 1, u32::MAX, |v| {
                last = v.seq_num;
                true
            })
            .unwrap();
        assert_eq!(last, 13);
    }
}
