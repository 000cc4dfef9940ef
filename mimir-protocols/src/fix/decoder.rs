//! Streaming FIX reassembler and indexed message view

use super::{parse_decimal, parse_int, FixError, SOH};

/// Hard ceiling on one message; BodyLength beyond this is a framing error
pub const MAX_MESSAGE: usize = 16 * 1024;

/// Header peek: enough bytes to see `8=FIXT.1.1<SOH>9=NNNNN<SOH>`
const HEADER_PEEK: usize = 24;

/// Checksum trailer `10=nnn<SOH>`
const TRAILER: usize = 7;

/// Read-only view of one complete message
///
/// Holds a private copy of the wire bytes plus an index of
/// tag -> [value start, value end) positions. Field access walks the
/// index; numeric parsing walks the bytes. Views are pooled and reused
/// via [`reset`](FixMessage::reset).
#[derive(Debug, Default)]
pub struct FixMessage {
    data: Vec<u8>,
    fields: Vec<(u32, u32, u32)>,
    /// Cached during indexing: MsgType value range
    msg_type_range: (u32, u32),
    /// Cached during indexing: MsgSeqNum (tag 34)
    seq_num: Option<u64>,
}

impl FixMessage {
    /// Entire message, BeginString through CheckSum
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.fields.clear();
        self.msg_type_range = (0, 0);
        self.seq_num = None;
    }

    /// First occurrence of `tag`
    pub fn get(&self, tag: u32) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(t, _, _)| *t == tag)
            .map(|&(_, s, e)| &self.data[s as usize..e as usize])
    }

    pub fn has(&self, tag: u32) -> bool {
        self.fields.iter().any(|(t, _, _)| *t == tag)
    }

    /// Every tag in wire order (duplicates included)
    pub fn field_tags(&self) -> impl Iterator<Item = u32> + '_ {
        self.fields.iter().map(|&(t, _, _)| t)
    }

    pub fn get_str(&self, tag: u32) -> Option<&str> {
        std::str::from_utf8(self.get(tag)?).ok()
    }

    pub fn get_int(&self, tag: u32) -> Option<i64> {
        parse_int(self.get(tag)?)
    }

    pub fn get_u64(&self, tag: u32) -> Option<u64> {
        let v = self.get_int(tag)?;
        u64::try_from(v).ok()
    }

    pub fn get_char(&self, tag: u32) -> Option<u8> {
        match self.get(tag)? {
            [c] => Some(*c),
            _ => None,
        }
    }

    /// Fixed-point decimal with `scale` implied decimals
    pub fn get_decimal(&self, tag: u32, scale: u32) -> Option<i64> {
        parse_decimal(self.get(tag)?, scale)
    }

    /// `Y`-flag fields (PossDupFlag, GapFillFlag, ResetSeqNumFlag)
    pub fn flag(&self, tag: u32) -> bool {
        self.get(tag) == Some(b"Y")
    }

    pub fn msg_type(&self) -> &[u8] {
        let (s, e) = self.msg_type_range;
        &self.data[s as usize..e as usize]
    }

    pub fn seq_num(&self) -> Option<u64> {
        self.seq_num
    }

    /// Populate from one complete framed message
    fn index(&mut self, bytes: &[u8]) -> Result<(), FixError> {
        self.reset();
        self.data.extend_from_slice(bytes);

        let mut at = 0usize;
        while at < self.data.len() {
            let tag_start = at;
            let mut tag: u32 = 0;
            while at < self.data.len() && self.data[at] != b'=' {
                let b = self.data[at];
                if !b.is_ascii_digit() {
                    return Err(FixError::BadFraming {
                        at: tag_start,
                        expected: "numeric tag",
                    });
                }
                tag = tag
                    .checked_mul(10)
                    .and_then(|t| t.checked_add((b - b'0') as u32))
                    .ok_or(FixError::BadFraming {
                        at: tag_start,
                        expected: "tag fits u32",
                    })?;
                at += 1;
            }
            if at >= self.data.len() {
                return Err(FixError::BadFraming {
                    at,
                    expected: "'=' after tag",
                });
            }
            at += 1; // '='
            let value_start = at;
            while at < self.data.len() && self.data[at] != SOH {
                at += 1;
            }
            if at >= self.data.len() {
                return Err(FixError::BadFraming {
                    at,
                    expected: "SOH after value",
                });
            }
            self.fields.push((tag, value_start as u32, at as u32));

            match tag {
                super::tags::MSG_TYPE => {
                    self.msg_type_range = (value_start as u32, at as u32);
                }
                super::tags::MSG_SEQ_NUM => {
                    self.seq_num = parse_int(&self.data[value_start..at])
                        .and_then(|v| u64::try_from(v).ok());
                }
                _ => {}
            }
            at += 1; // SOH
        }

        if self.msg_type_range == (0, 0) {
            return Err(FixError::MissingTag(super::tags::MSG_TYPE));
        }
        Ok(())
    }
}

/// Streaming reassembler over a raw byte feed
///
/// Feed bytes with [`add_data`](FixReader::add_data); pull complete
/// messages with [`read_message`](FixReader::read_message).
/// [`bytes_needed`](FixReader::bytes_needed) hints how much more input
/// would allow progress.
#[derive(Debug, Default)]
pub struct FixReader {
    buf: Vec<u8>,
}

impl FixReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Hint: header peek size until BodyLength is visible, then the exact
    /// remainder of the in-flight message.
    pub fn bytes_needed(&self) -> usize {
        match self.frame_total() {
            Ok(Some(total)) => total.saturating_sub(self.buf.len()),
            _ => HEADER_PEEK.saturating_sub(self.buf.len()).max(1),
        }
    }

    /// Total framed size of the message at the buffer head, if the header
    /// is complete enough to know.
    fn frame_total(&self) -> Result<Option<usize>, FixError> {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Ok(None);
        }
        if &buf[..2] != b"8=" {
            return Err(FixError::BadFraming {
                at: 0,
                expected: "8=BeginString",
            });
        }
        let Some(soh1) = buf.iter().position(|&b| b == SOH) else {
            return Ok(None);
        };
        let after = soh1 + 1;
        if buf.len() < after + 2 {
            return Ok(None);
        }
        if &buf[after..after + 2] != b"9=" {
            return Err(FixError::BadFraming {
                at: after,
                expected: "9=BodyLength",
            });
        }
        let Some(rel_soh2) = buf[after..].iter().position(|&b| b == SOH) else {
            return Ok(None);
        };
        let body_len = parse_int(&buf[after + 2..after + rel_soh2])
            .and_then(|v| usize::try_from(v).ok())
            .ok_or(FixError::BadValue(super::tags::BODY_LENGTH))?;
        if body_len > MAX_MESSAGE {
            return Err(FixError::BodyTooLarge(body_len));
        }
        let header_end = after + rel_soh2 + 1;
        Ok(Some(header_end + body_len + TRAILER))
    }

    /// Extract the next complete message into `msg`. Returns false when
    /// more bytes are needed. On framing/checksum errors the reader's
    /// buffer is poisoned and the session should disconnect.
    pub fn read_message(&mut self, msg: &mut FixMessage) -> Result<bool, FixError> {
        let Some(total) = self.frame_total()? else {
            return Ok(false);
        };
        if self.buf.len() < total {
            return Ok(false);
        }

        let frame = &self.buf[..total];
        let trailer = &frame[total - TRAILER..];
        if &trailer[..3] != b"10=" || trailer[6] != SOH {
            return Err(FixError::BadFraming {
                at: total - TRAILER,
                expected: "10=nnn trailer",
            });
        }
        let carried = parse_int(&trailer[3..6]).ok_or(FixError::BadValue(10))? as u8;
        let computed = frame[..total - TRAILER]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        if computed != carried {
            // The frame is well-delimited, just garbled: skip it so the
            // session can reject and continue on the next message.
            self.buf.drain(..total);
            return Err(FixError::BadChecksum { computed, carried });
        }

        msg.index(frame)?;
        self.buf.drain(..total);
        Ok(true)
    }
}
