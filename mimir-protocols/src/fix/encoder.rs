//! Direct-buffer FIX encoder
//!
//! An encoder wraps one ring claim. `begin` pre-lays the constant header
//! prefix with fixed-width slots for BodyLength (5 digits), MsgSeqNum
//! (8 digits) and SendingTime (21 chars); application fields append as
//! `tag=value<SOH>`; `finish` back-fills the slots, computes the
//! checksum, and hands back a sealed frame to tee into the journal and
//! commit. Nothing is copied between the encoder and the socket.
//!
//! SendingTime comes from the caller's clock at finish time; it may go
//! backwards across process restarts (resent messages carry the original
//! time in OrigSendingTime instead).

use std::sync::Arc;

use mimir_core::ring::{Claim, FrameRing, RingError};
use mimir_core::session::SessionCore;
use mimir_core::time::utc_parts;

use super::{format_decimal, FixError, SOH};

/// Claim size per message; finish() truncates to the real length
pub const DEFAULT_MAX_MESSAGE: usize = 1024;

/// Per-session encoder factory carrying the constant header identity
pub struct FixEncoderFactory {
    ring: Arc<FrameRing>,
    begin_string: String,
    sender_comp_id: String,
    target_comp_id: String,
    max_message: usize,
}

impl FixEncoderFactory {
    pub fn new(
        ring: Arc<FrameRing>,
        begin_string: impl Into<String>,
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
    ) -> Self {
        Self {
            ring,
            begin_string: begin_string.into(),
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            max_message: DEFAULT_MAX_MESSAGE,
        }
    }

    /// Begin a message, assigning the next outbound sequence number
    /// inside the ring's claim critical section. On abort the caller
    /// must give the number back via `session.unclaim_seq()`.
    pub fn begin(
        &self,
        session: &SessionCore,
        msg_type: &[u8],
    ) -> Result<FixEncoder<'_>, RingError> {
        let claim = self
            .ring
            .try_claim_with(self.max_message, || session.claim_seq())?;
        Ok(self.lay_header(claim, msg_type))
    }

    /// Begin a retransmission carrying an already-assigned sequence
    /// number; the session counter is not touched.
    pub fn begin_with_seq(&self, seq: u64, msg_type: &[u8]) -> Result<FixEncoder<'_>, RingError> {
        let claim = self.ring.try_claim_with(self.max_message, || seq)?;
        Ok(self.lay_header(claim, msg_type))
    }

    fn lay_header<'a>(&self, claim: Claim<'a>, msg_type: &[u8]) -> FixEncoder<'a> {
        let mut enc = FixEncoder {
            seq: claim.seq(),
            claim,
            at: 0,
            body_start: 0,
            body_len_slot: 0,
            seq_slot: 0,
            time_slot: 0,
            tags_seen: Vec::with_capacity(24),
            error: None,
        };

        enc.raw(b"8=");
        enc.raw(self.begin_string.as_bytes());
        enc.raw(&[SOH]);
        enc.raw(b"9=");
        enc.body_len_slot = enc.at;
        enc.raw(b"00000");
        enc.raw(&[SOH]);
        enc.body_start = enc.at;
        enc.raw(b"35=");
        enc.raw(msg_type);
        enc.raw(&[SOH]);
        enc.raw(b"34=");
        enc.seq_slot = enc.at;
        enc.raw(b"00000000");
        enc.raw(&[SOH]);
        enc.raw(b"49=");
        enc.raw(self.sender_comp_id.as_bytes());
        enc.raw(&[SOH]);
        enc.raw(b"56=");
        enc.raw(self.target_comp_id.as_bytes());
        enc.raw(&[SOH]);
        enc.raw(b"52=");
        enc.time_slot = enc.at;
        enc.raw(&[b' '; 21]); // YYYYMMDD-HH:MM:SS.sss, written at finish
        enc.raw(&[SOH]);

        // Header tags count as seen for the duplicate guard
        enc.tags_seen.extend_from_slice(&[8, 9, 35, 34, 49, 56, 52]);
        enc
    }
}

/// One in-flight outbound message
pub struct FixEncoder<'a> {
    claim: Claim<'a>,
    at: usize,
    body_start: usize,
    body_len_slot: usize,
    seq_slot: usize,
    time_slot: usize,
    seq: u64,
    tags_seen: Vec<u32>,
    /// Sticky first error; surfaced at finish
    error: Option<FixError>,
}

impl<'a> FixEncoder<'a> {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append raw bytes, saturating into the sticky error on overflow
    fn raw(&mut self, bytes: &[u8]) {
        if self.error.is_some() {
            return;
        }
        let payload = self.claim.payload_mut();
        if self.at + bytes.len() > payload.len() {
            self.error = Some(FixError::EncodeOverflow);
            return;
        }
        payload[self.at..self.at + bytes.len()].copy_from_slice(bytes);
        self.at += bytes.len();
    }

    fn raw_int(&mut self, v: i64) {
        let mut buf = [0u8; 20];
        let digits = write_int(&mut buf, v);
        self.raw(digits);
    }

    fn guard(&mut self, tag: u32) {
        if self.tags_seen.contains(&tag) {
            if self.error.is_none() {
                self.error = Some(FixError::DuplicateTag(tag));
            }
        } else {
            self.tags_seen.push(tag);
        }
    }

    fn tag_prefix(&mut self, tag: u32) {
        self.guard(tag);
        self.raw_int(tag as i64);
        self.raw(b"=");
    }

    pub fn field_bytes(&mut self, tag: u32, value: &[u8]) -> &mut Self {
        self.tag_prefix(tag);
        self.raw(value);
        self.raw(&[SOH]);
        self
    }

    pub fn field_str(&mut self, tag: u32, value: &str) -> &mut Self {
        self.field_bytes(tag, value.as_bytes())
    }

    pub fn field_int(&mut self, tag: u32, value: i64) -> &mut Self {
        self.tag_prefix(tag);
        self.raw_int(value);
        self.raw(&[SOH]);
        self
    }

    pub fn field_char(&mut self, tag: u32, value: u8) -> &mut Self {
        self.field_bytes(tag, &[value])
    }

    /// Fixed-point decimal rendered with trailing zeros trimmed
    pub fn field_decimal(&mut self, tag: u32, value: i64, scale: u32) -> &mut Self {
        let s = format_decimal(value, scale);
        self.field_str(tag, &s)
    }

    /// Back-fill the slots, append the checksum, and seal.
    ///
    /// BodyLength covers `35=` through the last field; CheckSum is the
    /// byte sum from `8=` up to (not including) `10=`, mod 256, three
    /// zero-padded digits.
    pub fn finish(mut self, now_ms: u64) -> Result<SealedFix<'a>, FixError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        // MsgSeqNum: 8 zero-padded digits
        let seq = self.seq;
        write_padded(&mut self.claim.payload_mut()[self.seq_slot..self.seq_slot + 8], seq);

        // SendingTime: YYYYMMDD-HH:MM:SS.sss, digit by digit
        let p = utc_parts(now_ms);
        let slot = self.time_slot;
        {
            let out = &mut self.claim.payload_mut()[slot..slot + 21];
            write_padded(&mut out[0..4], p.year as u64);
            write_padded(&mut out[4..6], p.month as u64);
            write_padded(&mut out[6..8], p.day as u64);
            out[8] = b'-';
            write_padded(&mut out[9..11], p.hour as u64);
            out[11] = b':';
            write_padded(&mut out[12..14], p.minute as u64);
            out[14] = b':';
            write_padded(&mut out[15..17], p.second as u64);
            out[17] = b'.';
            write_padded(&mut out[18..21], p.millis as u64);
        }

        // BodyLength: bytes after `9=NNNNN<SOH>` up to the checksum
        let body_len = self.at - self.body_start;
        if body_len > 99_999 {
            return Err(FixError::EncodeOverflow);
        }
        let slot = self.body_len_slot;
        write_padded(
            &mut self.claim.payload_mut()[slot..slot + 5],
            body_len as u64,
        );

        // CheckSum over everything so far
        let sum = self.claim.payload_mut()[..self.at]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        self.raw(b"10=");
        let mut digits = [0u8; 3];
        write_padded(&mut digits, sum as u64);
        self.raw(&digits);
        self.raw(&[SOH]);
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        Ok(SealedFix {
            claim: self.claim,
            len: self.at,
            seq,
        })
    }

    /// Roll the claim back. The caller owns returning the sequence
    /// number (`SessionCore::unclaim_seq`) when one was claimed.
    pub fn abort(self) {
        self.claim.abort();
    }
}

/// A finished message: bytes are final, frame not yet published
pub struct SealedFix<'a> {
    claim: Claim<'a>,
    len: usize,
    seq: u64,
}

impl SealedFix<'_> {
    /// The complete wire bytes, BeginString through CheckSum
    pub fn bytes(&mut self) -> &[u8] {
        let len = self.len;
        &self.claim.payload_mut()[..len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Publish to the drainer
    pub fn commit(self) {
        self.claim.commit_truncated(self.len);
    }

    pub fn abort(self) {
        self.claim.abort();
    }
}

/// Render `v` into a stack buffer, returning the digit slice
fn write_int(buf: &mut [u8; 20], v: i64) -> &[u8] {
    let mut abs = v.unsigned_abs();
    let mut at = buf.len();
    loop {
        at -= 1;
        buf[at] = b'0' + (abs % 10) as u8;
        abs /= 10;
        if abs == 0 {
            break;
        }
    }
    if v < 0 {
        at -= 1;
        buf[at] = b'-';
    }
    &buf[at..]
}

/// Zero-padded right-aligned decimal into an exact-width slot
fn write_padded(slot: &mut [u8], mut v: u64) {
    for b in slot.iter_mut().rev() {
        *b = b'0' + (v % 10) as u8;
        v /= 10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::decoder::{FixMessage, FixReader};
    use crate::fix::{msg_type, tags};
    use mimir_core::core::Protocol;
    use mimir_core::ring::Drainer;
    use mimir_core::session::{LoggingListener, SessionRole};

    fn factory() -> (FixEncoderFactory, Arc<FrameRing>) {
        let ring = FrameRing::new(1 << 16, 64);
        let factory = FixEncoderFactory::new(Arc::clone(&ring), "FIX.4.2", "MIMIR", "CLIENT");
        (factory, ring)
    }

    fn session() -> SessionCore {
        SessionCore::new(
            "enc-test",
            Protocol::Fix42,
            SessionRole::Acceptor,
            30_000,
            Arc::new(LoggingListener),
        )
    }

    fn decode(bytes: &[u8]) -> FixMessage {
        let mut reader = FixReader::new();
        reader.add_data(bytes);
        let mut msg = FixMessage::default();
        assert!(reader.read_message(&mut msg).unwrap(), "decoder rejected encoder output");
        msg
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (factory, _ring) = factory();
        let core = session();

        let mut enc = factory.begin(&core, msg_type::EXECUTION_REPORT).unwrap();
        enc.field_str(tags::ORDER_ID, "123")
            .field_str(tags::CL_ORD_ID, "O1")
            .field_char(tags::EXEC_TYPE, b'0')
            .field_char(tags::ORD_STATUS, b'0')
            .field_str(tags::SYMBOL, "AAPL")
            .field_char(tags::SIDE, b'1')
            .field_int(tags::ORDER_QTY, 100)
            .field_decimal(tags::PRICE, 1_502_500, 4);
        let mut sealed = enc.finish(1_614_602_096_789).unwrap();

        let msg = decode(sealed.bytes());
        assert_eq!(msg.msg_type(), b"8");
        assert_eq!(msg.seq_num(), Some(1));
        assert_eq!(msg.get_str(tags::SENDER_COMP_ID), Some("MIMIR"));
        assert_eq!(msg.get_str(tags::TARGET_COMP_ID), Some("CLIENT"));
        assert_eq!(msg.get_str(tags::SENDING_TIME), Some("20210301-12:34:56.789"));
        assert_eq!(msg.get_decimal(tags::PRICE, 4), Some(1_502_500));
        assert_eq!(msg.get_str(tags::MSG_SEQ_NUM), Some("00000001"));
        sealed.commit();
    }

    #[test]
    fn test_checksum_matches_definition() {
        let (factory, _ring) = factory();
        let core = session();

        let enc = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
        let mut sealed = enc.finish(0).unwrap();
        let bytes = sealed.bytes().to_vec();

        // Recompute over everything before "10="
        let trailer_at = bytes.len() - 7;
        let expected = bytes[..trailer_at]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        let carried: u8 = std::str::from_utf8(&bytes[trailer_at + 3..trailer_at + 6])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(expected, carried);
    }

    #[test]
    fn test_body_length_matches_definition() {
        let (factory, _ring) = factory();
        let core = session();

        let mut enc = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
        enc.field_str(tags::TEST_REQ_ID, "PING");
        let mut sealed = enc.finish(0).unwrap();
        let bytes = sealed.bytes().to_vec();

        let msg = decode(&bytes);
        let body_len = msg.get_int(tags::BODY_LENGTH).unwrap() as usize;

        // Body spans from after "9=NNNNN<SOH>" to before "10="
        let after_9 = bytes
            .windows(2)
            .position(|w| w == [SOH, b'3'])
            .map(|p| p + 1)
            .unwrap();
        let trailer_at = bytes.len() - 7;
        assert_eq!(body_len, trailer_at - after_9);
    }

    #[test]
    fn test_sequence_claimed_in_order() {
        let (factory, _ring) = factory();
        let core = session();

        let a = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
        let b = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
        assert_eq!(a.seq(), 1);
        assert_eq!(b.seq(), 2);

        // Abort b, give the number back, next claim reuses it
        b.abort();
        core.unclaim_seq();
        let c = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
        assert_eq!(c.seq(), 2);
        a.abort();
    }

    #[test]
    fn test_begin_with_seq_for_resend() {
        let (factory, _ring) = factory();
        let core = session();
        core.set_next_outbound(10);

        let enc = factory.begin_with_seq(3, msg_type::EXECUTION_REPORT).unwrap();
        assert_eq!(enc.seq(), 3);
        let mut sealed = enc.finish(0).unwrap();
        let msg = decode(sealed.bytes());
        assert_eq!(msg.seq_num(), Some(3));

        // Counter untouched
        assert_eq!(core.peek_seq(), 10);
    }

    #[test]
    fn test_duplicate_tag_guard() {
        let (factory, _ring) = factory();
        let core = session();

        let mut enc = factory.begin(&core, msg_type::EXECUTION_REPORT).unwrap();
        enc.field_str(tags::SYMBOL, "AAPL");
        enc.field_str(tags::SYMBOL, "MSFT");
        assert!(matches!(
            enc.finish(0),
            Err(FixError::DuplicateTag(tags::SYMBOL))
        ));
        core.unclaim_seq();
    }

    #[test]
    fn test_header_tag_collision_guarded() {
        let (factory, _ring) = factory();
        let core = session();

        let mut enc = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
        enc.field_str(tags::SENDER_COMP_ID, "SPOOF");
        assert!(matches!(enc.finish(0), Err(FixError::DuplicateTag(49))));
        core.unclaim_seq();
    }

    #[test]
    fn test_frames_drain_in_seq_order() {
        let (factory, ring) = factory();
        let core = session();
        let mut drainer = Drainer::new(Arc::clone(&ring));

        for i in 0..5u64 {
            let mut enc = factory.begin(&core, msg_type::HEARTBEAT).unwrap();
            enc.field_int(tags::TEST_REQ_ID, i as i64);
            let sealed = enc.finish(0).unwrap();
            sealed.commit();
        }

        let mut seqs = Vec::new();
        drainer.drain_frames(|frame| {
            let msg = decode(frame);
            seqs.push(msg.seq_num().unwrap());
        });
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_fixt_header() {
        let ring = FrameRing::new(1 << 16, 64);
        let factory = FixEncoderFactory::new(Arc::clone(&ring), "FIXT.1.1", "MIMIR", "CLIENT");
        let core = session();

        let mut enc = factory.begin(&core, msg_type::LOGON).unwrap();
        enc.field_int(tags::HEART_BT_INT, 30)
            .field_int(tags::DEFAULT_APPL_VER_ID, 9);
        let mut sealed = enc.finish(0).unwrap();
        let msg = decode(sealed.bytes());
        assert_eq!(msg.get_str(tags::BEGIN_STRING), Some("FIXT.1.1"));
        assert_eq!(msg.get_int(tags::DEFAULT_APPL_VER_ID), Some(9));
    }
}
