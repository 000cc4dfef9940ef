//! FIX 4.2 / 4.4 / 5.0 tag=value protocol
//!
//! The decoder is a streaming reassembler: it frames messages on
//! BodyLength (tag 9) plus the `10=nnn<SOH>` trailer, verifies the
//! checksum, and exposes an indexed tag -> value-range view over the raw
//! bytes; integers and decimals parse by walking bytes, no intermediate
//! strings. The encoder writes straight into a claimed ring region with
//! fixed-width slots for BodyLength, MsgSeqNum and SendingTime that are
//! back-filled at send time.
//!
//! The session runtime implements the acceptor side of the full session
//! layer: logon with CompID validation, heartbeat / test-request ladder,
//! gap detection with ResendRequest, journal-backed retransmission with
//! PossDupFlag + OrigSendingTime and admin gap-fill, SequenceReset in
//! both modes, and reset-on-logon semantics.

pub mod decoder;
pub mod dispatcher;
pub mod encoder;
pub mod session;

pub use decoder::{FixMessage, FixReader};
pub use encoder::FixEncoder;
pub use session::FixEngine;

use thiserror::Error;

/// Field separator
pub const SOH: u8 = 0x01;

/// Price scale: 4 implied decimals, the finest any supported FIX venue
/// quotes in
pub const PRICE_SCALE: u32 = 4;

/// Header/trailer and session-level tags
pub mod tags {
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const CHECK_SUM: u32 = 10;
    pub const CL_ORD_ID: u32 = 11;
    pub const CUM_QTY: u32 = 14;
    pub const EXEC_ID: u32 = 17;
    pub const EXEC_TRANS_TYPE: u32 = 20;
    pub const LAST_PX: u32 = 31;
    pub const LAST_SHARES: u32 = 32;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const MSG_TYPE: u32 = 35;
    pub const NEW_SEQ_NO: u32 = 36;
    pub const ORDER_ID: u32 = 37;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORD_TYPE: u32 = 40;
    pub const ORIG_CL_ORD_ID: u32 = 41;
    pub const POSS_DUP_FLAG: u32 = 43;
    pub const PRICE: u32 = 44;
    pub const REF_SEQ_NUM: u32 = 45;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const SENDING_TIME: u32 = 52;
    pub const SIDE: u32 = 54;
    pub const SYMBOL: u32 = 55;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const TEXT: u32 = 58;
    pub const AVG_PX: u32 = 6;
    pub const BEGIN_SEQ_NO: u32 = 7;
    pub const END_SEQ_NO: u32 = 16;
    pub const CXL_REJ_REASON: u32 = 102;
    pub const HEART_BT_INT: u32 = 108;
    pub const TEST_REQ_ID: u32 = 112;
    pub const ORIG_SENDING_TIME: u32 = 122;
    pub const GAP_FILL_FLAG: u32 = 123;
    pub const RESET_SEQ_NUM_FLAG: u32 = 141;
    pub const EXEC_TYPE: u32 = 150;
    pub const LEAVES_QTY: u32 = 151;
    pub const SESSION_REJECT_REASON: u32 = 373;
    pub const REF_MSG_TYPE: u32 = 372;
    pub const BUSINESS_REJECT_REASON: u32 = 380;
    pub const CXL_REJ_RESPONSE_TO: u32 = 434;
    pub const APPL_VER_ID: u32 = 1128;
    pub const DEFAULT_APPL_VER_ID: u32 = 1137;
}

/// Message types (tag 35)
pub mod msg_type {
    pub const HEARTBEAT: &[u8] = b"0";
    pub const TEST_REQUEST: &[u8] = b"1";
    pub const RESEND_REQUEST: &[u8] = b"2";
    pub const REJECT: &[u8] = b"3";
    pub const SEQUENCE_RESET: &[u8] = b"4";
    pub const LOGOUT: &[u8] = b"5";
    pub const EXECUTION_REPORT: &[u8] = b"8";
    pub const ORDER_CANCEL_REJECT: &[u8] = b"9";
    pub const LOGON: &[u8] = b"A";
    pub const NEW_ORDER_SINGLE: &[u8] = b"D";
    pub const ORDER_CANCEL_REQUEST: &[u8] = b"F";
    pub const ORDER_CANCEL_REPLACE: &[u8] = b"G";
    pub const ORDER_STATUS_REQUEST: &[u8] = b"H";
    pub const BUSINESS_REJECT: &[u8] = b"j";

    /// Admin message types never retransmit verbatim; they gap-fill
    pub fn is_admin(mt: &[u8]) -> bool {
        matches!(mt, b"0" | b"1" | b"2" | b"3" | b"4" | b"5" | b"A")
    }
}

/// ExecType / OrdStatus values shared by 4.2+ (char fields)
pub mod exec {
    pub const NEW: u8 = b'0';
    pub const PARTIAL_FILL: u8 = b'1';
    pub const FILL: u8 = b'2';
    pub const CANCELED: u8 = b'4';
    pub const REPLACED: u8 = b'5';
    pub const REJECTED: u8 = b'8';
    /// FIX 4.4+ ExecType for any trade
    pub const TRADE: u8 = b'F';
}

/// SessionRejectReason (tag 373) values the simulator emits
pub mod session_reject {
    pub const REQUIRED_TAG_MISSING: u32 = 1;
    pub const COMP_ID_PROBLEM: u32 = 9;
    pub const INVALID_MSG_TYPE: u32 = 11;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixError {
    /// Bytes do not start a FIX message where one must begin
    #[error("bad framing at byte {at}: expected {expected}")]
    BadFraming { at: usize, expected: &'static str },

    #[error("checksum mismatch: computed {computed:03}, message carried {carried:03}")]
    BadChecksum { computed: u8, carried: u8 },

    #[error("missing required tag {0}")]
    MissingTag(u32),

    #[error("malformed value for tag {0}")]
    BadValue(u32),

    #[error("duplicate tag {0} in one message")]
    DuplicateTag(u32),

    /// BodyLength claims more than the reader will buffer
    #[error("body length {0} exceeds maximum message size")]
    BodyTooLarge(usize),

    #[error("encoder overflow: message exceeds claimed region")]
    EncodeOverflow,
}

/// Parse an ASCII integer without allocating. Accepts a leading minus.
pub fn parse_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return None;
    }
    let (neg, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    Some(if neg { -value } else { value })
}

/// Parse an ASCII decimal into fixed-point with `scale` implied decimals.
/// `"150.25"` at scale 4 is `1_502_500`. Excess fractional digits are an
/// error, not a silent truncation.
pub fn parse_decimal(bytes: &[u8], scale: u32) -> Option<i64> {
    let (neg, rest) = match bytes.first()? {
        b'-' => (true, &bytes[1..]),
        _ => (false, bytes),
    };

    let dot = rest.iter().position(|&b| b == b'.');
    let (int_part, frac_part) = match dot {
        Some(at) => (&rest[..at], &rest[at + 1..]),
        None => (rest, &rest[rest.len()..]),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > scale as usize {
        return None;
    }

    let mut value: i64 = 0;
    for &b in int_part {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    for &b in frac_part {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    for _ in 0..(scale as usize - frac_part.len()) {
        value = value.checked_mul(10)?;
    }
    Some(if neg { -value } else { value })
}

/// Render fixed-point as a decimal string, trimming trailing fractional
/// zeros (`1_500_000` at scale 4 renders `150`).
pub fn format_decimal(value: i64, scale: u32) -> String {
    let factor = 10i64.pow(scale);
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let int = abs / factor as u64;
    let frac = abs % factor as u64;
    if frac == 0 {
        return format!("{sign}{int}");
    }
    let mut frac_str = format!("{:0width$}", frac, width = scale as usize);
    while frac_str.ends_with('0') {
        frac_str.pop();
    }
    format!("{sign}{int}.{frac_str}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(b"0"), Some(0));
        assert_eq!(parse_int(b"12345"), Some(12345));
        assert_eq!(parse_int(b"-42"), Some(-42));
        assert_eq!(parse_int(b""), None);
        assert_eq!(parse_int(b"-"), None);
        assert_eq!(parse_int(b"12a"), None);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"150.00", 4), Some(1_500_000));
        assert_eq!(parse_decimal(b"150", 4), Some(1_500_000));
        assert_eq!(parse_decimal(b"150.2575", 4), Some(1_502_575));
        assert_eq!(parse_decimal(b"0.0001", 4), Some(1));
        assert_eq!(parse_decimal(b"-3.5", 4), Some(-35_000));
        assert_eq!(parse_decimal(b".5", 4), Some(5_000));
        assert_eq!(parse_decimal(b"150.", 4), Some(1_500_000));
        // Five decimals cannot fit scale 4
        assert_eq!(parse_decimal(b"1.00001", 4), None);
        assert_eq!(parse_decimal(b"", 4), None);
        assert_eq!(parse_decimal(b"1.2.3", 4), None);
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1_500_000, 4), "150");
        assert_eq!(format_decimal(1_502_500, 4), "150.25");
        assert_eq!(format_decimal(1, 4), "0.0001");
        assert_eq!(format_decimal(-35_000, 4), "-3.5");
        assert_eq!(format_decimal(0, 4), "0");
    }

    #[test]
    fn test_decimal_roundtrip() {
        for v in [0i64, 1, 12_345_678, -900_000, 1_502_575] {
            let s = format_decimal(v, 4);
            assert_eq!(parse_decimal(s.as_bytes(), 4), Some(v), "value {v} via {s}");
        }
    }

    #[test]
    fn test_admin_classification() {
        assert!(msg_type::is_admin(b"A"));
        assert!(msg_type::is_admin(b"0"));
        assert!(msg_type::is_admin(b"4"));
        assert!(!msg_type::is_admin(b"D"));
        assert!(!msg_type::is_admin(b"8"));
        assert!(!msg_type::is_admin(b"j"));
    }
}
