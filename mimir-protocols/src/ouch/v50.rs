//! OUCH 5.0 variable-length layouts
//!
//! Orders are keyed by a client-chosen 4-byte `UserRefNum`. Every
//! message ends its fixed block with a 1-byte appendage count followed
//! by that many `[tag:1][length:2 BE][data]` appendages. Prices widen to
//! 8 bytes (still four implied decimals).

use crate::wire::{alpha, put_alpha, put_u16_be, put_u32_be, put_u64_be, u16_be, u32_be, u64_be};

use super::OuchError;

pub const SYMBOL_LEN: usize = 8;

/// Appendage tags
pub mod appendage {
    pub const PEG: u8 = 1;
    /// display qty (4) + replenish qty (4)
    pub const RESERVE: u8 = 2;
    /// discretion price (8)
    pub const DISCRETION: u8 = 3;
}

/// Fixed-block lengths (including the trailing appendage count byte)
pub const ENTER_FIXED: usize = 30;
pub const CANCEL_FIXED: usize = 10;
pub const REPLACE_FIXED: usize = 24;

pub const ACCEPTED_FIXED: usize = 46;
pub const EXECUTED_FIXED: usize = 35;
pub const CANCELED_FIXED: usize = 19;
pub const REJECTED_FIXED: usize = 16;
pub const REPLACED_FIXED: usize = 50;
pub const SYSTEM_EVENT_FIXED: usize = 11;

fn fixed_len(msg_type: u8) -> Result<usize, OuchError> {
    match msg_type {
        b'O' => Ok(ENTER_FIXED),
        b'X' => Ok(CANCEL_FIXED),
        b'U' => Ok(REPLACE_FIXED),
        other => Err(OuchError::UnknownType(other)),
    }
}

/// Iterator over the appendage region
#[derive(Debug, Clone, Copy)]
pub struct Appendages<'a> {
    buf: &'a [u8],
    at: usize,
    remaining: u8,
}

impl<'a> Appendages<'a> {
    pub fn new(region: &'a [u8], count: u8) -> Self {
        Self {
            buf: region,
            at: 0,
            remaining: count,
        }
    }
}

impl<'a> Iterator for Appendages<'a> {
    type Item = Result<(u8, &'a [u8]), OuchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.at + 3 > self.buf.len() {
            return Some(Err(OuchError::BadAppendage { tag: 0, len: 0 }));
        }
        let tag = self.buf[self.at];
        let len = u16_be(self.buf, self.at + 1) as usize;
        let start = self.at + 3;
        if start + len > self.buf.len() {
            return Some(Err(OuchError::BadAppendage { tag, len }));
        }
        self.at = start + len;
        Some(Ok((tag, &self.buf[start..start + len])))
    }
}

/// Total size of an appendage region with `count` appendages, if the
/// bytes to measure it are all present
fn appendage_region_len(buf: &[u8], count: u8) -> Option<usize> {
    let mut at = 0usize;
    for _ in 0..count {
        if at + 3 > buf.len() {
            return None;
        }
        let len = u16_be(buf, at + 1) as usize;
        at += 3 + len;
        if at > buf.len() {
            return None;
        }
    }
    Some(at)
}

#[derive(Debug)]
pub enum Inbound<'a> {
    Enter(EnterOrder<'a>),
    Cancel(CancelOrder<'a>),
    Replace(ReplaceOrder<'a>),
}

/// Frame and decode the message at the head of `buf`; `Ok(None)` means
/// more bytes are needed (possibly for appendages).
pub fn decode(buf: &[u8]) -> Result<Option<(usize, Inbound<'_>)>, OuchError> {
    let Some(&msg_type) = buf.first() else {
        return Ok(None);
    };
    let fixed = fixed_len(msg_type)?;
    if buf.len() < fixed {
        return Ok(None);
    }
    let count = buf[fixed - 1];
    let Some(app_len) = appendage_region_len(&buf[fixed..], count) else {
        return Ok(None);
    };
    let total = fixed + app_len;
    let region = &buf[..total];

    let msg = match msg_type {
        b'O' => Inbound::Enter(EnterOrder { buf: region }),
        b'X' => Inbound::Cancel(CancelOrder { buf: region }),
        b'U' => Inbound::Replace(ReplaceOrder { buf: region }),
        _ => unreachable!("fixed_len admitted the type"),
    };
    Ok(Some((total, msg)))
}

/// Enter ('O'): user-ref@1, side@5, shares@6, symbol@10, price@18,
/// tif@26, display@27, capacity@28, appendage count@29
#[derive(Debug)]
pub struct EnterOrder<'a> {
    buf: &'a [u8],
}

impl<'a> EnterOrder<'a> {
    pub fn user_ref_num(&self) -> u32 {
        u32_be(self.buf, 1)
    }

    pub fn side_byte(&self) -> u8 {
        self.buf[5]
    }

    pub fn shares(&self) -> u32 {
        u32_be(self.buf, 6)
    }

    pub fn symbol(&self) -> &'a str {
        alpha(self.buf, 10, SYMBOL_LEN)
    }

    pub fn price(&self) -> u64 {
        u64_be(self.buf, 18)
    }

    pub fn time_in_force(&self) -> u8 {
        self.buf[26]
    }

    pub fn appendages(&self) -> Appendages<'a> {
        Appendages::new(&self.buf[ENTER_FIXED..], self.buf[ENTER_FIXED - 1])
    }
}

/// Cancel ('X'): user-ref@1, quantity@5 (0 = full cancel), count@9
#[derive(Debug)]
pub struct CancelOrder<'a> {
    buf: &'a [u8],
}

impl<'a> CancelOrder<'a> {
    pub fn user_ref_num(&self) -> u32 {
        u32_be(self.buf, 1)
    }

    /// Quantity to cancel down to; zero cancels the full order
    pub fn quantity(&self) -> u32 {
        u32_be(self.buf, 5)
    }
}

/// Replace ('U'): orig user-ref@1, new user-ref@5, shares@9, price@13,
/// tif@21, display@22, count@23
#[derive(Debug)]
pub struct ReplaceOrder<'a> {
    buf: &'a [u8],
}

impl<'a> ReplaceOrder<'a> {
    pub fn orig_user_ref_num(&self) -> u32 {
        u32_be(self.buf, 1)
    }

    pub fn new_user_ref_num(&self) -> u32 {
        u32_be(self.buf, 5)
    }

    pub fn shares(&self) -> u32 {
        u32_be(self.buf, 9)
    }

    pub fn price(&self) -> u64 {
        u64_be(self.buf, 13)
    }
}

// ----------------------------------------------------------------------
// Inbound builders (tests, reference client)
// ----------------------------------------------------------------------

pub fn encode_enter(
    out: &mut [u8],
    user_ref: u32,
    side: u8,
    shares: u32,
    symbol: &str,
    price: u64,
    appendages: &[(u8, &[u8])],
) -> usize {
    out[0] = b'O';
    put_u32_be(out, 1, user_ref);
    out[5] = side;
    put_u32_be(out, 6, shares);
    put_alpha(out, 10, SYMBOL_LEN, symbol);
    put_u64_be(out, 18, price);
    out[26] = b'0'; // day
    out[27] = b'Y';
    out[28] = b'A';
    out[29] = appendages.len() as u8;
    let mut at = ENTER_FIXED;
    for (tag, data) in appendages {
        out[at] = *tag;
        put_u16_be(out, at + 1, data.len() as u16);
        out[at + 3..at + 3 + data.len()].copy_from_slice(data);
        at += 3 + data.len();
    }
    at
}

pub fn encode_cancel(out: &mut [u8], user_ref: u32, quantity: u32) -> usize {
    out[0] = b'X';
    put_u32_be(out, 1, user_ref);
    put_u32_be(out, 5, quantity);
    out[9] = 0;
    CANCEL_FIXED
}

pub fn encode_replace(
    out: &mut [u8],
    orig_user_ref: u32,
    new_user_ref: u32,
    shares: u32,
    price: u64,
) -> usize {
    out[0] = b'U';
    put_u32_be(out, 1, orig_user_ref);
    put_u32_be(out, 5, new_user_ref);
    put_u32_be(out, 9, shares);
    put_u64_be(out, 13, price);
    out[21] = b'0';
    out[22] = b'Y';
    out[23] = 0;
    REPLACE_FIXED
}

// ----------------------------------------------------------------------
// Outbound encoders (no appendages emitted; count byte is written 0)
// ----------------------------------------------------------------------

/// Accepted ('A'): ts@1, user-ref@9, side@13, shares@14, symbol@18,
/// price@26, tif@34, display@35, order-ref@36, state@44, count@45
#[allow(clippy::too_many_arguments)]
pub fn encode_accepted(
    out: &mut [u8],
    timestamp_ns: u64,
    user_ref: u32,
    side: u8,
    shares: u32,
    symbol: &str,
    price: u64,
    order_ref: u64,
    state: u8,
) -> usize {
    out[0] = b'A';
    put_u64_be(out, 1, timestamp_ns);
    put_u32_be(out, 9, user_ref);
    out[13] = side;
    put_u32_be(out, 14, shares);
    put_alpha(out, 18, SYMBOL_LEN, symbol);
    put_u64_be(out, 26, price);
    out[34] = b'0';
    out[35] = b'Y';
    put_u64_be(out, 36, order_ref);
    out[44] = state;
    out[45] = 0;
    ACCEPTED_FIXED
}

/// Executed ('E'): ts@1, user-ref@9, shares@13, price@17, liquidity@25,
/// match@26, count@34
pub fn encode_executed(
    out: &mut [u8],
    timestamp_ns: u64,
    user_ref: u32,
    executed_shares: u32,
    price: u64,
    match_number: u64,
) -> usize {
    out[0] = b'E';
    put_u64_be(out, 1, timestamp_ns);
    put_u32_be(out, 9, user_ref);
    put_u32_be(out, 13, executed_shares);
    put_u64_be(out, 17, price);
    out[25] = b'A';
    put_u64_be(out, 26, match_number);
    out[34] = 0;
    EXECUTED_FIXED
}

/// Canceled ('C'): ts@1, user-ref@9, decrement@13, reason@17, count@18
pub fn encode_canceled(
    out: &mut [u8],
    timestamp_ns: u64,
    user_ref: u32,
    decrement_shares: u32,
    reason: u8,
) -> usize {
    out[0] = b'C';
    put_u64_be(out, 1, timestamp_ns);
    put_u32_be(out, 9, user_ref);
    put_u32_be(out, 13, decrement_shares);
    out[17] = reason;
    out[18] = 0;
    CANCELED_FIXED
}

/// Rejected ('J'): ts@1, user-ref@9, reason@13 (2 bytes), count@15
pub fn encode_rejected(out: &mut [u8], timestamp_ns: u64, user_ref: u32, reason: u16) -> usize {
    out[0] = b'J';
    put_u64_be(out, 1, timestamp_ns);
    put_u32_be(out, 9, user_ref);
    put_u16_be(out, 13, reason);
    out[15] = 0;
    REJECTED_FIXED
}

/// Replaced ('U'): ts@1, orig user-ref@9, new user-ref@13, side@17,
/// shares@18, symbol@22, price@30, tif@38, display@39, order-ref@40,
/// state@48, count@49
#[allow(clippy::too_many_arguments)]
pub fn encode_replaced(
    out: &mut [u8],
    timestamp_ns: u64,
    orig_user_ref: u32,
    new_user_ref: u32,
    side: u8,
    shares: u32,
    symbol: &str,
    price: u64,
    order_ref: u64,
    state: u8,
) -> usize {
    out[0] = b'U';
    put_u64_be(out, 1, timestamp_ns);
    put_u32_be(out, 9, orig_user_ref);
    put_u32_be(out, 13, new_user_ref);
    out[17] = side;
    put_u32_be(out, 18, shares);
    put_alpha(out, 22, SYMBOL_LEN, symbol);
    put_u64_be(out, 30, price);
    out[38] = b'0';
    out[39] = b'Y';
    put_u64_be(out, 40, order_ref);
    out[48] = state;
    out[49] = 0;
    REPLACED_FIXED
}

/// SystemEvent ('S'): ts@1, event@9, count@10
pub fn encode_system_event(out: &mut [u8], timestamp_ns: u64, event: u8) -> usize {
    out[0] = b'S';
    put_u64_be(out, 1, timestamp_ns);
    out[9] = event;
    out[10] = 0;
    SYSTEM_EVENT_FIXED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_without_appendages() {
        let mut wire = [0u8; 64];
        let n = encode_enter(&mut wire, 7, b'B', 50, "AAPL", 1_500_000, &[]);
        assert_eq!(n, ENTER_FIXED);

        let (len, msg) = decode(&wire[..n]).unwrap().unwrap();
        assert_eq!(len, ENTER_FIXED);
        let Inbound::Enter(enter) = msg else {
            panic!("expected enter");
        };
        assert_eq!(enter.user_ref_num(), 7);
        assert_eq!(enter.shares(), 50);
        assert_eq!(enter.symbol(), "AAPL");
        assert_eq!(enter.price(), 1_500_000);
        assert_eq!(enter.appendages().count(), 0);
    }

    #[test]
    fn test_enter_with_appendages() {
        let reserve = [0u8, 0, 0, 100, 0, 0, 0, 50]; // display 100, replenish 50
        let discretion = 1_490_000u64.to_be_bytes();
        let mut wire = [0u8; 128];
        let n = encode_enter(
            &mut wire,
            9,
            b'S',
            500,
            "MSFT",
            3_100_000,
            &[
                (appendage::RESERVE, &reserve),
                (appendage::DISCRETION, &discretion),
            ],
        );
        assert_eq!(n, ENTER_FIXED + 3 + 8 + 3 + 8);

        let (len, msg) = decode(&wire[..n]).unwrap().unwrap();
        assert_eq!(len, n);
        let Inbound::Enter(enter) = msg else {
            panic!("expected enter");
        };

        let apps: Vec<(u8, Vec<u8>)> = enter
            .appendages()
            .map(|a| a.map(|(t, d)| (t, d.to_vec())))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].0, appendage::RESERVE);
        assert_eq!(crate::wire::u32_be(&apps[0].1, 0), 100);
        assert_eq!(crate::wire::u32_be(&apps[0].1, 4), 50);
        assert_eq!(apps[1].0, appendage::DISCRETION);
        assert_eq!(crate::wire::u64_be(&apps[1].1, 0), 1_490_000);
    }

    #[test]
    fn test_partial_appendage_waits_for_bytes() {
        let reserve = [0u8; 8];
        let mut wire = [0u8; 64];
        let n = encode_enter(&mut wire, 1, b'B', 1, "X", 1, &[(appendage::RESERVE, &reserve)]);

        // Fixed block present, appendage cut short: not decodable yet
        assert!(decode(&wire[..ENTER_FIXED + 2]).unwrap().is_none());
        assert!(decode(&wire[..n - 1]).unwrap().is_none());
        assert!(decode(&wire[..n]).unwrap().is_some());
    }

    #[test]
    fn test_cancel_roundtrip() {
        let mut wire = [0u8; CANCEL_FIXED];
        encode_cancel(&mut wire, 7, 0);

        let (_, msg) = decode(&wire).unwrap().unwrap();
        let Inbound::Cancel(cancel) = msg else {
            panic!("expected cancel");
        };
        assert_eq!(cancel.user_ref_num(), 7);
        assert_eq!(cancel.quantity(), 0);
    }

    #[test]
    fn test_replace_roundtrip() {
        let mut wire = [0u8; REPLACE_FIXED];
        encode_replace(&mut wire, 7, 8, 120, 2_250_000);

        let (_, msg) = decode(&wire).unwrap().unwrap();
        let Inbound::Replace(replace) = msg else {
            panic!("expected replace");
        };
        assert_eq!(replace.orig_user_ref_num(), 7);
        assert_eq!(replace.new_user_ref_num(), 8);
        assert_eq!(replace.shares(), 120);
        assert_eq!(replace.price(), 2_250_000);
    }

    #[test]
    fn test_canceled_layout() {
        let mut out = [0u8; CANCELED_FIXED];
        encode_canceled(&mut out, 1, 7, 50, super::super::cancel_reason::USER);
        assert_eq!(out[0], b'C');
        assert_eq!(crate::wire::u32_be(&out, 9), 7);
        assert_eq!(crate::wire::u32_be(&out, 13), 50);
        assert_eq!(out[17], b'U');
    }
}
