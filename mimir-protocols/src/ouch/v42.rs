//! OUCH 4.2 fixed-length layouts
//!
//! Inbound: Enter ('O', 49 bytes), Cancel ('X', 19), Replace ('U', 47).
//! Outbound: Accepted ('A', 65), Executed ('E', 40), Canceled ('C', 28),
//! Rejected ('J', 24), Replaced ('U', 79), SystemEvent ('S', 10).
//! Decoded inbound messages are flyweights over the read buffer.

use crate::wire::{alpha, put_alpha, put_u32_be, put_u64_be, u32_be};

use super::OuchError;

pub const TOKEN_LEN: usize = 14;
pub const SYMBOL_LEN: usize = 8;
pub const FIRM_LEN: usize = 4;

pub const ENTER_LEN: usize = 49;
pub const CANCEL_LEN: usize = 19;
pub const REPLACE_LEN: usize = 47;

pub const ACCEPTED_LEN: usize = 65;
pub const EXECUTED_LEN: usize = 40;
pub const CANCELED_LEN: usize = 28;
pub const REJECTED_LEN: usize = 24;
pub const REPLACED_LEN: usize = 79;
pub const SYSTEM_EVENT_LEN: usize = 10;

/// Inbound message length by type byte
pub fn inbound_len(msg_type: u8) -> Result<usize, OuchError> {
    match msg_type {
        b'O' => Ok(ENTER_LEN),
        b'X' => Ok(CANCEL_LEN),
        b'U' => Ok(REPLACE_LEN),
        other => Err(OuchError::UnknownType(other)),
    }
}

/// One decoded inbound message, borrowing the read buffer
#[derive(Debug)]
pub enum Inbound<'a> {
    Enter(EnterOrder<'a>),
    Cancel(CancelOrder<'a>),
    Replace(ReplaceOrder<'a>),
}

/// Frame and decode the message at the head of `buf`.
/// `Ok(None)` means incomplete; feed more bytes.
pub fn decode(buf: &[u8]) -> Result<Option<(usize, Inbound<'_>)>, OuchError> {
    let Some(&msg_type) = buf.first() else {
        return Ok(None);
    };
    let need = inbound_len(msg_type)?;
    if buf.len() < need {
        return Ok(None);
    }
    let region = &buf[..need];
    let msg = match msg_type {
        b'O' => Inbound::Enter(EnterOrder { buf: region }),
        b'X' => Inbound::Cancel(CancelOrder { buf: region }),
        b'U' => Inbound::Replace(ReplaceOrder { buf: region }),
        _ => unreachable!("inbound_len admitted the type"),
    };
    Ok(Some((need, msg)))
}

/// Enter Order ('O'): token@1, side@15, shares@16, symbol@20, price@28,
/// tif@32, firm@36, display@40, capacity@41, min-qty@42, iso@46,
/// cross@47, customer@48
#[derive(Debug)]
pub struct EnterOrder<'a> {
    buf: &'a [u8],
}

impl<'a> EnterOrder<'a> {
    pub fn token(&self) -> &'a str {
        alpha(self.buf, 1, TOKEN_LEN)
    }

    pub fn side_byte(&self) -> u8 {
        self.buf[15]
    }

    pub fn shares(&self) -> u32 {
        u32_be(self.buf, 16)
    }

    pub fn symbol(&self) -> &'a str {
        alpha(self.buf, 20, SYMBOL_LEN)
    }

    /// Four implied decimals
    pub fn price(&self) -> u32 {
        u32_be(self.buf, 28)
    }

    pub fn time_in_force(&self) -> u32 {
        u32_be(self.buf, 32)
    }

    pub fn firm(&self) -> &'a str {
        alpha(self.buf, 36, FIRM_LEN)
    }

    pub fn display(&self) -> u8 {
        self.buf[40]
    }

    pub fn capacity(&self) -> u8 {
        self.buf[41]
    }

    pub fn min_qty(&self) -> u32 {
        u32_be(self.buf, 42)
    }

    pub fn intermarket_sweep(&self) -> u8 {
        self.buf[46]
    }

    pub fn cross_type(&self) -> u8 {
        self.buf[47]
    }

    pub fn customer_type(&self) -> u8 {
        self.buf[48]
    }
}

/// Build an Enter Order, for tests and the reference client
#[allow(clippy::too_many_arguments)]
pub fn encode_enter(
    out: &mut [u8],
    token: &str,
    side: u8,
    shares: u32,
    symbol: &str,
    price: u32,
    tif: u32,
    firm: &str,
) -> usize {
    out[..ENTER_LEN].fill(b' ');
    out[0] = b'O';
    put_alpha(out, 1, TOKEN_LEN, token);
    out[15] = side;
    put_u32_be(out, 16, shares);
    put_alpha(out, 20, SYMBOL_LEN, symbol);
    put_u32_be(out, 28, price);
    put_u32_be(out, 32, tif);
    put_alpha(out, 36, FIRM_LEN, firm);
    out[40] = b'Y'; // display
    out[41] = b'A'; // agency capacity
    put_u32_be(out, 42, 0); // min qty
    out[46] = b'N'; // not an ISO
    out[47] = b'N'; // no cross
    out[48] = b'R'; // retail customer
    ENTER_LEN
}

/// Cancel Order ('X'): token@1, shares@15 (cancel down to; 0 = cancel all)
#[derive(Debug)]
pub struct CancelOrder<'a> {
    buf: &'a [u8],
}

impl<'a> CancelOrder<'a> {
    pub fn token(&self) -> &'a str {
        alpha(self.buf, 1, TOKEN_LEN)
    }

    pub fn shares(&self) -> u32 {
        u32_be(self.buf, 15)
    }
}

pub fn encode_cancel(out: &mut [u8], token: &str, shares: u32) -> usize {
    out[0] = b'X';
    put_alpha(out, 1, TOKEN_LEN, token);
    put_u32_be(out, 15, shares);
    CANCEL_LEN
}

/// Replace Order ('U' in): existing token@1, new token@15, shares@29,
/// price@33, tif@37, display@41, iso@42, min-qty@43
#[derive(Debug)]
pub struct ReplaceOrder<'a> {
    buf: &'a [u8],
}

impl<'a> ReplaceOrder<'a> {
    pub fn existing_token(&self) -> &'a str {
        alpha(self.buf, 1, TOKEN_LEN)
    }

    pub fn new_token(&self) -> &'a str {
        alpha(self.buf, 15, TOKEN_LEN)
    }

    pub fn shares(&self) -> u32 {
        u32_be(self.buf, 29)
    }

    pub fn price(&self) -> u32 {
        u32_be(self.buf, 33)
    }

    pub fn time_in_force(&self) -> u32 {
        u32_be(self.buf, 37)
    }
}

pub fn encode_replace(
    out: &mut [u8],
    existing_token: &str,
    new_token: &str,
    shares: u32,
    price: u32,
) -> usize {
    out[..REPLACE_LEN].fill(b' ');
    out[0] = b'U';
    put_alpha(out, 1, TOKEN_LEN, existing_token);
    put_alpha(out, 15, TOKEN_LEN, new_token);
    put_u32_be(out, 29, shares);
    put_u32_be(out, 33, price);
    put_u32_be(out, 37, 0); // tif
    out[41] = b'Y';
    out[42] = b'N';
    put_u32_be(out, 43, 0);
    REPLACE_LEN
}

// ----------------------------------------------------------------------
// Outbound encoders. Each writes its full fixed layout and returns the
// message length.
// ----------------------------------------------------------------------

/// Accepted ('A'): ts@1, token@9, side@23, shares@24, symbol@28,
/// price@36, tif@40, firm@44, display@48, order-ref@49, capacity@57,
/// iso@58, min-qty@59, cross@63, state@64
#[allow(clippy::too_many_arguments)]
pub fn encode_accepted(
    out: &mut [u8],
    timestamp_ns: u64,
    token: &str,
    side: u8,
    shares: u32,
    symbol: &str,
    price: u32,
    tif: u32,
    firm: &str,
    order_ref: u64,
    state: u8,
) -> usize {
    out[..ACCEPTED_LEN].fill(b' ');
    out[0] = b'A';
    put_u64_be(out, 1, timestamp_ns);
    put_alpha(out, 9, TOKEN_LEN, token);
    out[23] = side;
    put_u32_be(out, 24, shares);
    put_alpha(out, 28, SYMBOL_LEN, symbol);
    put_u32_be(out, 36, price);
    put_u32_be(out, 40, tif);
    put_alpha(out, 44, FIRM_LEN, firm);
    out[48] = b'Y';
    put_u64_be(out, 49, order_ref);
    out[57] = b'A';
    out[58] = b'N';
    put_u32_be(out, 59, 0);
    out[63] = b'N';
    out[64] = state;
    ACCEPTED_LEN
}

/// Executed ('E'): ts@1, token@9, executed shares@23, price@27,
/// liquidity@31, match number@32
pub fn encode_executed(
    out: &mut [u8],
    timestamp_ns: u64,
    token: &str,
    executed_shares: u32,
    price: u32,
    match_number: u64,
) -> usize {
    out[0] = b'E';
    put_u64_be(out, 1, timestamp_ns);
    put_alpha(out, 9, TOKEN_LEN, token);
    put_u32_be(out, 23, executed_shares);
    put_u32_be(out, 27, price);
    out[31] = b'A'; // added liquidity
    put_u64_be(out, 32, match_number);
    EXECUTED_LEN
}

/// Canceled ('C'): ts@1, token@9, decrement shares@23, reason@27
pub fn encode_canceled(
    out: &mut [u8],
    timestamp_ns: u64,
    token: &str,
    decrement_shares: u32,
    reason: u8,
) -> usize {
    out[0] = b'C';
    put_u64_be(out, 1, timestamp_ns);
    put_alpha(out, 9, TOKEN_LEN, token);
    put_u32_be(out, 23, decrement_shares);
    out[27] = reason;
    CANCELED_LEN
}

/// Rejected ('J'): ts@1, token@9, reason@23
pub fn encode_rejected(out: &mut [u8], timestamp_ns: u64, token: &str, reason: u8) -> usize {
    out[0] = b'J';
    put_u64_be(out, 1, timestamp_ns);
    put_alpha(out, 9, TOKEN_LEN, token);
    out[23] = reason;
    REJECTED_LEN
}

/// Replaced ('U' out): Accepted layout for the replacement, then the
/// previous token@65
#[allow(clippy::too_many_arguments)]
pub fn encode_replaced(
    out: &mut [u8],
    timestamp_ns: u64,
    new_token: &str,
    side: u8,
    shares: u32,
    symbol: &str,
    price: u32,
    firm: &str,
    order_ref: u64,
    state: u8,
    previous_token: &str,
) -> usize {
    encode_accepted(
        out, timestamp_ns, new_token, side, shares, symbol, price, 0, firm, order_ref, state,
    );
    out[0] = b'U';
    put_alpha(out, 65, TOKEN_LEN, previous_token);
    REPLACED_LEN
}

/// SystemEvent ('S'): ts@1, event code@9
pub fn encode_system_event(out: &mut [u8], timestamp_ns: u64, event: u8) -> usize {
    out[0] = b'S';
    put_u64_be(out, 1, timestamp_ns);
    out[9] = event;
    SYSTEM_EVENT_LEN
}
