//! NASDAQ OUCH order entry
//!
//! Two wire generations share this module:
//! - **4.2**: fixed-length messages, 14-char alphanumeric order tokens,
//!   4-byte prices
//! - **5.0**: variable-length messages keyed by 4-byte `UserRefNum`, an
//!   appendage count trailing the fixed block, then tagged
//!   `[tag:1][len:2 BE][data]` appendages
//!
//! Everything is big-endian. Prices carry four implied decimals;
//! timestamps are nanoseconds since UTC midnight. There is no session
//! handshake: a connected client may enter orders immediately, and there
//! is no sequence/resend layer at this level. Malformed input has no
//! reject primitive in 4.2, so framing errors drop the connection.

pub mod session;
pub mod v42;
pub mod v50;

pub use session::{Ouch42Engine, Ouch50Engine};

use thiserror::Error;

/// Four implied decimals on every OUCH price
pub const PRICE_SCALE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OuchError {
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),

    #[error("message truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("bad side byte 0x{0:02x}")]
    BadSide(u8),

    #[error("appendage overruns message: tag {tag} len {len}")]
    BadAppendage { tag: u8, len: usize },
}

/// OUCH side indicator bytes, both generations
pub mod side {
    pub const BUY: u8 = b'B';
    pub const SELL: u8 = b'S';
    pub const SELL_SHORT: u8 = b'T';
    pub const SELL_SHORT_EXEMPT: u8 = b'E';
}

/// Order state byte on Accepted/Replaced
pub mod order_state {
    pub const LIVE: u8 = b'L';
    pub const DEAD: u8 = b'D';
}

/// Canceled reason bytes
pub mod cancel_reason {
    /// User requested
    pub const USER: u8 = b'U';
    /// Immediate-or-cancel remainder
    pub const IMMEDIATE: u8 = b'I';
}

/// SystemEvent codes
pub mod system_event {
    pub const START_OF_DAY: u8 = b'S';
    pub const END_OF_DAY: u8 = b'E';
}

use mimir_core::core::Side;

pub(crate) fn side_from_wire(b: u8) -> Result<Side, OuchError> {
    match b {
        side::BUY => Ok(Side::Buy),
        side::SELL => Ok(Side::Sell),
        side::SELL_SHORT => Ok(Side::SellShort),
        side::SELL_SHORT_EXEMPT => Ok(Side::SellShortExempt),
        other => Err(OuchError::BadSide(other)),
    }
}

pub(crate) fn side_to_wire(side: Side) -> u8 {
    match side {
        Side::Buy => side::BUY,
        Side::Sell => side::SELL,
        Side::SellShort => side::SELL_SHORT,
        Side::SellShortExempt => side::SELL_SHORT_EXEMPT,
    }
}
