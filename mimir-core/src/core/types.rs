//! Zero-overhead canonical types
//!
//! All enums here are `repr(u8)` and `Copy`; the wire codecs map them to
//! their protocol-specific encodings (FIX side chars, OUCH indicator
//! bytes, SBE status fields) at the dispatcher boundary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which wire dialect a session speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Protocol {
    Fix42 = 0,
    Fix44 = 1,
    Fix50 = 2,
    Ouch42 = 3,
    Ouch50 = 4,
    Ilink3 = 5,
    Optiq = 6,
    Pillar = 7,
}

impl Protocol {
    /// True for the FIX tag=value family (as opposed to the binary family)
    #[inline]
    pub const fn is_fix(&self) -> bool {
        matches!(self, Protocol::Fix42 | Protocol::Fix44 | Protocol::Fix50)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Protocol::Fix42 => "FIX.4.2",
            Protocol::Fix44 => "FIX.4.4",
            Protocol::Fix50 => "FIX.5.0",
            Protocol::Ouch42 => "OUCH.4.2",
            Protocol::Ouch50 => "OUCH.5.0",
            Protocol::Ilink3 => "ILINK.3",
            Protocol::Optiq => "OPTIQ",
            Protocol::Pillar => "PILLAR",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order side
///
/// Single byte enum for minimal size. Short-sale variants exist because
/// FIX and OUCH both carry them; the binary protocols that only know
/// buy/sell map the short variants to sell on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
    SellShort = 2,
    SellShortExempt = 3,
}

impl Side {
    /// True for any sell variant
    #[inline]
    pub const fn is_sell(&self) -> bool {
        !matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
            Side::SellShort => write!(f, "SELL_SHORT"),
            Side::SellShortExempt => write!(f, "SELL_SHORT_EXEMPT"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum OrdType {
    Market = 0,
    Limit = 1,
    Stop = 2,
    StopLimit = 3,
}

impl OrdType {
    /// True when the type carries a limit price
    #[inline]
    pub const fn has_limit_price(&self) -> bool {
        matches!(self, OrdType::Limit | OrdType::StopLimit)
    }
}

/// Order lifecycle state
///
/// Transitions are monotone through
/// `New -> Accepted -> (PartiallyFilled)* -> {Filled, Canceled, Replaced}`
/// or `New -> Rejected`; the transition methods on [`crate::book::Order`]
/// enforce the graph and return `false` on an illegal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum OrderState {
    New = 0,
    Accepted = 1,
    PartiallyFilled = 2,
    Filled = 3,
    Canceled = 4,
    Rejected = 5,
    Replaced = 6,
}

impl OrderState {
    /// Terminal states admit no further transitions
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected | OrderState::Replaced
        )
    }

    /// States in which a fill may still be applied
    #[inline]
    pub const fn is_live(&self) -> bool {
        matches!(self, OrderState::Accepted | OrderState::PartiallyFilled)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::New => "NEW",
            OrderState::Accepted => "ACCEPTED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Canceled => "CANCELED",
            OrderState::Rejected => "REJECTED",
            OrderState::Replaced => "REPLACED",
        };
        f.write_str(s)
    }
}

/// Message direction relative to the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Direction {
    Inbound = 0,
    Outbound = 1,
}

impl Direction {
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Direction::Inbound),
            1 => Some(Direction::Outbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "IN"),
            Direction::Outbound => write!(f, "OUT"),
        }
    }
}

/// Process-wide monotonic exchange-assigned order id source
///
/// Shared by every dispatcher so exchange ids are unique across protocol
/// families. Starts at 1; 0 is reserved as "no id".
#[derive(Debug)]
pub struct ExchangeIdAllocator {
    next: AtomicU64,
}

impl ExchangeIdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Highest id allocated so far (0 when none)
    pub fn last_issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed).saturating_sub(1)
    }
}

impl Default for ExchangeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
