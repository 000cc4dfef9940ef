//! Canonical order-entry types shared by every protocol family
//!
//! The per-protocol codecs translate their wire representations into and
//! out of these types; the registry, fill engine and journal only ever see
//! this vocabulary:
//! - `Side` / `OrdType` / `OrderState`: single-byte enums
//! - `Protocol`: which wire dialect a session speaks
//! - `ExchangeIdAllocator`: process-wide monotonic id source

pub mod errors;
pub mod types;

pub use errors::{BufferError, JournalError, RingError, SessionError};
pub use types::{
    Direction, ExchangeIdAllocator, OrdType, OrderState, Protocol, Side,
};
