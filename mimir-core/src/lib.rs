//! Mimir Core - Multi-Protocol Exchange Simulator Runtime
//!
//! Mimir terminates institutional order-entry sessions (FIX, OUCH, iLink 3,
//! Optiq, Pillar) and answers as the exchange would: acknowledging orders,
//! emitting fills from configurable probabilistic rules, and handling
//! cancel / replace / status traffic. This crate is the protocol-agnostic
//! center; the per-protocol codecs and dispatchers live in
//! `mimir-protocols`.
//!
//! ## Architecture
//! - **Zero-copy outbound path**: encoders write wire bytes straight into a
//!   claim/commit frame ring; the drainer hands committed regions to the
//!   socket without intermediate copies
//! - **Single reader thread per engine**: the thread that reads bytes also
//!   decodes, dispatches and mutates session state for its connections
//! - **Append-only journal**: every admin and application message, both
//!   directions, is durable before processing continues
//!
//! ## Core Modules
//! - `core`: canonical order/side/state types, exchange id allocation
//! - `buffer`: position/limit wire buffer with absolute typed accessors
//! - `ring`: MPSC claim/commit frame ring feeding the socket drainer
//! - `journal`: segmented memory-mapped per-stream message log
//! - `book`: live-order registry with dual indexing
//! - `fill`: rule-based probabilistic fill engine
//! - `session`: protocol-agnostic session state machine and timers
//! - `net`: non-blocking TCP event loop, one thread per engine

pub mod core;

pub mod buffer;
pub mod ring;
pub mod journal;
pub mod book;
pub mod fill;
pub mod session;
pub mod pool;
pub mod net;
pub mod config;
pub mod time;

// Re-export core types
pub use crate::core::{
    Direction, ExchangeIdAllocator, OrdType, OrderState, Protocol, Side,
};

pub use book::{Order, OrderRegistry};
pub use buffer::ByteBuffer;
pub use fill::{FillDecision, FillEngine, FillRule};
pub use journal::{Journal, JournalEntry};
pub use ring::FrameRing;
pub use session::{SessionCore, SessionRole, SessionState};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{Direction, OrdType, OrderState, Protocol, Side};

    pub use crate::book::{Order, OrderRegistry};
    pub use crate::buffer::ByteBuffer;
    pub use crate::fill::{FillDecision, FillEngine, FillRule};
    pub use crate::journal::{Journal, JournalEntry};
    pub use crate::ring::FrameRing;
    pub use crate::session::{SessionCore, SessionRole, SessionState};

    pub use crate::{Error, Result};
}
