//! Outbound frame ring - MPSC claim/commit buffer
//!
//! Encoders claim a contiguous region, write wire bytes in place, then
//! commit; the single drainer thread transmits committed payloads to the
//! socket with no intermediate copy. Frames are length-prefixed inside the
//! ring (`[len:4 LE][payload]`); the prefix is bookkeeping only and never
//! reaches the wire.
//!
//! Publication order is claim order: a committed frame becomes visible to
//! the drainer only once every earlier claim has been committed or
//! aborted, so the published stream has no gaps and aborted claims never
//! appear. `commit`/`abort` are lock-free stores; the claim path takes a
//! short mutex to serialize region allocation across producers, which is
//! also what lets a session assign its outbound sequence number
//! atomically at claim time (`try_claim_with`).

mod frame_ring;

pub use frame_ring::{Claim, Drainer, FrameRing, RingStats};

pub use crate::core::errors::RingError;
