//! Domain error types for the simulator core
//!
//! Each component gets its own enum with data-carrying variants so the
//! dispatcher boundary can log exactly what went wrong without string
//! formatting in the hot path.

use thiserror::Error;

/// Errors from the wire buffer's bounds-checked accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Absolute access outside [0, limit)
    #[error("buffer access out of bounds: offset {offset} + len {len} > limit {limit}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        limit: usize,
    },

    /// Relative put past the limit
    #[error("buffer overflow: need {need} bytes, {remaining} remaining")]
    Overflow { need: usize, remaining: usize },

    /// Relative get past the limit
    #[error("buffer underflow: need {need} bytes, {remaining} remaining")]
    Underflow { need: usize, remaining: usize },

    /// reset() without a prior mark()
    #[error("reset called without a mark")]
    NoMark,
}

/// Errors from the outbound frame ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Not enough contiguous space for the requested claim. Transient;
    /// the caller applies backpressure and retries after a drain.
    #[error("ring full: requested {requested} bytes")]
    Full { requested: usize },

    /// Claim larger than the ring can ever hold
    #[error("claim of {requested} bytes exceeds ring capacity {capacity}")]
    TooLarge { requested: usize, capacity: usize },

    /// All claim slots taken (outstanding unresolved claims)
    #[error("no claim slots available")]
    NoSlots,
}

/// Errors surfaced by the session runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Counterparty identity does not match the configured session
    #[error("comp id mismatch: got {got}, expected {expected}")]
    CompIdMismatch { got: String, expected: String },

    /// Inbound sequence number below expected without PossDupFlag
    #[error("sequence number too low: got {got}, expected {expected}")]
    SequenceTooLow { got: u64, expected: u64 },

    /// Peer failed to answer a TestRequest within the grace interval
    #[error("test request timeout after {elapsed_ms}ms")]
    TestRequestTimeout { elapsed_ms: u64 },

    /// Message received in a state that does not admit it
    #[error("unexpected message in state {state}: {what}")]
    UnexpectedMessage { state: &'static str, what: String },

    /// Unknown access credentials (iLink 3)
    #[error("unknown access key id: {key}")]
    UnknownAccessKey { key: String },

    /// Underlying channel failure
    #[error("session channel error: {0}")]
    Channel(String),
}

/// Errors from the journal
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry bytes do not parse back; offset names the segment position
    #[error("corrupt journal entry in {segment} at offset {offset}")]
    Corrupt { segment: String, offset: usize },

    /// Entry larger than a segment can hold
    #[error("journal entry of {len} bytes exceeds segment size {segment_size}")]
    EntryTooLarge { len: usize, segment_size: usize },

    #[error("unknown journal stream: {0}")]
    UnknownStream(String),
}
