//! Wire buffer - position/limit byte region with typed accessors
//!
//! One fixed-capacity region, two views over the same bytes:
//! - a linear cursor pair (`position`, `limit`) for socket reads/writes and
//!   compaction
//! - absolute-index typed accessors that never touch the cursor, used by the
//!   fixed-offset binary codecs
//!
//! Absolute accessors bounds-check against `limit`; relative accessors
//! advance `position` by the encoded size. The buffer is not thread-safe;
//! exactly one thread may touch it at any instant, which matches the
//! one-reader-thread-per-engine model.

mod bytebuf;

pub use bytebuf::ByteBuffer;

pub use crate::core::errors::BufferError;
