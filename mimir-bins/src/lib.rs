//! Shared setup for the mimir binaries

pub mod common;
