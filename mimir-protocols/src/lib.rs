//! Mimir Protocols - wire codecs, session runtimes and dispatchers
//!
//! One module per protocol family, each containing:
//! - the codec: zero-allocation decode of inbound wire bytes, direct
//!   encode into claimed ring regions for outbound
//! - the session runtime driving handshake, sequencing and timers on top
//!   of `mimir_core::session::SessionCore`
//! - the dispatcher bridging decoded messages to the order registry and
//!   fill engine and rendering responses
//!
//! Families:
//! - `fix`: FIX 4.2 / 4.4 / 5.0 tag=value, with the full resend protocol
//! - `ouch`: NASDAQ OUCH 4.2 (fixed length) and 5.0 (appendages)
//! - `ilink`: CME iLink 3 SBE with Negotiate/Establish handshake
//! - `optiq`: Euronext Optiq OEG
//! - `pillar`: NYSE Pillar
//!
//! Every engine shares one [`engine::EngineHandles`]: the registry, fill
//! engine, journal and id allocators are process-wide and wired
//! explicitly at startup.

pub mod engine;
pub mod wire;

pub mod fix;
pub mod ilink;
pub mod ouch;
pub mod optiq;
pub mod pillar;

pub use engine::EngineHandles;
