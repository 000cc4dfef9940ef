//! CME iLink 3 order entry
//!
//! Little-endian SBE. Each frame is a 2-byte message length (counting
//! everything after itself), then an 8-byte SBE header (block length,
//! template id, schema id, version), then the fixed block. Dispatch is
//! on template id. Prices are 8-byte signed with nine implied decimals
//! (PRICE9).
//!
//! Session establishment is the Negotiate (500) / Establish (503)
//! two-step; Sequence (506) messages act as keepalives both ways, and
//! Terminate (507) ends the session.

pub mod messages;
pub mod session;

pub use session::IlinkEngine;

use thiserror::Error;

use crate::wire::{put_u16_le, u16_le};

/// Nine implied decimals on every iLink price
pub const PRICE_SCALE: u32 = 9;

/// SBE header: blockLength, templateId, schemaId, version (u16 each)
pub const SBE_HEADER: usize = 8;
/// 2-byte frame length prefix
pub const FRAME_PREFIX: usize = 2;

pub const SCHEMA_ID: u16 = 8;
pub const SCHEMA_VERSION: u16 = 13;

/// Template ids
pub mod template {
    pub const NEGOTIATE: u16 = 500;
    pub const NEGOTIATION_RESPONSE: u16 = 501;
    pub const NEGOTIATION_REJECT: u16 = 502;
    pub const ESTABLISH: u16 = 503;
    pub const ESTABLISHMENT_ACK: u16 = 504;
    pub const ESTABLISHMENT_REJECT: u16 = 505;
    pub const SEQUENCE: u16 = 506;
    pub const TERMINATE: u16 = 507;
    pub const NEW_ORDER_SINGLE: u16 = 514;
    pub const ORDER_CANCEL_REPLACE: u16 = 515;
    pub const ORDER_CANCEL_REQUEST: u16 = 516;
    pub const EXEC_REPORT_NEW: u16 = 532;
    pub const EXEC_REPORT_TRADE: u16 = 533;
    pub const EXEC_REPORT_CANCEL: u16 = 534;
    pub const EXEC_REPORT_MODIFY: u16 = 535;
    pub const BUSINESS_REJECT: u16 = 537;
}

/// Reject / terminate error codes
pub mod error_code {
    pub const NONE: u16 = 0;
    pub const BAD_FIRM: u16 = 1;
    pub const BAD_ACCESS_KEY: u16 = 2;
    pub const NOT_NEGOTIATED: u16 = 3;
    pub const KEEPALIVE_LAPSED: u16 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IlinkError {
    #[error("unknown template id {0}")]
    UnknownTemplate(u16),

    #[error("block too short for template {template}: declared {declared}, need {need}")]
    BlockTooShort {
        template: u16,
        declared: usize,
        need: usize,
    },

    #[error("frame length {0} below SBE header size")]
    FrameTooShort(usize),
}

/// A framed message: header fields + the block region
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub template_id: u16,
    pub block_length: u16,
    pub schema_id: u16,
    pub version: u16,
    pub block: &'a [u8],
}

/// Frame the message at the head of `buf`. `Ok(None)` = incomplete.
/// Returns (total consumed, frame).
pub fn decode_frame(buf: &[u8]) -> Result<Option<(usize, Frame<'_>)>, IlinkError> {
    if buf.len() < FRAME_PREFIX {
        return Ok(None);
    }
    let msg_len = u16_le(buf, 0) as usize;
    if msg_len < SBE_HEADER {
        return Err(IlinkError::FrameTooShort(msg_len));
    }
    let total = FRAME_PREFIX + msg_len;
    if buf.len() < total {
        return Ok(None);
    }

    let block_length = u16_le(buf, 2);
    let template_id = u16_le(buf, 4);
    let schema_id = u16_le(buf, 6);
    let version = u16_le(buf, 8);
    let block = &buf[FRAME_PREFIX + SBE_HEADER..total];

    Ok(Some((
        total,
        Frame {
            template_id,
            block_length,
            schema_id,
            version,
            block,
        },
    )))
}

/// Write the frame prefix and SBE header for a `block_len`-byte block.
/// Returns the offset where the block starts; total frame size is
/// `FRAME_PREFIX + SBE_HEADER + block_len`.
pub fn encode_frame_header(out: &mut [u8], template_id: u16, block_len: usize) -> usize {
    put_u16_le(out, 0, (SBE_HEADER + block_len) as u16);
    put_u16_le(out, 2, block_len as u16);
    put_u16_le(out, 4, template_id);
    put_u16_le(out, 6, SCHEMA_ID);
    put_u16_le(out, 8, SCHEMA_VERSION);
    FRAME_PREFIX + SBE_HEADER
}

/// Total wire size of a message with the given block
pub const fn frame_size(block_len: usize) -> usize {
    FRAME_PREFIX + SBE_HEADER + block_len
}
