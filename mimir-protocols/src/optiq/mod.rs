//! Euronext Optiq OEG order entry
//!
//! Little-endian SBE-style framing: a 2-byte message length, a header
//! carrying (block length, message class, schema id, version), then the
//! fixed block. Dispatch is on the message class. Prices carry four
//! implied decimals; timestamps are Unix epoch nanoseconds both
//! directions. Order statuses on reports: 0=New, 1=PartialFill,
//! 2=Filled, 4=Canceled, 8=Rejected.
//!
//! No handshake: the session is ESTABLISHED on accept. A replace is
//! acknowledged as an ordinary accept bound to the replacement id; the
//! journal keeps the original id visible.

use std::io;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use mimir_core::book::Order;
use mimir_core::core::{Direction, OrdType, Protocol, Side};
use mimir_core::journal::{Journal, JournalEntry};
use mimir_core::net::SessionDriver;
use mimir_core::ring::{Drainer, FrameRing};
use mimir_core::session::{SessionCore, SessionRole, SessionState};
use mimir_core::time::now_nanos;

use crate::engine::{
    cancel_order, replace_order, submit_order, CancelOutcome, EngineHandles, ReplaceOutcome,
    SubmitOutcome,
};
use crate::wire::{alpha, i64_le, put_alpha, put_i64_le, put_u16_le, put_u64_le, u16_le, u64_le};

/// Four implied decimals on Optiq prices
pub const PRICE_SCALE: u32 = 4;

pub const SYMBOL_LEN: usize = 8;
pub const FRAME_PREFIX: usize = 2;
pub const HEADER: usize = 8;
pub const SCHEMA_ID: u16 = 21;
pub const SCHEMA_VERSION: u16 = 4;

/// Message classes
pub mod class {
    pub const NEW_ORDER: u16 = 1;
    pub const CANCEL_REQUEST: u16 = 2;
    pub const CANCEL_REPLACE: u16 = 3;
    pub const EXECUTION_REPORT: u16 = 10;
    pub const REJECT: u16 = 11;
}

/// Report status bytes
pub mod status {
    pub const NEW: u8 = 0;
    pub const PARTIAL_FILL: u8 = 1;
    pub const FILLED: u8 = 2;
    pub const CANCELED: u8 = 4;
    pub const REJECTED: u8 = 8;
}

pub const NEW_ORDER_BLOCK: usize = 42;
pub const CANCEL_BLOCK: usize = 32;
pub const CANCEL_REPLACE_BLOCK: usize = 50;
pub const EXEC_REPORT_BLOCK: usize = 90;
pub const REJECT_BLOCK: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OptiqError {
    #[error("unknown message class {0}")]
    UnknownClass(u16),

    #[error("frame length {0} below header size")]
    FrameTooShort(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct OptiqFrame<'a> {
    pub message_class: u16,
    pub block: &'a [u8],
}

pub fn decode_frame(buf: &[u8]) -> Result<Option<(usize, OptiqFrame<'_>)>, OptiqError> {
    if buf.len() < FRAME_PREFIX {
        return Ok(None);
    }
    let msg_len = u16_le(buf, 0) as usize;
    if msg_len < HEADER {
        return Err(OptiqError::FrameTooShort(msg_len));
    }
    let total = FRAME_PREFIX + msg_len;
    if buf.len() < total {
        return Ok(None);
    }
    let message_class = u16_le(buf, 4);
    Ok(Some((
        total,
        OptiqFrame {
            message_class,
            block: &buf[FRAME_PREFIX + HEADER..total],
        },
    )))
}

fn encode_header(out: &mut [u8], message_class: u16, block_len: usize) -> usize {
    put_u16_le(out, 0, (HEADER + block_len) as u16);
    put_u16_le(out, 2, block_len as u16);
    put_u16_le(out, 4, message_class);
    put_u16_le(out, 6, SCHEMA_ID);
    put_u16_le(out, 8, SCHEMA_VERSION);
    FRAME_PREFIX + HEADER
}

const fn frame_size(block_len: usize) -> usize {
    FRAME_PREFIX + HEADER + block_len
}

// ----------------------------------------------------------------------
// Layouts
// ----------------------------------------------------------------------

/// NewOrder (1): client-order-id@0, symbol@8/8, price@16, qty@24,
/// side@32 (1=buy 2=sell), order-type@33 (1=market 2=limit), sent-ns@34
#[derive(Debug, Clone, Copy)]
pub struct NewOrder<'a>(pub &'a [u8]);

impl<'a> NewOrder<'a> {
    pub fn client_order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn symbol(&self) -> &'a str {
        alpha(self.0, 8, SYMBOL_LEN)
    }
    pub fn price(&self) -> i64 {
        i64_le(self.0, 16)
    }
    pub fn qty(&self) -> u64 {
        u64_le(self.0, 24)
    }
    pub fn side(&self) -> u8 {
        self.0[32]
    }
    pub fn order_type(&self) -> u8 {
        self.0[33]
    }
    pub fn sending_time_ns(&self) -> u64 {
        u64_le(self.0, 34)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_new_order(
    out: &mut [u8],
    client_order_id: u64,
    symbol: &str,
    price: i64,
    qty: u64,
    side: u8,
    order_type: u8,
    sending_time_ns: u64,
) -> usize {
    let at = encode_header(out, class::NEW_ORDER, NEW_ORDER_BLOCK);
    let block = &mut out[at..at + NEW_ORDER_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_alpha(block, 8, SYMBOL_LEN, symbol);
    put_i64_le(block, 16, price);
    put_u64_le(block, 24, qty);
    block[32] = side;
    block[33] = order_type;
    put_u64_le(block, 34, sending_time_ns);
    frame_size(NEW_ORDER_BLOCK)
}

/// CancelRequest (2): request-id@0, orig-client-order-id@8, symbol@16/8,
/// sent-ns@24
#[derive(Debug, Clone, Copy)]
pub struct CancelRequest<'a>(pub &'a [u8]);

impl CancelRequest<'_> {
    pub fn client_order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn orig_client_order_id(&self) -> u64 {
        u64_le(self.0, 8)
    }
}

pub fn encode_cancel_request(
    out: &mut [u8],
    client_order_id: u64,
    orig_client_order_id: u64,
    symbol: &str,
    sending_time_ns: u64,
) -> usize {
    let at = encode_header(out, class::CANCEL_REQUEST, CANCEL_BLOCK);
    let block = &mut out[at..at + CANCEL_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_u64_le(block, 8, orig_client_order_id);
    put_alpha(block, 16, SYMBOL_LEN, symbol);
    put_u64_le(block, 24, sending_time_ns);
    frame_size(CANCEL_BLOCK)
}

/// CancelReplace (3): new-client-order-id@0, orig@8, symbol@16/8,
/// price@24, qty@32, side@40, order-type@41, sent-ns@42
#[derive(Debug, Clone, Copy)]
pub struct CancelReplace<'a>(pub &'a [u8]);

impl<'a> CancelReplace<'a> {
    pub fn client_order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn orig_client_order_id(&self) -> u64 {
        u64_le(self.0, 8)
    }
    pub fn symbol(&self) -> &'a str {
        alpha(self.0, 16, SYMBOL_LEN)
    }
    pub fn price(&self) -> i64 {
        i64_le(self.0, 24)
    }
    pub fn qty(&self) -> u64 {
        u64_le(self.0, 32)
    }
    pub fn side(&self) -> u8 {
        self.0[40]
    }
    pub fn order_type(&self) -> u8 {
        self.0[41]
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_cancel_replace(
    out: &mut [u8],
    client_order_id: u64,
    orig_client_order_id: u64,
    symbol: &str,
    price: i64,
    qty: u64,
    side: u8,
    order_type: u8,
    sending_time_ns: u64,
) -> usize {
    let at = encode_header(out, class::CANCEL_REPLACE, CANCEL_REPLACE_BLOCK);
    let block = &mut out[at..at + CANCEL_REPLACE_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_u64_le(block, 8, orig_client_order_id);
    put_alpha(block, 16, SYMBOL_LEN, symbol);
    put_i64_le(block, 24, price);
    put_u64_le(block, 32, qty);
    block[40] = side;
    block[41] = order_type;
    put_u64_le(block, 42, sending_time_ns);
    frame_size(CANCEL_REPLACE_BLOCK)
}

/// ExecutionReport (10): client-order-id@0, orig-client-order-id@8,
/// order-id@16, symbol@24/8, price@32, qty@40, leaves@48, cum@56,
/// last-qty@64, last-px@72, status@80, side@81, ts-ns@82
#[derive(Debug, Clone, Copy)]
pub struct ExecutionReport<'a>(pub &'a [u8]);

impl<'a> ExecutionReport<'a> {
    pub fn client_order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn orig_client_order_id(&self) -> u64 {
        u64_le(self.0, 8)
    }
    pub fn order_id(&self) -> u64 {
        u64_le(self.0, 16)
    }
    pub fn symbol(&self) -> &'a str {
        alpha(self.0, 24, SYMBOL_LEN)
    }
    pub fn leaves(&self) -> u64 {
        u64_le(self.0, 48)
    }
    pub fn cum(&self) -> u64 {
        u64_le(self.0, 56)
    }
    pub fn last_qty(&self) -> u64 {
        u64_le(self.0, 64)
    }
    pub fn last_px(&self) -> i64 {
        i64_le(self.0, 72)
    }
    pub fn status(&self) -> u8 {
        self.0[80]
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_execution_report(
    out: &mut [u8],
    client_order_id: u64,
    orig_client_order_id: u64,
    order_id: u64,
    symbol: &str,
    price: i64,
    qty: u64,
    leaves: u64,
    cum: u64,
    last_qty: u64,
    last_px: i64,
    report_status: u8,
    side: u8,
) -> usize {
    let at = encode_header(out, class::EXECUTION_REPORT, EXEC_REPORT_BLOCK);
    let block = &mut out[at..at + EXEC_REPORT_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_u64_le(block, 8, orig_client_order_id);
    put_u64_le(block, 16, order_id);
    put_alpha(block, 24, SYMBOL_LEN, symbol);
    put_i64_le(block, 32, price);
    put_u64_le(block, 40, qty);
    put_u64_le(block, 48, leaves);
    put_u64_le(block, 56, cum);
    put_u64_le(block, 64, last_qty);
    put_i64_le(block, 72, last_px);
    block[80] = report_status;
    block[81] = side;
    put_u64_le(block, 82, now_nanos());
    frame_size(EXEC_REPORT_BLOCK)
}

/// Reject (11): client-order-id@0, reason@8, ts-ns@10
pub fn encode_reject(out: &mut [u8], client_order_id: u64, reason: u16) -> usize {
    let at = encode_header(out, class::REJECT, REJECT_BLOCK);
    let block = &mut out[at..at + REJECT_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_u16_le(block, 8, reason);
    put_u64_le(block, 10, now_nanos());
    frame_size(REJECT_BLOCK)
}

// ----------------------------------------------------------------------
// Session driver
// ----------------------------------------------------------------------

fn side_from_wire(b: u8) -> Option<Side> {
    match b {
        1 => Some(Side::Buy),
        2 => Some(Side::Sell),
        _ => None,
    }
}

fn side_to_wire(side: Side) -> u8 {
    if side.is_sell() {
        2
    } else {
        1
    }
}

pub struct OptiqEngine {
    core: SessionCore,
    ring: Arc<FrameRing>,
    drainer: Drainer,
    journal: Arc<Journal>,
    stream: String,
    handles: Arc<EngineHandles>,
    in_seq: u32,
    out_seq: u32,
    closing: bool,
}

impl OptiqEngine {
    pub fn new(handles: Arc<EngineHandles>, peer: impl std::fmt::Display) -> Self {
        let stream = format!("OPTIQ_{peer}");
        let ring = FrameRing::with_default_capacity();
        let drainer = Drainer::new(Arc::clone(&ring));

        let mut core = SessionCore::new(
            stream.clone(),
            Protocol::Optiq,
            SessionRole::Acceptor,
            0,
            Arc::clone(&handles.listener),
        );
        core.transition(SessionState::Connecting);
        core.transition(SessionState::Connected);
        core.transition(SessionState::Established);

        Self {
            core,
            ring,
            drainer,
            journal: Arc::clone(&handles.journal),
            stream,
            handles,
            in_seq: 0,
            out_seq: 0,
            closing: false,
        }
    }

    pub fn session(&self) -> &SessionCore {
        &self.core
    }

    fn send(&mut self, now_ms: u64, encode: impl FnOnce(&mut [u8]) -> usize) -> Result<()> {
        let mut claim = self.ring.try_claim(frame_size(EXEC_REPORT_BLOCK))?;
        let len = encode(claim.payload_mut());

        self.out_seq += 1;
        let entry = JournalEntry {
            timestamp_ms: now_ms,
            seq_num: self.out_seq,
            direction: Direction::Outbound,
            metadata: Some(claim.payload_mut()[4..6].to_vec()),
            raw: claim.payload_mut()[..len].to_vec(),
        };
        self.journal.write(&self.stream, &entry)?;

        claim.commit_truncated(len);
        Ok(())
    }

    fn handle(&mut self, now_ms: u64, frame: OptiqFrame<'_>) -> Result<()> {
        match frame.message_class {
            class::NEW_ORDER => self.on_new_order(now_ms, NewOrder(frame.block)),
            class::CANCEL_REQUEST => self.on_cancel(now_ms, CancelRequest(frame.block)),
            class::CANCEL_REPLACE => self.on_replace(now_ms, CancelReplace(frame.block)),
            other => {
                tracing::info!(session = %self.core.id, class = other, "unsupported message class");
                Ok(())
            }
        }
    }

    fn on_new_order(&mut self, now_ms: u64, new_order: NewOrder<'_>) -> Result<()> {
        let client_id = new_order.client_order_id();
        let symbol = new_order.symbol().to_string();
        let qty = new_order.qty();
        let raw_price = new_order.price();
        let side_byte = new_order.side();

        let Some(side) = side_from_wire(side_byte) else {
            return self.send(now_ms, |out| encode_reject(out, client_id, 4));
        };
        let (ord_type, limit_price) = match new_order.order_type() {
            1 => (OrdType::Market, None),
            _ => (OrdType::Limit, Some(raw_price)),
        };

        let order = Order::new(
            self.handles.order_ids.next_id(),
            client_id.to_string(),
            &symbol,
            side,
            ord_type,
            qty,
            limit_price,
            self.core.id.clone(),
            Protocol::Optiq,
        );

        match submit_order(&self.handles, order) {
            SubmitOutcome::Duplicate => Ok(()),
            SubmitOutcome::Rejected(reason) => {
                let code = match reason {
                    "unknown symbol" => 1,
                    "zero quantity" => 2,
                    _ => 99,
                };
                self.send(now_ms, |out| encode_reject(out, client_id, code))
            }
            SubmitOutcome::Accepted { order, fill } => {
                let (exchange_id, price) = {
                    let o = order.lock();
                    (o.exchange_id, o.limit_price.unwrap_or(0))
                };
                self.send(now_ms, |out| {
                    encode_execution_report(
                        out, client_id, 0, exchange_id, &symbol, price, qty, qty, 0, 0, 0,
                        status::NEW, side_byte,
                    )
                })?;
                if let Some(fill) = fill {
                    let report_status = if fill.is_full {
                        status::FILLED
                    } else {
                        status::PARTIAL_FILL
                    };
                    self.send(now_ms, |out| {
                        encode_execution_report(
                            out,
                            client_id,
                            0,
                            exchange_id,
                            &symbol,
                            price,
                            qty,
                            fill.leaves_qty,
                            fill.cum_qty,
                            fill.qty,
                            fill.price,
                            report_status,
                            side_byte,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }

    fn on_cancel(&mut self, now_ms: u64, cancel: CancelRequest<'_>) -> Result<()> {
        let orig = cancel.orig_client_order_id();
        let orig_key = orig.to_string();

        match cancel_order(&self.handles, &orig_key, &self.core.id) {
            CancelOutcome::NotFound | CancelOutcome::TooLate(_) => Ok(()),
            CancelOutcome::Canceled { order, .. } => {
                let (exchange_id, symbol, side, qty, cum, price) = {
                    let o = order.lock();
                    (
                        o.exchange_id,
                        o.symbol.clone(),
                        o.side,
                        o.original_qty,
                        o.filled_qty,
                        o.limit_price.unwrap_or(0),
                    )
                };
                self.send(now_ms, |out| {
                    encode_execution_report(
                        out,
                        orig,
                        orig,
                        exchange_id,
                        &symbol,
                        price,
                        qty,
                        0,
                        cum,
                        0,
                        0,
                        status::CANCELED,
                        side_to_wire(side),
                    )
                })
            }
        }
    }

    fn on_replace(&mut self, now_ms: u64, replace: CancelReplace<'_>) -> Result<()> {
        let new_id = replace.client_order_id();
        let orig = replace.orig_client_order_id();
        let symbol = replace.symbol().to_string();
        let qty = replace.qty();
        let raw_price = replace.price();
        let side_byte = replace.side();

        let Some(side) = side_from_wire(side_byte) else {
            return self.send(now_ms, |out| encode_reject(out, new_id, 4));
        };
        let (ord_type, limit_price) = match replace.order_type() {
            1 => (OrdType::Market, None),
            _ => (OrdType::Limit, Some(raw_price)),
        };

        let replacement = Order::new(
            self.handles.order_ids.next_id(),
            new_id.to_string(),
            &symbol,
            side,
            ord_type,
            qty,
            limit_price,
            self.core.id.clone(),
            Protocol::Optiq,
        );

        match replace_order(&self.handles, &orig.to_string(), &self.core.id, replacement) {
            ReplaceOutcome::NotFound | ReplaceOutcome::TooLate(_) => Ok(()),
            ReplaceOutcome::Replaced { new, fill, .. } => {
                let exchange_id = new.lock().exchange_id;
                // Replace-accepted is a plain accept bound to the new id;
                // the original id rides in the orig field for the log.
                self.send(now_ms, |out| {
                    encode_execution_report(
                        out,
                        new_id,
                        orig,
                        exchange_id,
                        &symbol,
                        raw_price,
                        qty,
                        qty,
                        0,
                        0,
                        0,
                        status::NEW,
                        side_byte,
                    )
                })?;
                if let Some(fill) = fill {
                    let report_status = if fill.is_full {
                        status::FILLED
                    } else {
                        status::PARTIAL_FILL
                    };
                    self.send(now_ms, |out| {
                        encode_execution_report(
                            out,
                            new_id,
                            orig,
                            exchange_id,
                            &symbol,
                            raw_price,
                            qty,
                            fill.leaves_qty,
                            fill.cum_qty,
                            fill.qty,
                            fill.price,
                            report_status,
                            side_byte,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }
}

impl SessionDriver for OptiqEngine {
    fn on_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<usize> {
        let mut consumed = 0usize;
        loop {
            match decode_frame(&bytes[consumed..]) {
                Ok(None) => break,
                Ok(Some((len, frame))) => {
                    self.in_seq += 1;
                    self.journal.write(
                        &self.stream,
                        &JournalEntry {
                            timestamp_ms: now_ms,
                            seq_num: self.in_seq,
                            direction: Direction::Inbound,
                            metadata: Some(frame.message_class.to_le_bytes().to_vec()),
                            raw: bytes[consumed..consumed + len].to_vec(),
                        },
                    )?;

                    if let Err(e) = self.handle(now_ms, frame) {
                        tracing::error!(session = %self.core.id, error = %e, "dispatch fault; continuing");
                        self.core.report_error(&e.to_string());
                    }
                    consumed += len;
                }
                Err(e) => {
                    tracing::warn!(session = %self.core.id, error = %e, "framing error, closing");
                    self.core.disconnect("framing error");
                    self.closing = true;
                    break;
                }
            }
        }
        Ok(consumed)
    }

    fn poll(&mut self, _now_ms: u64) -> Result<()> {
        Ok(())
    }

    fn drain_to(&mut self, w: &mut dyn io::Write) -> io::Result<usize> {
        self.drainer.drain_into(w)
    }

    fn is_closed(&self) -> bool {
        self.closing
    }

    fn on_io_error(&mut self, error: &io::Error) {
        self.core.disconnect(&format!("io error: {error}"));
        self.closing = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_order_roundtrip() {
        let mut wire = [0u8; 128];
        let n = encode_new_order(&mut wire, 1001, "ACA", 1_234_500, 40, 1, 2, 555);

        let (total, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        assert_eq!(total, n);
        assert_eq!(frame.message_class, class::NEW_ORDER);

        let msg = NewOrder(frame.block);
        assert_eq!(msg.client_order_id(), 1001);
        assert_eq!(msg.symbol(), "ACA");
        assert_eq!(msg.price(), 1_234_500);
        assert_eq!(msg.qty(), 40);
        assert_eq!(msg.side(), 1);
        assert_eq!(msg.order_type(), 2);
        assert_eq!(msg.sending_time_ns(), 555);
    }

    #[test]
    fn test_exec_report_roundtrip() {
        let mut wire = [0u8; 128];
        let n = encode_execution_report(
            &mut wire, 1001, 0, 7, "ACA", 1_234_500, 40, 20, 20, 20, 1_234_500,
            status::PARTIAL_FILL, 1,
        );

        let (_, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        assert_eq!(frame.message_class, class::EXECUTION_REPORT);
        let msg = ExecutionReport(frame.block);
        assert_eq!(msg.client_order_id(), 1001);
        assert_eq!(msg.order_id(), 7);
        assert_eq!(msg.leaves(), 20);
        assert_eq!(msg.cum(), 20);
        assert_eq!(msg.last_qty(), 20);
        assert_eq!(msg.last_px(), 1_234_500);
        assert_eq!(msg.status(), status::PARTIAL_FILL);
    }

    #[test]
    fn test_incomplete_frame() {
        let mut wire = [0u8; 128];
        let n = encode_new_order(&mut wire, 1, "X", 1, 1, 1, 2, 0);
        assert!(decode_frame(&wire[..n - 1]).unwrap().is_none());
        assert!(decode_frame(&wire[..1]).unwrap().is_none());
    }

    #[test]
    fn test_cancel_replace_roundtrip() {
        let mut wire = [0u8; 128];
        let n = encode_cancel_replace(&mut wire, 2002, 1001, "ACA", 1_300_000, 60, 2, 2, 0);
        let (_, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        assert_eq!(frame.message_class, class::CANCEL_REPLACE);
        let msg = CancelReplace(frame.block);
        assert_eq!(msg.client_order_id(), 2002);
        assert_eq!(msg.orig_client_order_id(), 1001);
        assert_eq!(msg.qty(), 60);
        assert_eq!(msg.side(), 2);
    }
}
