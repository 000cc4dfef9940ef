//! NYSE Pillar gateway order entry
//!
//! Little-endian binary frames: 2-byte message length (counting the
//! bytes after itself), 2-byte message type, then the fixed block.
//! Prices are 8-byte signed with eight implied decimals. Sides are
//! 1=buy, 2=sell; order statuses on acks: 0=New, 1=PartialFill,
//! 2=Filled, 4=Canceled, 8=Rejected. The session is ESTABLISHED on
//! accept; there is no handshake or sequence layer.

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

use crate::engine::{
    cancel_order, replace_order, submit_order, CancelOutcome, EngineHandles, ReplaceOutcome,
    SubmitOutcome,
};
use crate::wire::{alpha, i64_le, put_alpha, put_i64_le, put_u16_le, put_u32_le, put_u64_le, u16_le, u32_le, u64_le};

/// Eight implied decimals on Pillar prices
pub const PRICE_SCALE: u32 = 8;

pub const SYMBOL_LEN: usize = 8;
pub const FRAME_PREFIX: usize = 2;
pub const TYPE_FIELD: usize = 2;

/// Message types
pub mod msg_type {
    pub const NEW_ORDER: u16 = 1;
    pub const CANCEL_REQUEST: u16 = 2;
    pub const MODIFY_REQUEST: u16 = 3;
    pub const ORDER_ACK: u16 = 10;
    pub const CANCEL_ACK: u16 = 11;
    pub const EXEC_REPORT: u16 = 12;
    pub const REJECT: u16 = 13;
}

/// Order status bytes
pub mod status {
    pub const NEW: u8 = 0;
    pub const PARTIAL_FILL: u8 = 1;
    pub const FILLED: u8 = 2;
    pub const CANCELED: u8 = 4;
    pub const REJECTED: u8 = 8;
}

pub const NEW_ORDER_BLOCK: usize = 30;
pub const CANCEL_BLOCK: usize = 16;
pub const MODIFY_BLOCK: usize = 30;
pub const ORDER_ACK_BLOCK: usize = 38;
pub const CANCEL_ACK_BLOCK: usize = 28;
pub const EXEC_REPORT_BLOCK: usize = 37;
pub const REJECT_BLOCK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PillarError {
    #[error("unknown message type {0}")]
    UnknownType(u16),

    #[error("frame length {0} below type field")]
    FrameTooShort(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct PillarFrame<'a> {
    pub msg_type: u16,
    pub block: &'a [u8],
}

pub fn decode_frame(buf: &[u8]) -> Result<Option<(usize, PillarFrame<'_>)>, PillarError> {
    if buf.len() < FRAME_PREFIX {
        return Ok(None);
    }
    let msg_len = u16_le(buf, 0) as usize;
    if msg_len < TYPE_FIELD {
        return Err(PillarError::FrameTooShort(msg_len));
    }
    let total = FRAME_PREFIX + msg_len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((
        total,
        PillarFrame {
            msg_type: u16_le(buf, 2),
            block: &buf[FRAME_PREFIX + TYPE_FIELD..total],
        },
    )))
}

fn encode_header(out: &mut [u8], msg_type: u16, block_len: usize) -> usize {
    put_u16_le(out, 0, (TYPE_FIELD + block_len) as u16);
    put_u16_le(out, 2, msg_type);
    FRAME_PREFIX + TYPE_FIELD
}

const fn frame_size(block_len: usize) -> usize {
    FRAME_PREFIX + TYPE_FIELD + block_len
}

// ----------------------------------------------------------------------
// Layouts
// ----------------------------------------------------------------------

/// NewOrder (1): client-order-id@0, symbol@8/8, price@16, qty@24,
/// side@28, order-type@29 (1=market 2=limit)
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
    pub fn qty(&self) -> u32 {
        u32_le(self.0, 24)
    }
    pub fn side(&self) -> u8 {
        self.0[28]
    }
    pub fn order_type(&self) -> u8 {
        self.0[29]
    }
}

pub fn encode_new_order(
    out: &mut [u8],
    client_order_id: u64,
    symbol: &str,
    price: i64,
    qty: u32,
    side: u8,
    order_type: u8,
) -> usize {
    let at = encode_header(out, msg_type::NEW_ORDER, NEW_ORDER_BLOCK);
    let block = &mut out[at..at + NEW_ORDER_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_alpha(block, 8, SYMBOL_LEN, symbol);
    put_i64_le(block, 16, price);
    put_u32_le(block, 24, qty);
    block[28] = side;
    block[29] = order_type;
    frame_size(NEW_ORDER_BLOCK)
}

/// CancelRequest (2): request-id@0, orig-client-order-id@8
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

pub fn encode_cancel_request(out: &mut [u8], client_order_id: u64, orig: u64) -> usize {
    let at = encode_header(out, msg_type::CANCEL_REQUEST, CANCEL_BLOCK);
    let block = &mut out[at..at + CANCEL_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_u64_le(block, 8, orig);
    frame_size(CANCEL_BLOCK)
}

/// ModifyRequest (3): new-client-order-id@0, orig@8, price@16, qty@24,
/// side@28, pad@29
#[derive(Debug, Clone, Copy)]
pub struct ModifyRequest<'a>(pub &'a [u8]);

impl ModifyRequest<'_> {
    pub fn client_order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn orig_client_order_id(&self) -> u64 {
        u64_le(self.0, 8)
    }
    pub fn price(&self) -> i64 {
        i64_le(self.0, 16)
    }
    pub fn qty(&self) -> u32 {
        u32_le(self.0, 24)
    }
    pub fn side(&self) -> u8 {
        self.0[28]
    }
}

pub fn encode_modify_request(
    out: &mut [u8],
    client_order_id: u64,
    orig: u64,
    price: i64,
    qty: u32,
    side: u8,
) -> usize {
    let at = encode_header(out, msg_type::MODIFY_REQUEST, MODIFY_BLOCK);
    let block = &mut out[at..at + MODIFY_BLOCK];
    block.fill(0);
    put_u64_le(block, 0, client_order_id);
    put_u64_le(block, 8, orig);
    put_i64_le(block, 16, price);
    put_u32_le(block, 24, qty);
    block[28] = side;
    frame_size(MODIFY_BLOCK)
}

/// OrderAck (10): order-id@0, client-order-id@8, status@16, side@17,
/// qty@18, price@22, leaves@30, cum@34
#[derive(Debug, Clone, Copy)]
pub struct OrderAck<'a>(pub &'a [u8]);

impl OrderAck<'_> {
    pub fn order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn client_order_id(&self) -> u64 {
        u64_le(self.0, 8)
    }
    pub fn status(&self) -> u8 {
        self.0[16]
    }
    pub fn qty(&self) -> u32 {
        u32_le(self.0, 18)
    }
    pub fn leaves(&self) -> u32 {
        u32_le(self.0, 30)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_order_ack(
    out: &mut [u8],
    order_id: u64,
    client_order_id: u64,
    ack_status: u8,
    side: u8,
    qty: u32,
    price: i64,
    leaves: u32,
    cum: u32,
) -> usize {
    let at = encode_header(out, msg_type::ORDER_ACK, ORDER_ACK_BLOCK);
    let block = &mut out[at..at + ORDER_ACK_BLOCK];
    put_u64_le(block, 0, order_id);
    put_u64_le(block, 8, client_order_id);
    block[16] = ack_status;
    block[17] = side;
    put_u32_le(block, 18, qty);
    put_i64_le(block, 22, price);
    put_u32_le(block, 30, leaves);
    put_u32_le(block, 34, cum);
    frame_size(ORDER_ACK_BLOCK)
}

/// CancelAck (11): order-id@0, request-id@8, orig@16, canceled-qty@24
pub fn encode_cancel_ack(
    out: &mut [u8],
    order_id: u64,
    request_id: u64,
    orig: u64,
    canceled_qty: u32,
) -> usize {
    let at = encode_header(out, msg_type::CANCEL_ACK, CANCEL_ACK_BLOCK);
    let block = &mut out[at..at + CANCEL_ACK_BLOCK];
    put_u64_le(block, 0, order_id);
    put_u64_le(block, 8, request_id);
    put_u64_le(block, 16, orig);
    put_u32_le(block, 24, canceled_qty);
    frame_size(CANCEL_ACK_BLOCK)
}

/// ExecReport (12): order-id@0, client-order-id@8, last-qty@16,
/// last-px@20, cum@28, leaves@32, status@36
#[derive(Debug, Clone, Copy)]
pub struct ExecReport<'a>(pub &'a [u8]);

impl ExecReport<'_> {
    pub fn order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn last_qty(&self) -> u32 {
        u32_le(self.0, 16)
    }
    pub fn last_px(&self) -> i64 {
        i64_le(self.0, 20)
    }
    pub fn cum(&self) -> u32 {
        u32_le(self.0, 28)
    }
    pub fn leaves(&self) -> u32 {
        u32_le(self.0, 32)
    }
    pub fn status(&self) -> u8 {
        self.0[36]
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_exec_report(
    out: &mut [u8],
    order_id: u64,
    client_order_id: u64,
    last_qty: u32,
    last_px: i64,
    cum: u32,
    leaves: u32,
    report_status: u8,
) -> usize {
    let at = encode_header(out, msg_type::EXEC_REPORT, EXEC_REPORT_BLOCK);
    let block = &mut out[at..at + EXEC_REPORT_BLOCK];
    put_u64_le(block, 0, order_id);
    put_u64_le(block, 8, client_order_id);
    put_u32_le(block, 16, last_qty);
    put_i64_le(block, 20, last_px);
    put_u32_le(block, 28, cum);
    put_u32_le(block, 32, leaves);
    block[36] = report_status;
    frame_size(EXEC_REPORT_BLOCK)
}

/// Reject (13): client-order-id@0, reason@8
pub fn encode_reject(out: &mut [u8], client_order_id: u64, reason: u16) -> usize {
    let at = encode_header(out, msg_type::REJECT, REJECT_BLOCK);
    let block = &mut out[at..at + REJECT_BLOCK];
    put_u64_le(block, 0, client_order_id);
    put_u16_le(block, 8, reason);
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

pub struct PillarEngine {
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

impl PillarEngine {
    pub fn new(handles: Arc<EngineHandles>, peer: impl std::fmt::Display) -> Self {
        let stream = format!("PILLAR_{peer}");
        let ring = FrameRing::with_default_capacity();
        let drainer = Drainer::new(Arc::clone(&ring));

        let mut core = SessionCore::new(
            stream.clone(),
            Protocol::Pillar,
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
        let mut claim = self.ring.try_claim(frame_size(ORDER_ACK_BLOCK))?;
        let len = encode(claim.payload_mut());

        self.out_seq += 1;
        let entry = JournalEntry {
            timestamp_ms: now_ms,
            seq_num: self.out_seq,
            direction: Direction::Outbound,
            metadata: Some(claim.payload_mut()[2..4].to_vec()),
            raw: claim.payload_mut()[..len].to_vec(),
        };
        self.journal.write(&self.stream, &entry)?;

        claim.commit_truncated(len);
        Ok(())
    }

    fn handle(&mut self, now_ms: u64, frame: PillarFrame<'_>) -> Result<()> {
        match frame.msg_type {
            msg_type::NEW_ORDER => self.on_new_order(now_ms, NewOrder(frame.block)),
            msg_type::CANCEL_REQUEST => self.on_cancel(now_ms, CancelRequest(frame.block)),
            msg_type::MODIFY_REQUEST => self.on_modify(now_ms, ModifyRequest(frame.block)),
            other => {
                tracing::info!(session = %self.core.id, msg_type = other, "unsupported message type");
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
            qty as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Pillar,
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
                    encode_order_ack(
                        out,
                        exchange_id,
                        client_id,
                        status::NEW,
                        side_byte,
                        qty,
                        price,
                        qty,
                        0,
                    )
                })?;
                if let Some(fill) = fill {
                    let report_status = if fill.is_full {
                        status::FILLED
                    } else {
                        status::PARTIAL_FILL
                    };
                    self.send(now_ms, |out| {
                        encode_exec_report(
                            out,
                            exchange_id,
                            client_id,
                            fill.qty as u32,
                            fill.price,
                            fill.cum_qty as u32,
                            fill.leaves_qty as u32,
                            report_status,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }

    fn on_cancel(&mut self, now_ms: u64, cancel: CancelRequest<'_>) -> Result<()> {
        let request_id = cancel.client_order_id();
        let orig = cancel.orig_client_order_id();

        match cancel_order(&self.handles, &orig.to_string(), &self.core.id) {
            CancelOutcome::NotFound | CancelOutcome::TooLate(_) => Ok(()),
            CancelOutcome::Canceled {
                order,
                decremented_qty,
            } => {
                let exchange_id = order.lock().exchange_id;
                self.send(now_ms, |out| {
                    encode_cancel_ack(out, exchange_id, request_id, orig, decremented_qty as u32)
                })
            }
        }
    }

    fn on_modify(&mut self, now_ms: u64, modify: ModifyRequest<'_>) -> Result<()> {
        let new_id = modify.client_order_id();
        let orig = modify.orig_client_order_id();
        let qty = modify.qty();
        let raw_price = modify.price();
        let side_byte = modify.side();

        let Some(side) = side_from_wire(side_byte) else {
            return self.send(now_ms, |out| encode_reject(out, new_id, 4));
        };

        // Symbol carries over from the original order
        let Some(old_ref) = self
            .handles
            .registry
            .by_client_id(&orig.to_string(), &self.core.id)
        else {
            tracing::info!(session = %self.core.id, orig, "modify for unknown order");
            return Ok(());
        };
        let symbol = old_ref.lock().symbol.clone();

        let replacement = Order::new(
            self.handles.order_ids.next_id(),
            new_id.to_string(),
            &symbol,
            side,
            OrdType::Limit,
            qty as u64,
            Some(raw_price),
            self.core.id.clone(),
            Protocol::Pillar,
        );

        match replace_order(&self.handles, &orig.to_string(), &self.core.id, replacement) {
            ReplaceOutcome::NotFound | ReplaceOutcome::TooLate(_) => Ok(()),
            ReplaceOutcome::Replaced { new, fill, .. } => {
                let exchange_id = new.lock().exchange_id;
                self.send(now_ms, |out| {
                    encode_order_ack(
                        out,
                        exchange_id,
                        new_id,
                        status::NEW,
                        side_byte,
                        qty,
                        raw_price,
                        qty,
                        0,
                    )
                })?;
                if let Some(fill) = fill {
                    let report_status = if fill.is_full {
                        status::FILLED
                    } else {
                        status::PARTIAL_FILL
                    };
                    self.send(now_ms, |out| {
                        encode_exec_report(
                            out,
                            exchange_id,
                            new_id,
                            fill.qty as u32,
                            fill.price,
                            fill.cum_qty as u32,
                            fill.leaves_qty as u32,
                            report_status,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }
}

impl SessionDriver for PillarEngine {
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
                            metadata: Some(frame.msg_type.to_le_bytes().to_vec()),
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
