//! iLink 3 session runtime and dispatcher
//!
//! Acceptor side of the Negotiate/Establish handshake, Sequence
//! keepalives, Terminate, and the business-message bridge to the
//! registry and fill engine.

use std::io;
use std::sync::Arc;

use anyhow::Result;

use mimir_core::book::Order;
use mimir_core::config::IlinkListenerConfig;
use mimir_core::core::{Direction, OrdType, Protocol, Side};
use mimir_core::journal::{Journal, JournalEntry};
use mimir_core::net::SessionDriver;
use mimir_core::ring::{Drainer, FrameRing};
use mimir_core::session::{SessionCore, SessionRole, SessionState, TimerAction};
use mimir_core::time::now_nanos;

use crate::engine::{
    cancel_order, replace_order, submit_order, CancelOutcome, EngineHandles, ReplaceOutcome,
    SubmitOutcome,
};

use super::messages as msg;
use super::{decode_frame, error_code, template, Frame, IlinkError};

/// Largest frame the engine ever emits
const MAX_OUT_FRAME: usize = 256;

fn side_from_wire(b: u8) -> Option<Side> {
    match b {
        1 => Some(Side::Buy),
        2 => Some(Side::Sell),
        _ => None,
    }
}

/// Order status bytes on the wire: 0=New 1=Partial 2=Filled 4=Canceled
fn fill_status(is_full: bool) -> u8 {
    if is_full {
        2
    } else {
        1
    }
}

pub struct IlinkEngine {
    core: SessionCore,
    ring: Arc<FrameRing>,
    drainer: Drainer,
    journal: Arc<Journal>,
    stream: String,
    handles: Arc<EngineHandles>,
    config: IlinkListenerConfig,

    /// Exchange-side view of the negotiated UUID; zero until Negotiate
    uuid: u64,
    negotiated: bool,
    in_seq: u32,
    out_seq: u32,
    closing: bool,
}

impl IlinkEngine {
    pub fn new(
        handles: Arc<EngineHandles>,
        config: IlinkListenerConfig,
        peer: impl std::fmt::Display,
    ) -> Self {
        let stream = format!("ILINK.3_{peer}");
        let ring = FrameRing::with_default_capacity();
        let drainer = Drainer::new(Arc::clone(&ring));

        let mut core = SessionCore::new(
            stream.clone(),
            Protocol::Ilink3,
            SessionRole::Acceptor,
            config.keepalive_ms,
            Arc::clone(&handles.listener),
        );
        core.transition(SessionState::Connecting);
        core.transition(SessionState::Connected);

        Self {
            core,
            ring,
            drainer,
            journal: Arc::clone(&handles.journal),
            stream,
            handles,
            config,
            uuid: 0,
            negotiated: false,
            in_seq: 0,
            out_seq: 0,
            closing: false,
        }
    }

    pub fn session(&self) -> &SessionCore {
        &self.core
    }

    fn send(&mut self, now_ms: u64, encode: impl FnOnce(&mut [u8]) -> usize) -> Result<()> {
        let mut claim = self.ring.try_claim(MAX_OUT_FRAME)?;
        let len = encode(claim.payload_mut());

        self.out_seq += 1;
        let entry = JournalEntry {
            timestamp_ms: now_ms,
            seq_num: self.out_seq,
            direction: Direction::Outbound,
            metadata: Some(claim.payload_mut()[4..6].to_vec()), // template id
            raw: claim.payload_mut()[..len].to_vec(),
        };
        self.journal.write(&self.stream, &entry)?;

        claim.commit_truncated(len);
        self.core.on_sent(now_ms);
        Ok(())
    }

    fn terminate(&mut self, now_ms: u64, code: u16, reason: &str) {
        let uuid = self.uuid;
        if let Err(e) = self.send(now_ms, |out| msg::encode_terminate(out, uuid, now_nanos(), code)) {
            tracing::error!(session = %self.core.id, error = %e, "terminate send failed");
        }
        self.core.transition(SessionState::Terminating);
        self.core.disconnect(reason);
        self.closing = true;
    }

    fn handle_frame(&mut self, now_ms: u64, frame: Frame<'_>) -> Result<()> {
        match frame.template_id {
            template::NEGOTIATE => self.on_negotiate(now_ms, msg::Negotiate(frame.block)),
            template::ESTABLISH => self.on_establish(now_ms, msg::Establish(frame.block)),
            template::SEQUENCE => {
                let seq = msg::Sequence(frame.block);
                tracing::debug!(session = %self.core.id, next = seq.next_seq_no(), "keepalive");
                self.core.clear_test_request();
                Ok(())
            }
            template::TERMINATE => {
                let term = msg::Terminate(frame.block);
                tracing::info!(session = %self.core.id, code = term.error_code(), "peer terminated");
                self.terminate(now_ms, error_code::NONE, "peer terminate");
                Ok(())
            }
            template::NEW_ORDER_SINGLE => {
                self.require_established(now_ms)?;
                if !self.closing {
                    self.on_new_order(now_ms, msg::NewOrderSingle(frame.block))?;
                    self.core.advance_expected();
                }
                Ok(())
            }
            template::ORDER_CANCEL_REQUEST => {
                self.require_established(now_ms)?;
                if !self.closing {
                    self.on_cancel(now_ms, msg::OrderCancelRequest(frame.block))?;
                    self.core.advance_expected();
                }
                Ok(())
            }
            template::ORDER_CANCEL_REPLACE => {
                self.require_established(now_ms)?;
                if !self.closing {
                    self.on_replace(now_ms, msg::OrderCancelReplace(frame.block))?;
                    self.core.advance_expected();
                }
                Ok(())
            }
            other => {
                tracing::info!(session = %self.core.id, template = other, "unsupported template");
                self.send(now_ms, |out| {
                    msg::encode_business_reject(out, other, 1, "unsupported template")
                })
            }
        }
    }

    fn require_established(&mut self, now_ms: u64) -> Result<()> {
        if !self.core.is_established() {
            tracing::warn!(session = %self.core.id, "business message before establish");
            self.terminate(now_ms, error_code::NOT_NEGOTIATED, "not established");
        }
        Ok(())
    }

    fn on_negotiate(&mut self, now_ms: u64, negotiate: msg::Negotiate<'_>) -> Result<()> {
        let uuid = negotiate.uuid();
        let firm = negotiate.firm().to_string();
        let key = negotiate.access_key_id().to_string();

        if !self.config.firms.is_empty() && !self.config.firms.iter().any(|f| f == &firm) {
            tracing::warn!(session = %self.core.id, firm, "unknown firm");
            self.send(now_ms, |out| {
                msg::encode_negotiation_reject(out, uuid, now_nanos(), error_code::BAD_FIRM)
            })?;
            self.core.disconnect("unknown firm");
            self.closing = true;
            return Ok(());
        }
        if !self.config.access_key_ids.is_empty()
            && !self.config.access_key_ids.iter().any(|k| k == &key)
        {
            tracing::warn!(session = %self.core.id, key, "unknown access key");
            self.send(now_ms, |out| {
                msg::encode_negotiation_reject(out, uuid, now_nanos(), error_code::BAD_ACCESS_KEY)
            })?;
            self.core.disconnect("unknown access key");
            self.closing = true;
            return Ok(());
        }

        self.uuid = uuid;
        self.negotiated = true;
        self.core.transition(SessionState::Handshaking);

        // First negotiation of this UUID: nothing precedes it
        self.send(now_ms, |out| {
            msg::encode_negotiation_response(out, uuid, now_nanos(), 0, 0)
        })
    }

    fn on_establish(&mut self, now_ms: u64, establish: msg::Establish<'_>) -> Result<()> {
        if !self.negotiated || establish.uuid() != self.uuid {
            tracing::warn!(session = %self.core.id, "establish before negotiate");
            self.send(now_ms, |out| {
                msg::encode_establishment_reject(
                    out,
                    establish.uuid(),
                    now_nanos(),
                    error_code::NOT_NEGOTIATED,
                )
            })?;
            self.core.disconnect("establish before negotiate");
            self.closing = true;
            return Ok(());
        }

        let keep_alive = establish.keep_alive_interval_ms();
        if keep_alive > 0 {
            self.core.set_heartbeat_interval_ms(keep_alive as u64);
        }
        self.core.set_expected_inbound(establish.next_seq_no() as u64);

        let uuid = self.uuid;
        let next_out = self.core.peek_seq() as u32;
        self.send(now_ms, |out| {
            msg::encode_establishment_ack(out, uuid, now_nanos(), next_out, 0, keep_alive)
        })?;

        self.core.transition(SessionState::Established);
        Ok(())
    }

    fn on_new_order(&mut self, now_ms: u64, new_order: msg::NewOrderSingle<'_>) -> Result<()> {
        let cl_ord_id = new_order.cl_ord_id().to_string();
        let symbol = new_order.symbol().to_string();
        let qty = new_order.order_qty();
        let raw_price = new_order.price();
        let side_byte = new_order.side();

        let Some(side) = side_from_wire(side_byte) else {
            return self.send(now_ms, |out| {
                msg::encode_business_reject(out, template::NEW_ORDER_SINGLE, 2, "bad side")
            });
        };

        let (ord_type, limit_price) = match new_order.ord_type() {
            1 => (OrdType::Market, None),
            _ => (OrdType::Limit, Some(raw_price)),
        };

        let order = Order::new(
            self.handles.order_ids.next_id(),
            &cl_ord_id,
            &symbol,
            side,
            ord_type,
            qty as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Ilink3,
        );

        match submit_order(&self.handles, order) {
            SubmitOutcome::Duplicate => Ok(()),
            SubmitOutcome::Rejected(reason) => {
                let reason = reason.to_string();
                self.send(now_ms, |out| {
                    msg::encode_business_reject(out, template::NEW_ORDER_SINGLE, 3, &reason)
                })
            }
            SubmitOutcome::Accepted { order, fill } => {
                let (exchange_id, price) = {
                    let o = order.lock();
                    (o.exchange_id, o.limit_price.unwrap_or(0))
                };
                self.send(now_ms, |out| {
                    msg::encode_exec_new(
                        out,
                        exchange_id,
                        price,
                        qty,
                        0,
                        qty,
                        side_byte,
                        0,
                        &cl_ord_id,
                        &symbol,
                    )
                })?;
                if let Some(fill) = fill {
                    self.send(now_ms, |out| {
                        msg::encode_exec_trade(
                            out,
                            exchange_id,
                            fill.price,
                            fill.qty as u32,
                            fill.cum_qty as u32,
                            fill.leaves_qty as u32,
                            side_byte,
                            fill_status(fill.is_full),
                            &cl_ord_id,
                            &symbol,
                            fill.match_number,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }

    fn on_cancel(&mut self, now_ms: u64, cancel: msg::OrderCancelRequest<'_>) -> Result<()> {
        let request_id = cancel.cl_ord_id().to_string();
        let orig = cancel.orig_cl_ord_id().to_string();

        match cancel_order(&self.handles, &orig, &self.core.id) {
            CancelOutcome::NotFound | CancelOutcome::TooLate(_) => Ok(()),
            CancelOutcome::Canceled {
                order,
                decremented_qty,
            } => {
                let exchange_id = order.lock().exchange_id;
                self.send(now_ms, |out| {
                    msg::encode_exec_cancel(
                        out,
                        exchange_id,
                        decremented_qty as u32,
                        &request_id,
                        &orig,
                    )
                })
            }
        }
    }

    fn on_replace(&mut self, now_ms: u64, replace: msg::OrderCancelReplace<'_>) -> Result<()> {
        let cl_ord_id = replace.cl_ord_id().to_string();
        let orig = replace.orig_cl_ord_id().to_string();
        let symbol = replace.symbol().to_string();
        let qty = replace.order_qty();
        let raw_price = replace.price();
        let side_byte = replace.side();

        let Some(side) = side_from_wire(side_byte) else {
            return self.send(now_ms, |out| {
                msg::encode_business_reject(out, template::ORDER_CANCEL_REPLACE, 2, "bad side")
            });
        };

        let (ord_type, limit_price) = match replace.ord_type() {
            1 => (OrdType::Market, None),
            _ => (OrdType::Limit, Some(raw_price)),
        };

        let replacement = Order::new(
            self.handles.order_ids.next_id(),
            &cl_ord_id,
            &symbol,
            side,
            ord_type,
            qty as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Ilink3,
        );

        match replace_order(&self.handles, &orig, &self.core.id, replacement) {
            ReplaceOutcome::NotFound | ReplaceOutcome::TooLate(_) => Ok(()),
            ReplaceOutcome::Replaced { new, fill, .. } => {
                let (exchange_id, leaves) = {
                    let o = new.lock();
                    (o.exchange_id, o.original_qty)
                };
                self.send(now_ms, |out| {
                    msg::encode_exec_modify(
                        out,
                        exchange_id,
                        raw_price,
                        qty,
                        leaves as u32,
                        &cl_ord_id,
                        &orig,
                        &symbol,
                    )
                })?;
                if let Some(fill) = fill {
                    self.send(now_ms, |out| {
                        msg::encode_exec_trade(
                            out,
                            exchange_id,
                            fill.price,
                            fill.qty as u32,
                            fill.cum_qty as u32,
                            fill.leaves_qty as u32,
                            side_byte,
                            fill_status(fill.is_full),
                            &cl_ord_id,
                            &symbol,
                            fill.match_number,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }
}

impl SessionDriver for IlinkEngine {
    fn on_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<usize> {
        self.core.on_received(now_ms);

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
                            metadata: Some(frame.template_id.to_le_bytes().to_vec()),
                            raw: bytes[consumed..consumed + len].to_vec(),
                        },
                    )?;

                    if let Err(e) = self.handle_frame(now_ms, frame) {
                        tracing::error!(session = %self.core.id, error = %e, "dispatch fault; continuing");
                        self.core.report_error(&e.to_string());
                    }
                    consumed += len;
                    if self.closing {
                        break;
                    }
                }
                Err(e @ IlinkError::FrameTooShort(_)) => {
                    tracing::warn!(session = %self.core.id, error = %e, "bad frame, closing");
                    self.core.disconnect("framing error");
                    self.closing = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(session = %self.core.id, error = %e, "decode error, closing");
                    self.core.disconnect("decode error");
                    self.closing = true;
                    break;
                }
            }
        }
        Ok(consumed)
    }

    fn poll(&mut self, now_ms: u64) -> Result<()> {
        while let Some(action) = self.core.poll_timers(now_ms) {
            let uuid = self.uuid;
            let next = self.core.peek_seq() as u32;
            match action {
                TimerAction::SendHeartbeat => {
                    if let Err(e) =
                        self.send(now_ms, |out| msg::encode_sequence(out, uuid, next, false))
                    {
                        tracing::error!(session = %self.core.id, error = %e, "keepalive failed");
                    }
                }
                TimerAction::SendTestRequest(_) => {
                    if let Err(e) =
                        self.send(now_ms, |out| msg::encode_sequence(out, uuid, next, true))
                    {
                        tracing::error!(session = %self.core.id, error = %e, "lapsed keepalive failed");
                    }
                }
                TimerAction::Disconnect => {
                    tracing::warn!(session = %self.core.id, "keepalive lapsed, terminating");
                    self.terminate(now_ms, error_code::KEEPALIVE_LAPSED, "keepalive timeout");
                    break;
                }
            }
        }
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
