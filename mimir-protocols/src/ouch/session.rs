//! OUCH session drivers and dispatchers
//!
//! No handshake layer: a connection is ESTABLISHED the moment it is
//! accepted, and the simulator opens with a start-of-day SystemEvent.
//! OUCH carries no sequence numbers either; the journal numbers each
//! direction with a per-session counter so replay ranges still work.
//! Framing errors have no reject primitive and drop the connection.

use std::io;
use std::sync::Arc;

use anyhow::Result;

use mimir_core::book::Order;
use mimir_core::core::{Direction, OrdType, Protocol};
use mimir_core::journal::{Journal, JournalEntry};
use mimir_core::net::SessionDriver;
use mimir_core::ring::{Drainer, FrameRing};
use mimir_core::session::{SessionCore, SessionRole, SessionState};
use mimir_core::time::nanos_since_midnight;

use crate::engine::{
    replace_order, submit_order, EngineHandles, ReplaceOutcome, SubmitOutcome,
};

use super::{cancel_reason, order_state, side_from_wire, side_to_wire, system_event, v42, v50};

/// OUCH 4.2 market-price sentinel
const MARKET_PRICE_42: u32 = 0x7FFF_FFFF;
/// OUCH 5.0 market-price sentinel
const MARKET_PRICE_50: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Outbound side shared by both generations: ring + journal tee with a
/// per-session outbound counter.
struct OuchOutbound {
    ring: Arc<FrameRing>,
    journal: Arc<Journal>,
    stream: String,
    out_seq: u32,
}

impl OuchOutbound {
    /// Claim exactly `len` bytes, encode, journal, publish.
    fn send(
        &mut self,
        now_ms: u64,
        len: usize,
        encode: impl FnOnce(&mut [u8]) -> usize,
    ) -> Result<()> {
        let mut claim = self.ring.try_claim(len)?;
        let written = encode(claim.payload_mut());
        debug_assert_eq!(written, len);

        self.out_seq += 1;
        let entry = JournalEntry {
            timestamp_ms: now_ms,
            seq_num: self.out_seq,
            direction: Direction::Outbound,
            metadata: Some(vec![claim.payload_mut()[0]]),
            raw: claim.payload_mut()[..len].to_vec(),
        };
        self.journal.write(&self.stream, &entry)?;

        claim.commit();
        Ok(())
    }
}

// ======================================================================
// OUCH 4.2
// ======================================================================

pub struct Ouch42Engine {
    core: SessionCore,
    out: OuchOutbound,
    drainer: Drainer,
    handles: Arc<EngineHandles>,
    in_seq: u32,
    closing: bool,
}

impl Ouch42Engine {
    pub fn new(handles: Arc<EngineHandles>, peer: impl std::fmt::Display) -> Self {
        let stream = format!("OUCH.4.2_{peer}");
        let ring = FrameRing::with_default_capacity();
        let drainer = Drainer::new(Arc::clone(&ring));

        let mut core = SessionCore::new(
            stream.clone(),
            Protocol::Ouch42,
            SessionRole::Acceptor,
            0, // no heartbeat layer
            Arc::clone(&handles.listener),
        );
        core.transition(SessionState::Connecting);
        core.transition(SessionState::Connected);
        core.transition(SessionState::Established);

        let mut engine = Self {
            core,
            out: OuchOutbound {
                ring,
                journal: Arc::clone(&handles.journal),
                stream,
                out_seq: 0,
            },
            drainer,
            handles,
            in_seq: 0,
            closing: false,
        };

        let now = mimir_core::time::now_millis();
        if let Err(e) = engine.out.send(now, v42::SYSTEM_EVENT_LEN, |out| {
            v42::encode_system_event(out, nanos_since_midnight(), system_event::START_OF_DAY)
        }) {
            tracing::error!(session = %engine.core.id, error = %e, "system event send failed");
        }
        engine
    }

    pub fn session(&self) -> &SessionCore {
        &self.core
    }

    fn journal_inbound(&mut self, now: u64, raw: &[u8]) -> Result<()> {
        self.in_seq += 1;
        self.handles.journal.write(
            &self.out.stream,
            &JournalEntry {
                timestamp_ms: now,
                seq_num: self.in_seq,
                direction: Direction::Inbound,
                metadata: Some(vec![raw[0]]),
                raw: raw.to_vec(),
            },
        )?;
        Ok(())
    }

    fn handle_enter(&mut self, now: u64, enter: &v42::EnterOrder<'_>) -> Result<()> {
        let token = enter.token().to_string();
        let symbol = enter.symbol().to_string();
        let shares = enter.shares();
        let raw_price = enter.price();
        let tif = enter.time_in_force();
        let firm = enter.firm().to_string();
        let side_byte = enter.side_byte();

        let side = match side_from_wire(side_byte) {
            Ok(side) => side,
            Err(e) => {
                tracing::warn!(session = %self.core.id, token, error = %e, "bad side");
                return self.out.send(now, v42::REJECTED_LEN, |out| {
                    v42::encode_rejected(out, nanos_since_midnight(), &token, b'I')
                });
            }
        };

        let (ord_type, limit_price) = if raw_price == MARKET_PRICE_42 {
            (OrdType::Market, None)
        } else {
            (OrdType::Limit, Some(raw_price as i64))
        };

        let order = Order::new(
            self.handles.order_ids.next_id(),
            &token,
            &symbol,
            side,
            ord_type,
            shares as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Ouch42,
        );

        match submit_order(&self.handles, order) {
            SubmitOutcome::Duplicate => Ok(()),
            SubmitOutcome::Rejected(reason) => {
                let code = match reason {
                    "unknown symbol" => b'S',
                    "zero quantity" => b'Z',
                    _ => b'O',
                };
                self.out.send(now, v42::REJECTED_LEN, |out| {
                    v42::encode_rejected(out, nanos_since_midnight(), &token, code)
                })
            }
            SubmitOutcome::Accepted { order, fill } => {
                let (exchange_id, price_out) = {
                    let o = order.lock();
                    (o.exchange_id, o.limit_price.unwrap_or(0) as u32)
                };
                self.out.send(now, v42::ACCEPTED_LEN, |out| {
                    v42::encode_accepted(
                        out,
                        nanos_since_midnight(),
                        &token,
                        side_byte,
                        shares,
                        &symbol,
                        if limit_price.is_some() { price_out } else { raw_price },
                        tif,
                        &firm,
                        exchange_id,
                        order_state::LIVE,
                    )
                })?;

                if let Some(fill) = fill {
                    self.out.send(now, v42::EXECUTED_LEN, |out| {
                        v42::encode_executed(
                            out,
                            nanos_since_midnight(),
                            &token,
                            fill.qty as u32,
                            fill.price as u32,
                            fill.match_number,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }

    fn handle_cancel(&mut self, now: u64, cancel: &v42::CancelOrder<'_>) -> Result<()> {
        let token = cancel.token().to_string();
        let down_to = cancel.shares() as u64;

        let Some(order_ref) = self.handles.registry.by_client_id(&token, &self.core.id) else {
            tracing::info!(session = %self.core.id, token, "cancel for unknown token, dropping");
            return Ok(());
        };

        let decrement = {
            let mut o = order_ref.lock();
            let leaves = o.leaves_qty;
            if down_to >= leaves {
                // Nothing to take off
                None
            } else {
                let qty = leaves - down_to;
                if o.decrement(qty) {
                    Some(qty)
                } else {
                    None
                }
            }
        };

        match decrement {
            Some(qty) => self.out.send(now, v42::CANCELED_LEN, |out| {
                v42::encode_canceled(
                    out,
                    nanos_since_midnight(),
                    &token,
                    qty as u32,
                    cancel_reason::USER,
                )
            }),
            None => {
                tracing::info!(session = %self.core.id, token, "cancel had no effect");
                Ok(())
            }
        }
    }

    fn handle_replace(&mut self, now: u64, replace: &v42::ReplaceOrder<'_>) -> Result<()> {
        let existing = replace.existing_token().to_string();
        let new_token = replace.new_token().to_string();
        let shares = replace.shares();
        let price = replace.price();

        // Symbol and side carry over from the original
        let Some(old_ref) = self.handles.registry.by_client_id(&existing, &self.core.id) else {
            tracing::info!(session = %self.core.id, token = existing, "replace for unknown token");
            return Ok(());
        };
        let (symbol, side) = {
            let o = old_ref.lock();
            (o.symbol.clone(), o.side)
        };

        let (ord_type, limit_price) = if price == MARKET_PRICE_42 {
            (OrdType::Market, None)
        } else {
            (OrdType::Limit, Some(price as i64))
        };

        let replacement = Order::new(
            self.handles.order_ids.next_id(),
            &new_token,
            &symbol,
            side,
            ord_type,
            shares as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Ouch42,
        );

        match replace_order(&self.handles, &existing, &self.core.id, replacement) {
            ReplaceOutcome::NotFound | ReplaceOutcome::TooLate(_) => Ok(()),
            ReplaceOutcome::Replaced { new, fill, .. } => {
                let exchange_id = new.lock().exchange_id;
                self.out.send(now, v42::REPLACED_LEN, |out| {
                    v42::encode_replaced(
                        out,
                        nanos_since_midnight(),
                        &new_token,
                        side_to_wire(side),
                        shares,
                        &symbol,
                        price,
                        "",
                        exchange_id,
                        order_state::LIVE,
                        &existing,
                    )
                })?;
                if let Some(fill) = fill {
                    self.out.send(now, v42::EXECUTED_LEN, |out| {
                        v42::encode_executed(
                            out,
                            nanos_since_midnight(),
                            &new_token,
                            fill.qty as u32,
                            fill.price as u32,
                            fill.match_number,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }
}

impl SessionDriver for Ouch42Engine {
    fn on_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<usize> {
        let mut consumed = 0usize;
        loop {
            match v42::decode(&bytes[consumed..]) {
                Ok(None) => break,
                Ok(Some((len, msg))) => {
                    let raw = bytes[consumed..consumed + len].to_vec();
                    self.journal_inbound(now_ms, &raw)?;

                    let result = match &msg {
                        v42::Inbound::Enter(enter) => self.handle_enter(now_ms, enter),
                        v42::Inbound::Cancel(cancel) => self.handle_cancel(now_ms, cancel),
                        v42::Inbound::Replace(replace) => self.handle_replace(now_ms, replace),
                    };
                    if let Err(e) = result {
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

// ======================================================================
// OUCH 5.0
// ======================================================================

pub struct Ouch50Engine {
    core: SessionCore,
    out: OuchOutbound,
    drainer: Drainer,
    handles: Arc<EngineHandles>,
    in_seq: u32,
    closing: bool,
}

impl Ouch50Engine {
    pub fn new(handles: Arc<EngineHandles>, peer: impl std::fmt::Display) -> Self {
        let stream = format!("OUCH.5.0_{peer}");
        let ring = FrameRing::with_default_capacity();
        let drainer = Drainer::new(Arc::clone(&ring));

        let mut core = SessionCore::new(
            stream.clone(),
            Protocol::Ouch50,
            SessionRole::Acceptor,
            0,
            Arc::clone(&handles.listener),
        );
        core.transition(SessionState::Connecting);
        core.transition(SessionState::Connected);
        core.transition(SessionState::Established);

        let mut engine = Self {
            core,
            out: OuchOutbound {
                ring,
                journal: Arc::clone(&handles.journal),
                stream,
                out_seq: 0,
            },
            drainer,
            handles,
            in_seq: 0,
            closing: false,
        };

        let now = mimir_core::time::now_millis();
        if let Err(e) = engine.out.send(now, v50::SYSTEM_EVENT_FIXED, |out| {
            v50::encode_system_event(out, nanos_since_midnight(), system_event::START_OF_DAY)
        }) {
            tracing::error!(session = %engine.core.id, error = %e, "system event send failed");
        }
        engine
    }

    pub fn session(&self) -> &SessionCore {
        &self.core
    }

    fn journal_inbound(&mut self, now: u64, raw: &[u8]) -> Result<()> {
        self.in_seq += 1;
        self.handles.journal.write(
            &self.out.stream,
            &JournalEntry {
                timestamp_ms: now,
                seq_num: self.in_seq,
                direction: Direction::Inbound,
                metadata: Some(vec![raw[0]]),
                raw: raw.to_vec(),
            },
        )?;
        Ok(())
    }

    fn handle_enter(&mut self, now: u64, enter: &v50::EnterOrder<'_>) -> Result<()> {
        let user_ref = enter.user_ref_num();
        let symbol = enter.symbol().to_string();
        let shares = enter.shares();
        let raw_price = enter.price();
        let side_byte = enter.side_byte();

        // Surface appendages to the log; reserve/discretion do not alter
        // the simulated fill behavior.
        for app in enter.appendages() {
            match app {
                Ok((tag, data)) => {
                    tracing::debug!(session = %self.core.id, user_ref, tag, len = data.len(), "appendage")
                }
                Err(e) => {
                    tracing::warn!(session = %self.core.id, user_ref, error = %e, "bad appendage");
                    return self.out.send(now, v50::REJECTED_FIXED, |out| {
                        v50::encode_rejected(out, nanos_since_midnight(), user_ref, 3)
                    });
                }
            }
        }

        let side = match side_from_wire(side_byte) {
            Ok(side) => side,
            Err(_) => {
                return self.out.send(now, v50::REJECTED_FIXED, |out| {
                    v50::encode_rejected(out, nanos_since_midnight(), user_ref, 4)
                })
            }
        };

        let (ord_type, limit_price) = if raw_price == MARKET_PRICE_50 {
            (OrdType::Market, None)
        } else {
            (OrdType::Limit, Some(raw_price as i64))
        };

        let order = Order::new(
            self.handles.order_ids.next_id(),
            user_ref.to_string(),
            &symbol,
            side,
            ord_type,
            shares as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Ouch50,
        );

        match submit_order(&self.handles, order) {
            SubmitOutcome::Duplicate => Ok(()),
            SubmitOutcome::Rejected(reason) => {
                let code: u16 = match reason {
                    "unknown symbol" => 1,
                    "zero quantity" => 2,
                    _ => 99,
                };
                self.out.send(now, v50::REJECTED_FIXED, |out| {
                    v50::encode_rejected(out, nanos_since_midnight(), user_ref, code)
                })
            }
            SubmitOutcome::Accepted { order, fill } => {
                let exchange_id = order.lock().exchange_id;
                self.out.send(now, v50::ACCEPTED_FIXED, |out| {
                    v50::encode_accepted(
                        out,
                        nanos_since_midnight(),
                        user_ref,
                        side_byte,
                        shares,
                        &symbol,
                        raw_price,
                        exchange_id,
                        order_state::LIVE,
                    )
                })?;
                if let Some(fill) = fill {
                    self.out.send(now, v50::EXECUTED_FIXED, |out| {
                        v50::encode_executed(
                            out,
                            nanos_since_midnight(),
                            user_ref,
                            fill.qty as u32,
                            fill.price as u64,
                            fill.match_number,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }

    fn handle_cancel(&mut self, now: u64, cancel: &v50::CancelOrder<'_>) -> Result<()> {
        let user_ref = cancel.user_ref_num();
        let down_to = cancel.quantity() as u64;
        let key = user_ref.to_string();

        let Some(order_ref) = self.handles.registry.by_client_id(&key, &self.core.id) else {
            tracing::info!(session = %self.core.id, user_ref, "cancel for unknown ref, dropping");
            return Ok(());
        };

        let decrement = {
            let mut o = order_ref.lock();
            let leaves = o.leaves_qty;
            if down_to >= leaves {
                None
            } else {
                let qty = leaves - down_to;
                if o.decrement(qty) {
                    Some(qty)
                } else {
                    None
                }
            }
        };

        match decrement {
            Some(qty) => self.out.send(now, v50::CANCELED_FIXED, |out| {
                v50::encode_canceled(
                    out,
                    nanos_since_midnight(),
                    user_ref,
                    qty as u32,
                    cancel_reason::USER,
                )
            }),
            None => Ok(()),
        }
    }

    fn handle_replace(&mut self, now: u64, replace: &v50::ReplaceOrder<'_>) -> Result<()> {
        let orig_ref = replace.orig_user_ref_num();
        let new_ref = replace.new_user_ref_num();
        let shares = replace.shares();
        let price = replace.price();
        let orig_key = orig_ref.to_string();

        let Some(old_ref) = self.handles.registry.by_client_id(&orig_key, &self.core.id) else {
            tracing::info!(session = %self.core.id, user_ref = orig_ref, "replace for unknown ref");
            return Ok(());
        };
        let (symbol, side) = {
            let o = old_ref.lock();
            (o.symbol.clone(), o.side)
        };

        let (ord_type, limit_price) = if price == MARKET_PRICE_50 {
            (OrdType::Market, None)
        } else {
            (OrdType::Limit, Some(price as i64))
        };

        let replacement = Order::new(
            self.handles.order_ids.next_id(),
            new_ref.to_string(),
            &symbol,
            side,
            ord_type,
            shares as u64,
            limit_price,
            self.core.id.clone(),
            Protocol::Ouch50,
        );

        match replace_order(&self.handles, &orig_key, &self.core.id, replacement) {
            ReplaceOutcome::NotFound | ReplaceOutcome::TooLate(_) => Ok(()),
            ReplaceOutcome::Replaced { new, fill, .. } => {
                let exchange_id = new.lock().exchange_id;
                self.out.send(now, v50::REPLACED_FIXED, |out| {
                    v50::encode_replaced(
                        out,
                        nanos_since_midnight(),
                        orig_ref,
                        new_ref,
                        side_to_wire(side),
                        shares,
                        &symbol,
                        price,
                        exchange_id,
                        order_state::LIVE,
                    )
                })?;
                if let Some(fill) = fill {
                    self.out.send(now, v50::EXECUTED_FIXED, |out| {
                        v50::encode_executed(
                            out,
                            nanos_since_midnight(),
                            new_ref,
                            fill.qty as u32,
                            fill.price as u64,
                            fill.match_number,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }
}

impl SessionDriver for Ouch50Engine {
    fn on_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<usize> {
        let mut consumed = 0usize;
        loop {
            match v50::decode(&bytes[consumed..]) {
                Ok(None) => break,
                Ok(Some((len, msg))) => {
                    let raw = bytes[consumed..consumed + len].to_vec();
                    self.journal_inbound(now_ms, &raw)?;

                    let result = match &msg {
                        v50::Inbound::Enter(enter) => self.handle_enter(now_ms, enter),
                        v50::Inbound::Cancel(cancel) => self.handle_cancel(now_ms, cancel),
                        v50::Inbound::Replace(replace) => self.handle_replace(now_ms, replace),
                    };
                    if let Err(e) = result {
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
