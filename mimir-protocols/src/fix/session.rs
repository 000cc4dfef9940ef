//! FIX session runtime (acceptor side)
//!
//! One `FixEngine` per connection. It owns the reassembler, the outbound
//! ring, and the session core, and drives the whole session layer:
//! logon with CompID validation, the heartbeat / test-request ladder,
//! sequence-gap detection with ResendRequest, journal-backed
//! retransmission (PossDupFlag + OrigSendingTime, admin messages
//! replaced by gap-fills), SequenceReset in both modes, and logout.
//! Application messages hand off to [`super::dispatcher`].

use std::io;
use std::sync::Arc;

use anyhow::Result;

use mimir_core::config::FixListenerConfig;
use mimir_core::core::{Direction, Protocol};
use mimir_core::journal::{Journal, JournalEntry};
use mimir_core::net::SessionDriver;
use mimir_core::pool::{ExhaustionPolicy, MessagePool};
use mimir_core::ring::{Drainer, FrameRing};
use mimir_core::session::{SessionCore, SessionRole, SessionState, TimerAction};

use super::decoder::{FixMessage, FixReader};
use super::dispatcher::{self, AppContext};
use super::encoder::{FixEncoder, FixEncoderFactory};
use super::{msg_type, session_reject, tags, FixError};

/// Per-session pool of inbound message views
const MESSAGE_POOL_SIZE: usize = 8;

/// Outbound sender: encoder factory + journal tee, shared by the session
/// runtime and the app dispatcher.
pub struct FixOutbound {
    factory: FixEncoderFactory,
    journal: Arc<Journal>,
    stream: String,
    fix42: bool,
    fixt: bool,
}

impl FixOutbound {
    /// FIX 4.2 differs in a few report fields (ExecTransType, LastShares
    /// semantics); the dispatcher asks.
    pub fn is_fix42(&self) -> bool {
        self.fix42
    }

    pub fn is_fixt(&self) -> bool {
        self.fixt
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Encode, journal, and publish one message with a fresh sequence
    /// number. Ring backpressure surfaces as `Err`; an encoding error
    /// rolls back both the claim and the sequence number.
    pub fn send(
        &self,
        core: &mut SessionCore,
        now_ms: u64,
        mt: &[u8],
        build: impl FnOnce(&mut FixEncoder),
    ) -> Result<u64> {
        // A failed claim never ran the sequence closure, so there is
        // nothing to roll back on this path.
        let mut enc = self.factory.begin(core, mt)?;
        build(&mut enc);
        self.seal_and_commit(core, enc, now_ms, true)
    }

    /// Retransmission path: the message carries its original sequence
    /// number and is not journaled again.
    pub fn send_with_seq(
        &self,
        core: &mut SessionCore,
        seq: u64,
        now_ms: u64,
        mt: &[u8],
        build: impl FnOnce(&mut FixEncoder),
    ) -> Result<u64> {
        let mut enc = self.factory.begin_with_seq(seq, mt)?;
        build(&mut enc);
        self.seal_and_commit(core, enc, now_ms, false)
    }

    fn seal_and_commit(
        &self,
        core: &mut SessionCore,
        enc: FixEncoder,
        now_ms: u64,
        journal: bool,
    ) -> Result<u64> {
        let seq = enc.seq();
        let mut sealed = match enc.finish(now_ms) {
            Ok(sealed) => sealed,
            Err(e) => {
                if journal {
                    core.unclaim_seq();
                }
                return Err(e.into());
            }
        };

        if journal {
            let mt = message_type_of(sealed.bytes()).unwrap_or_default();
            let entry = JournalEntry {
                timestamp_ms: now_ms,
                seq_num: seq as u32,
                direction: Direction::Outbound,
                metadata: Some(mt),
                raw: sealed.bytes().to_vec(),
            };
            if let Err(e) = self.journal.write(&self.stream, &entry) {
                // Dropping `sealed` aborts the claim; give the sequence
                // number back too.
                core.unclaim_seq();
                return Err(e.into());
            }
        }

        sealed.commit();
        core.on_sent(now_ms);
        Ok(seq)
    }
}

/// Extract tag 35 from raw wire bytes
fn message_type_of(raw: &[u8]) -> Option<Vec<u8>> {
    let marker = b"\x0135=";
    let at = raw.windows(4).position(|w| w == marker)? + 4;
    let end = raw[at..].iter().position(|&b| b == super::SOH)? + at;
    Some(raw[at..end].to_vec())
}

/// True when raw bytes carry PossDupFlag=Y (a retransmission)
fn is_poss_dup(raw: &[u8]) -> bool {
    raw.windows(6).any(|w| w == b"\x0143=Y\x01")
}

pub struct FixEngine {
    core: SessionCore,
    reader: FixReader,
    pool: MessagePool<FixMessage>,
    out: FixOutbound,
    drainer: Drainer,
    handles: Arc<crate::engine::EngineHandles>,
    config: FixListenerConfig,
    /// One ResendRequest per gap until the gap closes
    gap_pending: bool,
    closing: bool,
}

impl FixEngine {
    /// Journal stream name for a comp-id pair; stable across reconnects
    /// so the outbound log is usable as resend material.
    pub fn stream_name(config: &FixListenerConfig) -> String {
        format!(
            "{}.{}-{}",
            config.begin_string, config.target_comp_id, config.sender_comp_id
        )
    }

    pub fn new(handles: Arc<crate::engine::EngineHandles>, config: FixListenerConfig) -> Self {
        let protocol = match config.begin_string.as_str() {
            "FIX.4.2" => Protocol::Fix42,
            "FIX.4.4" => Protocol::Fix44,
            _ => Protocol::Fix50,
        };
        let stream = Self::stream_name(&config);

        let ring = FrameRing::with_default_capacity();
        let drainer = Drainer::new(Arc::clone(&ring));
        let factory = FixEncoderFactory::new(
            Arc::clone(&ring),
            config.begin_string.clone(),
            config.sender_comp_id.clone(),
            config.target_comp_id.clone(),
        );

        let mut core = SessionCore::new(
            stream.clone(),
            protocol,
            SessionRole::Acceptor,
            config.heartbeat_secs * 1000,
            Arc::clone(&handles.listener),
        );
        core.transition(SessionState::Connecting);
        core.transition(SessionState::Connected);

        // Resume outbound numbering after the journaled tail so resend
        // material stays coherent across restarts.
        if let Some(last) = handles.journal.latest(&stream, Direction::Outbound) {
            core.set_next_outbound(last.seq_num as u64 + 1);
        }

        Self {
            core,
            reader: FixReader::new(),
            pool: MessagePool::new(MESSAGE_POOL_SIZE, ExhaustionPolicy::Fail),
            out: FixOutbound {
                factory,
                journal: Arc::clone(&handles.journal),
                stream,
                fix42: config.begin_string == "FIX.4.2",
                fixt: config.begin_string == "FIXT.1.1",
            },
            drainer,
            handles,
            config,
            gap_pending: false,
            closing: false,
        }
    }

    pub fn session(&self) -> &SessionCore {
        &self.core
    }

    // ------------------------------------------------------------------
    // Message handling
    // ------------------------------------------------------------------

    fn handle_message(&mut self, now: u64, view: &FixMessage) -> Result<()> {
        self.core.on_received(now);

        // Tee inbound into the journal before anything can fail
        self.handles.journal.write(
            &self.out.stream,
            &JournalEntry {
                timestamp_ms: now,
                seq_num: view.seq_num().unwrap_or(0) as u32,
                direction: Direction::Inbound,
                metadata: Some(view.msg_type().to_vec()),
                raw: view.raw().to_vec(),
            },
        )?;

        let mt = view.msg_type().to_vec();

        if mt == msg_type::LOGON {
            return self.handle_logon(now, view);
        }

        if !self.core.is_established() {
            tracing::warn!(
                session = %self.core.id,
                msg_type = %String::from_utf8_lossy(&mt),
                "message before logon"
            );
            self.disconnect(now, "first message must be Logon");
            return Ok(());
        }

        let Some(seq) = view.seq_num() else {
            self.send_session_reject(now, 0, session_reject::REQUIRED_TAG_MISSING, "MsgSeqNum missing");
            return Ok(());
        };

        // SequenceReset manages the counters itself
        if mt == msg_type::SEQUENCE_RESET {
            self.handle_sequence_reset(view);
            return Ok(());
        }

        let expected = self.core.expected_inbound();
        let mut advance = false;
        if seq > expected {
            if !self.gap_pending {
                tracing::info!(
                    session = %self.core.id,
                    got = seq,
                    expected,
                    "sequence gap, requesting resend"
                );
                self.send_resend_request(now, expected);
                self.gap_pending = true;
            }
            // Drop the out-of-order message; the peer will retransmit
            return Ok(());
        } else if seq < expected {
            if view.flag(tags::POSS_DUP_FLAG) {
                // Process without advancing
                tracing::debug!(session = %self.core.id, seq, expected, "possdup below expected");
            } else {
                self.core.report_error(&format!(
                    "sequence number too low: got {seq}, expected {expected}"
                ));
                self.send_logout(now, "Sequence number too low");
                self.disconnect(now, "sequence number too low");
                return Ok(());
            }
        } else {
            advance = true;
        }

        match mt.as_slice() {
            msg_type::HEARTBEAT => {
                // A heartbeat answers the outstanding TestRequest unless
                // it echoes a different TestReqID
                let answered = match (
                    self.core.pending_test_request(),
                    view.get_str(tags::TEST_REQ_ID),
                ) {
                    (Some(pending), Some(got)) => pending == got,
                    _ => true,
                };
                if answered {
                    self.core.clear_test_request();
                }
            }
            msg_type::TEST_REQUEST => {
                let id = view.get_str(tags::TEST_REQ_ID).map(str::to_string);
                self.send_admin(now, msg_type::HEARTBEAT, |enc| {
                    if let Some(id) = &id {
                        enc.field_str(tags::TEST_REQ_ID, id);
                    }
                });
            }
            msg_type::RESEND_REQUEST => {
                let begin = view.get_u64(tags::BEGIN_SEQ_NO).unwrap_or(1);
                let end = view.get_u64(tags::END_SEQ_NO).unwrap_or(0);
                self.resend_range(now, begin, end)?;
            }
            msg_type::LOGOUT => {
                self.send_admin(now, msg_type::LOGOUT, |_| {});
                self.core.transition(SessionState::Terminating);
                self.disconnect(now, "logout");
            }
            msg_type::REJECT => {
                tracing::warn!(
                    session = %self.core.id,
                    reason = view.get_str(tags::TEXT).unwrap_or(""),
                    "peer rejected our message"
                );
            }
            _ => {
                // Application traffic. Internal faults are contained
                // here: the session survives and moves on.
                let mut ctx = AppContext {
                    handles: &self.handles,
                    out: &self.out,
                    core: &mut self.core,
                    config: &self.config,
                    now_ms: now,
                };
                if let Err(e) = dispatcher::dispatch_app(&mut ctx, view) {
                    tracing::error!(
                        session = %self.core.id,
                        seq,
                        msg_type = %String::from_utf8_lossy(&mt),
                        error = %e,
                        "dispatcher fault; continuing session"
                    );
                    self.core.report_error(&e.to_string());
                }
            }
        }

        if advance {
            self.core.advance_expected();
            self.gap_pending = false;
        }
        Ok(())
    }

    fn handle_logon(&mut self, now: u64, view: &FixMessage) -> Result<()> {
        let their_sender = view.get_str(tags::SENDER_COMP_ID).unwrap_or("");
        let their_target = view.get_str(tags::TARGET_COMP_ID).unwrap_or("");
        let seq = view.seq_num().unwrap_or(1);

        if their_sender != self.config.target_comp_id
            || their_target != self.config.sender_comp_id
        {
            tracing::warn!(
                session = %self.core.id,
                got_sender = their_sender,
                got_target = their_target,
                "comp id mismatch on logon"
            );
            self.send_session_reject(now, seq, session_reject::COMP_ID_PROBLEM, "CompID problem");
            self.disconnect(now, "comp id mismatch");
            return Ok(());
        }

        if let Some(hb) = view.get_u64(tags::HEART_BT_INT) {
            self.core.set_heartbeat_interval_ms(hb * 1000);
        }

        let reset = view.flag(tags::RESET_SEQ_NUM_FLAG) || self.config.reset_on_logon;
        if reset {
            // Acceptor answers from 1; the peer's next message is 2
            // regardless of what this Logon carried.
            self.core.set_next_outbound(1);
            self.core.set_expected_inbound(2);
        }

        self.core.transition(SessionState::Handshaking);

        let hb_secs = self.core.heartbeat_interval_ms() / 1000;
        let fixt = self.out.is_fixt();
        self.send_admin(now, msg_type::LOGON, |enc| {
            enc.field_int(tags::HEART_BT_INT, hb_secs as i64);
            if reset {
                enc.field_char(tags::RESET_SEQ_NUM_FLAG, b'Y');
            }
            if fixt {
                // FIX 5.0 over FIXT.1.1
                enc.field_int(tags::DEFAULT_APPL_VER_ID, 9);
            }
        });

        self.core.transition(SessionState::Established);

        if !reset {
            let expected = self.core.expected_inbound();
            if seq == expected {
                self.core.advance_expected();
                self.gap_pending = false;
            } else if seq > expected {
                self.send_resend_request(now, expected);
                self.gap_pending = true;
            } else {
                self.send_logout(now, "Sequence number too low");
                self.disconnect(now, "sequence number too low on logon");
            }
        }
        Ok(())
    }

    fn handle_sequence_reset(&mut self, view: &FixMessage) {
        let Some(new_seq) = view.get_u64(tags::NEW_SEQ_NO) else {
            tracing::warn!(session = %self.core.id, "SequenceReset without NewSeqNo");
            return;
        };
        let expected = self.core.expected_inbound();

        if view.flag(tags::GAP_FILL_FLAG) {
            if new_seq >= expected {
                self.core.set_expected_inbound(new_seq);
                self.gap_pending = false;
            } else {
                tracing::info!(
                    session = %self.core.id,
                    new_seq,
                    expected,
                    "gap fill below expected, ignoring"
                );
            }
        } else {
            // Reset mode: unconditional
            self.core.set_expected_inbound(new_seq);
            self.gap_pending = false;
        }
    }

    // ------------------------------------------------------------------
    // Resend protocol (we are the resender)
    // ------------------------------------------------------------------

    /// Retransmit outbound [begin, min(end, last_sent)]; end 0 means "to
    /// infinity". Application messages go out verbatim with PossDupFlag
    /// and OrigSendingTime; admin runs collapse into gap-fills.
    fn resend_range(&mut self, now: u64, begin: u64, end: u64) -> Result<()> {
        let last_sent = self.core.last_sent_seq();
        let upper = if end == 0 { last_sent } else { end.min(last_sent) };
        if begin > upper {
            tracing::info!(session = %self.core.id, begin, end, "resend request covers nothing");
            return Ok(());
        }

        self.core.transition(SessionState::Resending);
        tracing::info!(session = %self.core.id, begin, upper, "resending");

        // Pull the range out of the journal (write order == seq order,
        // retransmissions excluded).
        let mut stored: Vec<(u64, Vec<u8>)> = Vec::new();
        self.handles.journal.replay(
            &self.out.stream,
            Some(Direction::Outbound),
            begin as u32,
            upper as u32,
            |entry| {
                if !is_poss_dup(entry.raw) {
                    stored.push((entry.seq_num as u64, entry.raw.to_vec()));
                }
                true
            },
        )?;
        stored.sort_by_key(|(seq, _)| *seq);

        let mut gap_start: Option<u64> = None;
        let mut reader_msg = FixMessage::default();

        for seq in begin..=upper {
            let found = stored
                .iter()
                .find(|(s, _)| *s == seq)
                .map(|(_, raw)| raw.clone());

            let raw = match found {
                Some(raw) => raw,
                None => {
                    // Nothing journaled for this number: gap-fill it
                    gap_start.get_or_insert(seq);
                    continue;
                }
            };

            let mt = message_type_of(&raw).unwrap_or_default();
            if msg_type::is_admin(&mt) {
                gap_start.get_or_insert(seq);
                continue;
            }

            // Flush any admin run as one gap-fill renumbering to here
            if let Some(gs) = gap_start.take() {
                self.send_gap_fill(now, gs, seq);
            }

            // Re-read the stored message and re-emit it field-for-field
            // with the retransmission markers.
            let mut one_reader = FixReader::new();
            one_reader.add_data(&raw);
            if !one_reader.read_message(&mut reader_msg).unwrap_or(false) {
                tracing::error!(session = %self.core.id, seq, "journaled message unreadable, gap-filling");
                gap_start.get_or_insert(seq);
                continue;
            }

            self.retransmit(now, seq, &reader_msg);
        }

        if let Some(gs) = gap_start.take() {
            // Trailing admin run renumbers past the range
            self.send_gap_fill(now, gs, upper + 1);
        }

        self.core.transition(SessionState::Established);
        Ok(())
    }

    fn retransmit(&mut self, now: u64, seq: u64, original: &FixMessage) {
        let mt = original.msg_type().to_vec();
        let orig_time = original.get_str(tags::SENDING_TIME).unwrap_or("").to_string();

        // Collect application fields, skipping header/trailer tags the
        // encoder lays itself and the markers we are about to add.
        let mut fields: Vec<(u32, Vec<u8>)> = Vec::new();
        for tag in original_field_tags(original) {
            if matches!(
                tag,
                tags::BEGIN_STRING
                    | tags::BODY_LENGTH
                    | tags::MSG_TYPE
                    | tags::MSG_SEQ_NUM
                    | tags::SENDER_COMP_ID
                    | tags::TARGET_COMP_ID
                    | tags::SENDING_TIME
                    | tags::CHECK_SUM
                    | tags::POSS_DUP_FLAG
                    | tags::ORIG_SENDING_TIME
            ) {
                continue;
            }
            if let Some(value) = original.get(tag) {
                fields.push((tag, value.to_vec()));
            }
        }

        let result = self.out.send_with_seq(&mut self.core, seq, now, &mt, |enc| {
            enc.field_char(tags::POSS_DUP_FLAG, b'Y');
            enc.field_str(tags::ORIG_SENDING_TIME, &orig_time);
            for (tag, value) in &fields {
                enc.field_bytes(*tag, value);
            }
        });
        if let Err(e) = result {
            tracing::error!(session = %self.core.id, seq, error = %e, "retransmit failed");
        }
    }

    fn send_gap_fill(&mut self, now: u64, gap_seq: u64, new_seq: u64) {
        let result = self
            .out
            .send_with_seq(&mut self.core, gap_seq, now, msg_type::SEQUENCE_RESET, |enc| {
                enc.field_char(tags::POSS_DUP_FLAG, b'Y');
                enc.field_char(tags::GAP_FILL_FLAG, b'Y');
                enc.field_int(tags::NEW_SEQ_NO, new_seq as i64);
            });
        if let Err(e) = result {
            tracing::error!(session = %self.core.id, gap_seq, error = %e, "gap fill failed");
        }
    }

    // ------------------------------------------------------------------
    // Admin sends
    // ------------------------------------------------------------------

    fn send_admin(&mut self, now: u64, mt: &[u8], build: impl FnOnce(&mut FixEncoder)) {
        if let Err(e) = self.out.send(&mut self.core, now, mt, build) {
            tracing::error!(
                session = %self.core.id,
                msg_type = %String::from_utf8_lossy(mt),
                error = %e,
                "admin send failed"
            );
        }
    }

    fn send_resend_request(&mut self, now: u64, from: u64) {
        self.send_admin(now, msg_type::RESEND_REQUEST, |enc| {
            enc.field_int(tags::BEGIN_SEQ_NO, from as i64);
            enc.field_int(tags::END_SEQ_NO, 0);
        });
    }

    fn send_session_reject(&mut self, now: u64, ref_seq: u64, reason: u32, text: &str) {
        self.send_admin(now, msg_type::REJECT, |enc| {
            enc.field_int(tags::REF_SEQ_NUM, ref_seq as i64);
            enc.field_int(tags::SESSION_REJECT_REASON, reason as i64);
            enc.field_str(tags::TEXT, text);
        });
    }

    fn send_logout(&mut self, now: u64, text: &str) {
        self.send_admin(now, msg_type::LOGOUT, |enc| {
            enc.field_str(tags::TEXT, text);
        });
    }

    fn disconnect(&mut self, _now: u64, reason: &str) {
        self.core.disconnect(reason);
        self.closing = true;
    }
}

impl SessionDriver for FixEngine {
    fn on_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<usize> {
        self.reader.add_data(bytes);

        loop {
            let Some(mut view) = self.pool.acquire() else {
                // Pool exhausted: leave bytes buffered, try next pass
                break;
            };

            match self.reader.read_message(&mut view) {
                Ok(true) => {
                    let result = self.handle_message(now_ms, &view);
                    self.pool.release(view);
                    result?;
                    if self.closing {
                        break;
                    }
                }
                Ok(false) => {
                    self.pool.release(view);
                    break;
                }
                Err(FixError::BadChecksum { computed, carried }) => {
                    self.pool.release(view);
                    tracing::warn!(
                        session = %self.core.id,
                        computed,
                        carried,
                        "checksum mismatch, frame dropped"
                    );
                    let expected = self.core.expected_inbound();
                    self.send_session_reject(
                        now_ms,
                        expected,
                        session_reject::REQUIRED_TAG_MISSING,
                        "checksum mismatch",
                    );
                }
                Err(e) => {
                    self.pool.release(view);
                    tracing::warn!(session = %self.core.id, error = %e, "unparseable stream");
                    self.disconnect(now_ms, "framing error");
                    return Err(e.into());
                }
            }
        }
        Ok(bytes.len())
    }

    fn poll(&mut self, now_ms: u64) -> Result<()> {
        while let Some(action) = self.core.poll_timers(now_ms) {
            match action {
                TimerAction::SendHeartbeat => {
                    self.send_admin(now_ms, msg_type::HEARTBEAT, |_| {});
                }
                TimerAction::SendTestRequest(id) => {
                    self.send_admin(now_ms, msg_type::TEST_REQUEST, |enc| {
                        enc.field_str(tags::TEST_REQ_ID, &id);
                    });
                }
                TimerAction::Disconnect => {
                    tracing::warn!(session = %self.core.id, "test request timeout");
                    self.disconnect(now_ms, "TestRequest timeout");
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

/// Unique tags of a message in first-occurrence order
fn original_field_tags(msg: &FixMessage) -> Vec<u32> {
    let mut tags_seen = Vec::new();
    for tag in msg.field_tags() {
        if !tags_seen.contains(&tag) {
            tags_seen.push(tag);
        }
    }
    tags_seen
}
