//! Session core - the protocol-agnostic half of the session runtime
//!
//! Holds what every protocol family needs: the unified state machine,
//! claim-time outbound sequence numbering, expected-inbound tracking, and
//! the heartbeat / test-request timer ladder. The per-protocol runtimes
//! (FIX resend protocol, iLink 3 negotiate/establish) drive these
//! primitives from `mimir-protocols`.
//!
//! State machine:
//!
//! ```text
//! CREATED -> CONNECTING -> CONNECTED -> HANDSHAKING -> ESTABLISHED
//!                                       |                 |
//!                                       v                 v
//!                                  DISCONNECTED    <-> RESENDING
//!                                                       |
//!                                                       v
//!                                                 TERMINATING -> DISCONNECTED
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::Protocol;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Connecting = 1,
    Connected = 2,
    Handshaking = 3,
    Established = 4,
    Resending = 5,
    Terminating = 6,
    Disconnected = 7,
}

impl SessionState {
    pub const fn name(&self) -> &'static str {
        match self {
            SessionState::Created => "CREATED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Handshaking => "HANDSHAKING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Resending => "RESENDING",
            SessionState::Terminating => "TERMINATING",
            SessionState::Disconnected => "DISCONNECTED",
        }
    }

    /// Legal forward edges of the unified machine. Disconnected is
    /// reachable from anywhere.
    fn admits(&self, to: SessionState) -> bool {
        use SessionState::*;
        if to == Disconnected {
            return true;
        }
        matches!(
            (self, to),
            (Created, Connecting)
                | (Connecting, Connected)
                | (Connected, Handshaking)
                | (Connected, Established)
                | (Handshaking, Established)
                | (Established, Resending)
                | (Resending, Established)
                | (Established, Terminating)
                | (Resending, Terminating)
                | (Handshaking, Terminating)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Acceptor,
}

/// What the timer ladder wants the runtime to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerAction {
    SendHeartbeat,
    /// Carries the TestReqID the runtime must echo-match
    SendTestRequest(String),
    /// Peer never answered the test request
    Disconnect,
}

/// Callbacks the dispatcher invokes on session lifecycle edges
pub trait SessionListener: Send + Sync {
    fn on_established(&self, session_id: &str);
    fn on_disconnected(&self, session_id: &str, reason: &str);
    fn on_error(&self, session_id: &str, error: &str);
}

/// Listener that logs and nothing else
pub struct LoggingListener;

impl SessionListener for LoggingListener {
    fn on_established(&self, session_id: &str) {
        tracing::info!(session = session_id, "session established");
    }

    fn on_disconnected(&self, session_id: &str, reason: &str) {
        tracing::info!(session = session_id, reason, "session disconnected");
    }

    fn on_error(&self, session_id: &str, error: &str) {
        tracing::warn!(session = session_id, error, "session error");
    }
}

/// Per-session state shared with the encoders
pub struct SessionCore {
    pub id: String,
    pub protocol: Protocol,
    pub role: SessionRole,

    state: SessionState,
    /// Next outbound sequence number to assign (1-based)
    next_outbound: AtomicU64,
    /// Next inbound sequence number we expect
    expected_inbound: u64,

    last_sent_ms: u64,
    last_received_ms: u64,
    heartbeat_interval_ms: u64,
    /// Outstanding TestRequest: (TestReqID, sent-at millis)
    test_request_pending: Option<(String, u64)>,
    test_request_counter: u64,

    listener: Arc<dyn SessionListener>,
    disconnect_notified: bool,
}

impl SessionCore {
    pub fn new(
        id: impl Into<String>,
        protocol: Protocol,
        role: SessionRole,
        heartbeat_interval_ms: u64,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            id: id.into(),
            protocol,
            role,
            state: SessionState::Created,
            next_outbound: AtomicU64::new(1),
            expected_inbound: 1,
            last_sent_ms: 0,
            last_received_ms: 0,
            heartbeat_interval_ms,
            test_request_pending: None,
            test_request_counter: 0,
            listener,
            disconnect_notified: false,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established | SessionState::Resending)
    }

    /// Drive the state machine. Illegal edges are logged and refused.
    pub fn transition(&mut self, to: SessionState) -> bool {
        if self.state == to {
            return true;
        }
        if !self.state.admits(to) {
            tracing::warn!(
                session = %self.id,
                from = %self.state,
                to = %to,
                "illegal session transition refused"
            );
            return false;
        }
        tracing::debug!(session = %self.id, from = %self.state, to = %to, "session transition");
        self.state = to;
        if to == SessionState::Established && !self.disconnect_notified {
            self.listener.on_established(&self.id);
        }
        true
    }

    /// Idempotent teardown: transition to Disconnected and notify once.
    pub fn disconnect(&mut self, reason: &str) {
        if self.state != SessionState::Disconnected {
            self.state = SessionState::Disconnected;
        }
        if !self.disconnect_notified {
            self.disconnect_notified = true;
            self.listener.on_disconnected(&self.id, reason);
        }
    }

    pub fn report_error(&self, error: &str) {
        self.listener.on_error(&self.id, error);
    }

    // ------------------------------------------------------------------
    // Sequence numbers
    // ------------------------------------------------------------------

    /// Assign the next outbound sequence number. Called inside the ring's
    /// claim critical section so wire order equals sequence order.
    #[inline]
    pub fn claim_seq(&self) -> u64 {
        self.next_outbound.fetch_add(1, Ordering::Relaxed)
    }

    /// Roll back the most recent claim after an encoder abort
    #[inline]
    pub fn unclaim_seq(&self) {
        self.next_outbound.fetch_sub(1, Ordering::Relaxed);
    }

    /// The sequence number the next claim would receive
    #[inline]
    pub fn peek_seq(&self) -> u64 {
        self.next_outbound.load(Ordering::Relaxed)
    }

    /// Highest sequence number already claimed (0 when none)
    #[inline]
    pub fn last_sent_seq(&self) -> u64 {
        self.peek_seq().saturating_sub(1)
    }

    pub fn set_next_outbound(&self, seq: u64) {
        self.next_outbound.store(seq, Ordering::Relaxed);
    }

    #[inline]
    pub fn expected_inbound(&self) -> u64 {
        self.expected_inbound
    }

    /// Advance after a message is fully processed
    #[inline]
    pub fn advance_expected(&mut self) {
        self.expected_inbound += 1;
    }

    pub fn set_expected_inbound(&mut self, seq: u64) {
        self.expected_inbound = seq;
    }

    // ------------------------------------------------------------------
    // Heartbeat / test-request ladder
    // ------------------------------------------------------------------

    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    pub fn set_heartbeat_interval_ms(&mut self, interval: u64) {
        self.heartbeat_interval_ms = interval;
    }

    #[inline]
    pub fn on_sent(&mut self, now_ms: u64) {
        self.last_sent_ms = now_ms;
    }

    #[inline]
    pub fn on_received(&mut self, now_ms: u64) {
        self.last_received_ms = now_ms;
    }

    /// The TestReqID we are waiting on, if any
    pub fn pending_test_request(&self) -> Option<&str> {
        self.test_request_pending.as_ref().map(|(id, _)| id.as_str())
    }

    /// Peer answered (Heartbeat carrying our TestReqID, or any traffic
    /// under the lenient policy)
    pub fn clear_test_request(&mut self) {
        self.test_request_pending = None;
    }

    /// One timer decision per call; the runtime loops until `None`.
    ///
    /// Ladder: send Heartbeat when we have been quiet past the interval;
    /// send TestRequest when the peer has been quiet past 1.5x; give up
    /// and disconnect when a TestRequest has gone unanswered for a
    /// further interval.
    pub fn poll_timers(&mut self, now_ms: u64) -> Option<TimerAction> {
        if !self.is_established() || self.heartbeat_interval_ms == 0 {
            return None;
        }
        let hb = self.heartbeat_interval_ms;

        if let Some((_, sent_at)) = &self.test_request_pending {
            if now_ms.saturating_sub(*sent_at) > hb {
                return Some(TimerAction::Disconnect);
            }
        } else if now_ms.saturating_sub(self.last_received_ms) > hb + hb / 2 {
            self.test_request_counter += 1;
            let id = format!("TEST{}", self.test_request_counter);
            self.test_request_pending = Some((id.clone(), now_ms));
            return Some(TimerAction::SendTestRequest(id));
        }

        if now_ms.saturating_sub(self.last_sent_ms) > hb {
            // Caller sends the heartbeat and on_sent() resets the clock
            return Some(TimerAction::SendHeartbeat);
        }

        None
    }
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .field("next_outbound", &self.peek_seq())
            .field("expected_inbound", &self.expected_inbound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingListener {
        established: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                established: AtomicUsize::new(0),
                disconnected: AtomicUsize::new(0),
            })
        }
    }

    impl SessionListener for CountingListener {
        fn on_established(&self, _: &str) {
            self.established.fetch_add(1, Ordering::Relaxed);
        }
        fn on_disconnected(&self, _: &str, _: &str) {
            self.disconnected.fetch_add(1, Ordering::Relaxed);
        }
        fn on_error(&self, _: &str, _: &str) {}
    }

    fn session(hb_ms: u64) -> (SessionCore, Arc<CountingListener>) {
        let listener = CountingListener::new();
        let core = SessionCore::new(
            "test-1",
            Protocol::Fix42,
            SessionRole::Acceptor,
            hb_ms,
            listener.clone(),
        );
        (core, listener)
    }

    #[test]
    fn test_happy_path_transitions() {
        let (mut s, listener) = session(30_000);
        assert!(s.transition(SessionState::Connecting));
        assert!(s.transition(SessionState::Connected));
        assert!(s.transition(SessionState::Handshaking));
        assert!(s.transition(SessionState::Established));
        assert_eq!(listener.established.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_illegal_transition_refused() {
        let (mut s, _) = session(30_000);
        assert!(!s.transition(SessionState::Established)); // Created -/-> Established
        assert_eq!(s.state(), SessionState::Created);

        s.transition(SessionState::Connecting);
        assert!(!s.transition(SessionState::Resending));
        assert_eq!(s.state(), SessionState::Connecting);
    }

    #[test]
    fn test_resending_roundtrip() {
        let (mut s, _) = session(30_000);
        s.transition(SessionState::Connecting);
        s.transition(SessionState::Connected);
        s.transition(SessionState::Established);
        assert!(s.transition(SessionState::Resending));
        assert!(s.is_established());
        assert!(s.transition(SessionState::Established));
    }

    #[test]
    fn test_disconnect_idempotent() {
        let (mut s, listener) = session(30_000);
        s.transition(SessionState::Connecting);
        s.disconnect("io error");
        s.disconnect("io error again");
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(listener.disconnected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_claim_seq_monotonic_with_unclaim() {
        let (s, _) = session(30_000);
        assert_eq!(s.claim_seq(), 1);
        assert_eq!(s.claim_seq(), 2);
        s.unclaim_seq(); // encoder aborted message 2
        assert_eq!(s.claim_seq(), 2);
        assert_eq!(s.last_sent_seq(), 2);
    }

    #[test]
    fn test_expected_inbound_tracking() {
        let (mut s, _) = session(30_000);
        assert_eq!(s.expected_inbound(), 1);
        s.advance_expected();
        s.advance_expected();
        assert_eq!(s.expected_inbound(), 3);
        s.set_expected_inbound(10);
        assert_eq!(s.expected_inbound(), 10);
    }

    #[test]
    fn test_timer_ladder() {
        let (mut s, _) = session(1_000);
        s.transition(SessionState::Connecting);
        s.transition(SessionState::Connected);
        s.transition(SessionState::Established);

        s.on_sent(0);
        s.on_received(0);

        // Inside the interval: quiet
        assert_eq!(s.poll_timers(900), None);

        // We are quiet past the interval: heartbeat
        assert_eq!(s.poll_timers(1_100), Some(TimerAction::SendHeartbeat));
        s.on_sent(1_100);

        // Peer quiet past 1.5x: test request
        match s.poll_timers(1_600) {
            Some(TimerAction::SendTestRequest(id)) => assert_eq!(id, "TEST1"),
            other => panic!("expected test request, got {:?}", other),
        }
        s.on_sent(1_600);

        // Still unanswered an interval later: disconnect
        assert_eq!(s.poll_timers(2_700), Some(TimerAction::Disconnect));
    }

    #[test]
    fn test_test_request_cleared_by_reply() {
        let (mut s, _) = session(1_000);
        s.transition(SessionState::Connecting);
        s.transition(SessionState::Connected);
        s.transition(SessionState::Established);
        s.on_sent(0);
        s.on_received(0);

        assert!(matches!(
            s.poll_timers(1_600),
            Some(TimerAction::SendTestRequest(_))
        ));
        assert_eq!(s.pending_test_request(), Some("TEST1"));

        s.on_received(1_700);
        s.clear_test_request();
        assert_eq!(s.pending_test_request(), None);
        assert_eq!(s.poll_timers(1_800), None);
    }

    #[test]
    fn test_no_timers_before_established() {
        let (mut s, _) = session(1_000);
        assert_eq!(s.poll_timers(1_000_000), None);
    }

    #[test]
    fn test_zero_interval_disables_timers() {
        let (mut s, _) = session(0);
        s.transition(SessionState::Connecting);
        s.transition(SessionState::Connected);
        s.transition(SessionState::Established);
        assert_eq!(s.poll_timers(u64::MAX), None);
    }
}
