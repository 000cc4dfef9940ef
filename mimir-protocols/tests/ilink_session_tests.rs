//! iLink 3 handshake and order-flow tests

use std::sync::Arc;

use mimir_core::config::{IlinkListenerConfig, SimulatorConfig};
use mimir_core::fill::FillRule;
use mimir_core::journal::Journal;
use mimir_core::net::SessionDriver;
use mimir_core::session::{LoggingListener, SessionState};

use mimir_protocols::engine::EngineHandles;
use mimir_protocols::ilink::{decode_frame, messages as msg, template, IlinkEngine};

fn handles(rules: Vec<FillRule>) -> Arc<EngineHandles> {
    let dir = tempfile::tempdir().unwrap().into_path();
    let journal = Journal::open(dir.join("journal")).unwrap();
    let config = SimulatorConfig {
        fill_rules: rules,
        rng_seed: 3,
        ..SimulatorConfig::default()
    };
    EngineHandles::new(config, journal, Arc::new(LoggingListener))
}

fn engine_with(handles: &Arc<EngineHandles>, config: IlinkListenerConfig) -> IlinkEngine {
    IlinkEngine::new(Arc::clone(handles), config, "test")
}

/// Drain outbound and split into (template id, block) frames
fn frames(engine: &mut IlinkEngine) -> Vec<(u16, Vec<u8>)> {
    let mut bytes = Vec::new();
    engine.drain_to(&mut bytes).unwrap();

    let mut out = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let (len, frame) = decode_frame(&bytes[at..])
            .expect("engine emitted malformed frame")
            .expect("engine emitted truncated frame");
        out.push((frame.template_id, frame.block.to_vec()));
        at += len;
    }
    out
}

fn negotiate_establish(engine: &mut IlinkEngine, uuid: u64) {
    let mut wire = [0u8; 128];
    let n = msg::encode_negotiate(&mut wire, uuid, 100, "S01", "F1", "KEY-1");
    engine.on_bytes(&wire[..n], 1_000).unwrap();

    let n = msg::encode_establish(&mut wire, uuid, 200, 1, 10_000, "S01", "F1");
    engine.on_bytes(&wire[..n], 2_000).unwrap();
}

#[test]
fn scenario_negotiate_establish_handshake() {
    let handles = handles(vec![]);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());

    assert_eq!(engine.session().state(), SessionState::Connected);

    // Negotiate
    let mut wire = [0u8; 128];
    let n = msg::encode_negotiate(&mut wire, 0xABCD, 100, "S01", "F1", "KEY-1");
    engine.on_bytes(&wire[..n], 1_000).unwrap();

    assert_eq!(engine.session().state(), SessionState::Handshaking);
    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::NEGOTIATION_RESPONSE);
    let resp = msg::NegotiationResponse(&out[0].1);
    assert_eq!(resp.uuid(), 0xABCD);
    assert_eq!(resp.previous_uuid(), 0);
    assert_eq!(resp.previous_seq_no(), 0);

    // Establish with nextSeqNo = previousSeqNo + 1 and a keepalive
    let n = msg::encode_establish(&mut wire, 0xABCD, 200, 1, 10_000, "S01", "F1");
    engine.on_bytes(&wire[..n], 2_000).unwrap();

    assert_eq!(engine.session().state(), SessionState::Established);
    assert_eq!(engine.session().heartbeat_interval_ms(), 10_000);
    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::ESTABLISHMENT_ACK);
    let ack = msg::EstablishmentAck(&out[0].1);
    assert_eq!(ack.uuid(), 0xABCD);
    assert_eq!(ack.keep_alive_interval_ms(), 10_000);
}

#[test]
fn unknown_firm_is_rejected() {
    let handles = handles(vec![]);
    let config = IlinkListenerConfig {
        firms: vec!["GOOD".to_string()],
        ..IlinkListenerConfig::default()
    };
    let mut engine = engine_with(&handles, config);

    let mut wire = [0u8; 128];
    let n = msg::encode_negotiate(&mut wire, 1, 100, "S01", "EVIL", "KEY-1");
    engine.on_bytes(&wire[..n], 1_000).unwrap();

    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::NEGOTIATION_REJECT);
    assert!(engine.is_closed());
}

#[test]
fn unknown_access_key_is_rejected() {
    let handles = handles(vec![]);
    let config = IlinkListenerConfig {
        access_key_ids: vec!["GOODKEY".to_string()],
        ..IlinkListenerConfig::default()
    };
    let mut engine = engine_with(&handles, config);

    let mut wire = [0u8; 128];
    let n = msg::encode_negotiate(&mut wire, 1, 100, "S01", "F1", "BADKEY");
    engine.on_bytes(&wire[..n], 1_000).unwrap();

    let out = frames(&mut engine);
    assert_eq!(out[0].0, template::NEGOTIATION_REJECT);
    assert!(engine.is_closed());
}

#[test]
fn establish_before_negotiate_is_rejected() {
    let handles = handles(vec![]);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());

    let mut wire = [0u8; 128];
    let n = msg::encode_establish(&mut wire, 9, 100, 1, 10_000, "S01", "F1");
    engine.on_bytes(&wire[..n], 1_000).unwrap();

    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::ESTABLISHMENT_REJECT);
    assert!(engine.is_closed());
}

#[test]
fn new_order_full_fill_flow() {
    let handles = handles(vec![]);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());
    negotiate_establish(&mut engine, 5);
    frames(&mut engine);

    let mut wire = [0u8; 256];
    // PRICE9: 4500.25
    let n = msg::encode_new_order(
        &mut wire,
        4_500_250_000_000,
        3,
        1,
        2,
        "ORD-1",
        "ESZ5",
        555,
    );
    engine.on_bytes(&wire[..n], 3_000).unwrap();

    let out = frames(&mut engine);
    assert_eq!(out.len(), 2);

    assert_eq!(out[0].0, template::EXEC_REPORT_NEW);
    let ack = msg::ExecReportNew(&out[0].1);
    assert_eq!(ack.order_qty(), 3);
    assert_eq!(ack.leaves_qty(), 3);
    assert_eq!(ack.ord_status(), 0);
    assert_eq!(ack.cl_ord_id(), "ORD-1");

    assert_eq!(out[1].0, template::EXEC_REPORT_TRADE);
    let trade = msg::ExecReportTrade(&out[1].1);
    assert_eq!(trade.last_qty(), 3);
    assert_eq!(trade.last_px(), 4_500_250_000_000);
    assert_eq!(trade.cum_qty(), 3);
    assert_eq!(trade.leaves_qty(), 0);
    assert_eq!(trade.ord_status(), 2);
    assert_eq!(trade.match_number(), 1);
}

#[test]
fn cancel_and_replace_flow() {
    let no_fill = vec![FillRule {
        symbol_pattern: "*".to_string(),
        priority: 0,
        fill_probability: 0.0,
        partial_fill_probability: 0.0,
    }];
    let handles = handles(no_fill);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());
    negotiate_establish(&mut engine, 6);
    frames(&mut engine);

    let mut wire = [0u8; 256];
    let n = msg::encode_new_order(&mut wire, 1_000_000_000, 10, 2, 2, "C-1", "ESZ5", 1);
    engine.on_bytes(&wire[..n], 3_000).unwrap();
    frames(&mut engine);

    // Replace C-1 with R-1 at a new quantity
    let n = msg::encode_cancel_replace(
        &mut wire,
        2_000_000_000,
        15,
        2,
        2,
        "R-1",
        "C-1",
        "ESZ5",
        2,
    );
    engine.on_bytes(&wire[..n], 4_000).unwrap();
    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::EXEC_REPORT_MODIFY);

    // Cancel the replacement
    let n = msg::encode_cancel_request(&mut wire, "X-1", "R-1", "ESZ5", 3);
    engine.on_bytes(&wire[..n], 5_000).unwrap();
    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::EXEC_REPORT_CANCEL);

    // Cancel the original: already replaced, silent
    let n = msg::encode_cancel_request(&mut wire, "X-2", "C-1", "ESZ5", 4);
    engine.on_bytes(&wire[..n], 6_000).unwrap();
    assert!(frames(&mut engine).is_empty());
}

#[test]
fn business_message_before_establish_terminates() {
    let handles = handles(vec![]);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());

    let mut wire = [0u8; 256];
    let n = msg::encode_new_order(&mut wire, 1, 1, 1, 2, "EARLY", "ESZ5", 1);
    engine.on_bytes(&wire[..n], 1_000).unwrap();

    let out = frames(&mut engine);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, template::TERMINATE);
    assert!(engine.is_closed());
}

#[test]
fn keepalive_ladder_terminates_when_lapsed() {
    let handles = handles(vec![]);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());
    negotiate_establish(&mut engine, 8);
    frames(&mut engine);

    // Quiet past the 10s keepalive: a Sequence goes out
    engine.poll(13_000).unwrap();
    let out = frames(&mut engine);
    assert!(out.iter().any(|(t, _)| *t == template::SEQUENCE));

    // Peer silent past 1.5x: lapsed Sequence
    engine.poll(18_000).unwrap();
    let out = frames(&mut engine);
    let lapsed = out
        .iter()
        .find(|(t, _)| *t == template::SEQUENCE)
        .map(|(_, block)| msg::Sequence(block).keep_alive_lapsed());
    assert_eq!(lapsed, Some(true));

    // Still nothing after another interval: Terminate
    engine.poll(30_000).unwrap();
    let out = frames(&mut engine);
    assert!(out.iter().any(|(t, _)| *t == template::TERMINATE));
    assert!(engine.is_closed());
}

#[test]
fn peer_sequence_clears_keepalive_probe() {
    let handles = handles(vec![]);
    let mut engine = engine_with(&handles, IlinkListenerConfig::default());
    negotiate_establish(&mut engine, 9);
    frames(&mut engine);

    engine.poll(18_000).unwrap();
    frames(&mut engine);
    assert!(engine.session().pending_test_request().is_some());

    let mut wire = [0u8; 64];
    let n = msg::encode_sequence(&mut wire, 9, 2, false);
    engine.on_bytes(&wire[..n], 19_000).unwrap();
    assert!(engine.session().pending_test_request().is_none());

    engine.poll(20_000).unwrap();
    assert!(!engine.is_closed());
}
