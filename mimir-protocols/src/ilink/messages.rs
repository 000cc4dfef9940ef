//! iLink 3 fixed-offset block layouts
//!
//! Decoders are flyweights over the framed block; encoders write header
//! plus block into a claimed region and return the total frame size.
//! All integers little-endian; alpha fields space-padded.

use crate::wire::{alpha, i64_le, put_alpha, put_i64_le, put_u16_le, put_u32_le, put_u64_le, u32_le, u64_le};

use super::{encode_frame_header, frame_size, template};

pub const CL_ORD_ID_LEN: usize = 20;
pub const SYMBOL_LEN: usize = 20;
pub const SESSION_LEN: usize = 3;
pub const FIRM_LEN: usize = 5;
pub const ACCESS_KEY_LEN: usize = 20;

pub const NEGOTIATE_BLOCK: usize = 44;
pub const NEGOTIATION_RESPONSE_BLOCK: usize = 28;
pub const NEGOTIATION_REJECT_BLOCK: usize = 18;
pub const ESTABLISH_BLOCK: usize = 32;
pub const ESTABLISHMENT_ACK_BLOCK: usize = 28;
pub const ESTABLISHMENT_REJECT_BLOCK: usize = 18;
pub const SEQUENCE_BLOCK: usize = 13;
pub const TERMINATE_BLOCK: usize = 18;
pub const NEW_ORDER_BLOCK: usize = 118;
pub const CANCEL_REPLACE_BLOCK: usize = 130;
pub const CANCEL_BLOCK: usize = 68;
pub const EXEC_NEW_BLOCK: usize = 70;
pub const EXEC_TRADE_BLOCK: usize = 78;
pub const EXEC_CANCEL_BLOCK: usize = 53;
pub const EXEC_MODIFY_BLOCK: usize = 85;
pub const BUSINESS_REJECT_BLOCK: usize = 44;

// ----------------------------------------------------------------------
// Session-layer messages
// ----------------------------------------------------------------------

/// Negotiate (500): uuid@0, req-ts@8, session@16/3, firm@19/5, key@24/20
#[derive(Debug, Clone, Copy)]
pub struct Negotiate<'a>(pub &'a [u8]);

impl<'a> Negotiate<'a> {
    pub fn uuid(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn request_timestamp(&self) -> u64 {
        u64_le(self.0, 8)
    }
    pub fn session(&self) -> &'a str {
        alpha(self.0, 16, SESSION_LEN)
    }
    pub fn firm(&self) -> &'a str {
        alpha(self.0, 19, FIRM_LEN)
    }
    pub fn access_key_id(&self) -> &'a str {
        alpha(self.0, 24, ACCESS_KEY_LEN)
    }
}

pub fn encode_negotiate(
    out: &mut [u8],
    uuid: u64,
    request_timestamp: u64,
    session: &str,
    firm: &str,
    access_key_id: &str,
) -> usize {
    let at = encode_frame_header(out, template::NEGOTIATE, NEGOTIATE_BLOCK);
    let block = &mut out[at..at + NEGOTIATE_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_alpha(block, 16, SESSION_LEN, session);
    put_alpha(block, 19, FIRM_LEN, firm);
    put_alpha(block, 24, ACCESS_KEY_LEN, access_key_id);
    frame_size(NEGOTIATE_BLOCK)
}

/// NegotiationResponse (501): uuid@0, req-ts@8, prev-uuid@16, prev-seq@24
#[derive(Debug, Clone, Copy)]
pub struct NegotiationResponse<'a>(pub &'a [u8]);

impl NegotiationResponse<'_> {
    pub fn uuid(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn previous_uuid(&self) -> u64 {
        u64_le(self.0, 16)
    }
    pub fn previous_seq_no(&self) -> u32 {
        u32_le(self.0, 24)
    }
}

pub fn encode_negotiation_response(
    out: &mut [u8],
    uuid: u64,
    request_timestamp: u64,
    previous_uuid: u64,
    previous_seq_no: u32,
) -> usize {
    let at = encode_frame_header(out, template::NEGOTIATION_RESPONSE, NEGOTIATION_RESPONSE_BLOCK);
    let block = &mut out[at..at + NEGOTIATION_RESPONSE_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_u64_le(block, 16, previous_uuid);
    put_u32_le(block, 24, previous_seq_no);
    frame_size(NEGOTIATION_RESPONSE_BLOCK)
}

pub fn encode_negotiation_reject(
    out: &mut [u8],
    uuid: u64,
    request_timestamp: u64,
    code: u16,
) -> usize {
    let at = encode_frame_header(out, template::NEGOTIATION_REJECT, NEGOTIATION_REJECT_BLOCK);
    let block = &mut out[at..at + NEGOTIATION_REJECT_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_u16_le(block, 16, code);
    frame_size(NEGOTIATION_REJECT_BLOCK)
}

/// Establish (503): uuid@0, req-ts@8, next-seq@16, keepalive-ms@20,
/// session@24/3, firm@27/5
#[derive(Debug, Clone, Copy)]
pub struct Establish<'a>(pub &'a [u8]);

impl<'a> Establish<'a> {
    pub fn uuid(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn request_timestamp(&self) -> u64 {
        u64_le(self.0, 8)
    }
    pub fn next_seq_no(&self) -> u32 {
        u32_le(self.0, 16)
    }
    pub fn keep_alive_interval_ms(&self) -> u32 {
        u32_le(self.0, 20)
    }
    pub fn session(&self) -> &'a str {
        alpha(self.0, 24, SESSION_LEN)
    }
    pub fn firm(&self) -> &'a str {
        alpha(self.0, 27, FIRM_LEN)
    }
}

pub fn encode_establish(
    out: &mut [u8],
    uuid: u64,
    request_timestamp: u64,
    next_seq_no: u32,
    keep_alive_ms: u32,
    session: &str,
    firm: &str,
) -> usize {
    let at = encode_frame_header(out, template::ESTABLISH, ESTABLISH_BLOCK);
    let block = &mut out[at..at + ESTABLISH_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_u32_le(block, 16, next_seq_no);
    put_u32_le(block, 20, keep_alive_ms);
    put_alpha(block, 24, SESSION_LEN, session);
    put_alpha(block, 27, FIRM_LEN, firm);
    frame_size(ESTABLISH_BLOCK)
}

/// EstablishmentAck (504): uuid@0, req-ts@8, next-seq@16, prev-seq@20,
/// keepalive@24
#[derive(Debug, Clone, Copy)]
pub struct EstablishmentAck<'a>(pub &'a [u8]);

impl EstablishmentAck<'_> {
    pub fn uuid(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn next_seq_no(&self) -> u32 {
        u32_le(self.0, 16)
    }
    pub fn keep_alive_interval_ms(&self) -> u32 {
        u32_le(self.0, 24)
    }
}

pub fn encode_establishment_ack(
    out: &mut [u8],
    uuid: u64,
    request_timestamp: u64,
    next_seq_no: u32,
    previous_seq_no: u32,
    keep_alive_ms: u32,
) -> usize {
    let at = encode_frame_header(out, template::ESTABLISHMENT_ACK, ESTABLISHMENT_ACK_BLOCK);
    let block = &mut out[at..at + ESTABLISHMENT_ACK_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_u32_le(block, 16, next_seq_no);
    put_u32_le(block, 20, previous_seq_no);
    put_u32_le(block, 24, keep_alive_ms);
    frame_size(ESTABLISHMENT_ACK_BLOCK)
}

pub fn encode_establishment_reject(
    out: &mut [u8],
    uuid: u64,
    request_timestamp: u64,
    code: u16,
) -> usize {
    let at = encode_frame_header(out, template::ESTABLISHMENT_REJECT, ESTABLISHMENT_REJECT_BLOCK);
    let block = &mut out[at..at + ESTABLISHMENT_REJECT_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_u16_le(block, 16, code);
    frame_size(ESTABLISHMENT_REJECT_BLOCK)
}

/// Sequence (506): uuid@0, next-seq@8, keepalive-lapsed@12
#[derive(Debug, Clone, Copy)]
pub struct Sequence<'a>(pub &'a [u8]);

impl Sequence<'_> {
    pub fn uuid(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn next_seq_no(&self) -> u32 {
        u32_le(self.0, 8)
    }
    pub fn keep_alive_lapsed(&self) -> bool {
        self.0[12] == 1
    }
}

pub fn encode_sequence(out: &mut [u8], uuid: u64, next_seq_no: u32, lapsed: bool) -> usize {
    let at = encode_frame_header(out, template::SEQUENCE, SEQUENCE_BLOCK);
    let block = &mut out[at..at + SEQUENCE_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u32_le(block, 8, next_seq_no);
    block[12] = lapsed as u8;
    frame_size(SEQUENCE_BLOCK)
}

/// Terminate (507): uuid@0, req-ts@8, error-code@16
#[derive(Debug, Clone, Copy)]
pub struct Terminate<'a>(pub &'a [u8]);

impl Terminate<'_> {
    pub fn uuid(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn error_code(&self) -> u16 {
        crate::wire::u16_le(self.0, 16)
    }
}

pub fn encode_terminate(out: &mut [u8], uuid: u64, request_timestamp: u64, code: u16) -> usize {
    let at = encode_frame_header(out, template::TERMINATE, TERMINATE_BLOCK);
    let block = &mut out[at..at + TERMINATE_BLOCK];
    put_u64_le(block, 0, uuid);
    put_u64_le(block, 8, request_timestamp);
    put_u16_le(block, 16, code);
    frame_size(TERMINATE_BLOCK)
}

// ----------------------------------------------------------------------
// Business messages
// ----------------------------------------------------------------------

/// NewOrderSingle (514), 118-byte block: price@0 (PRICE9), qty@8,
/// side@12 (1=buy 2=sell), ord-type@13 (1=market 2=limit), tif@14,
/// manual@15, cl-ord-id@16/20, symbol@36/20, party@56/20,
/// sending-time@76; tail reserved
#[derive(Debug, Clone, Copy)]
pub struct NewOrderSingle<'a>(pub &'a [u8]);

impl<'a> NewOrderSingle<'a> {
    pub fn price(&self) -> i64 {
        i64_le(self.0, 0)
    }
    pub fn order_qty(&self) -> u32 {
        u32_le(self.0, 8)
    }
    pub fn side(&self) -> u8 {
        self.0[12]
    }
    pub fn ord_type(&self) -> u8 {
        self.0[13]
    }
    pub fn cl_ord_id(&self) -> &'a str {
        alpha(self.0, 16, CL_ORD_ID_LEN)
    }
    pub fn symbol(&self) -> &'a str {
        alpha(self.0, 36, SYMBOL_LEN)
    }
    pub fn sending_time(&self) -> u64 {
        u64_le(self.0, 76)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_new_order(
    out: &mut [u8],
    price: i64,
    qty: u32,
    side: u8,
    ord_type: u8,
    cl_ord_id: &str,
    symbol: &str,
    sending_time: u64,
) -> usize {
    let at = encode_frame_header(out, template::NEW_ORDER_SINGLE, NEW_ORDER_BLOCK);
    let block = &mut out[at..at + NEW_ORDER_BLOCK];
    block.fill(0);
    put_i64_le(block, 0, price);
    put_u32_le(block, 8, qty);
    block[12] = side;
    block[13] = ord_type;
    block[14] = 0; // day
    block[15] = 1; // manual
    put_alpha(block, 16, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 36, SYMBOL_LEN, symbol);
    put_alpha(block, 56, 20, "");
    put_u64_le(block, 76, sending_time);
    frame_size(NEW_ORDER_BLOCK)
}

/// OrderCancelReplaceRequest (515), 130-byte block: price@0, qty@8,
/// side@12, ord-type@13, tif@14, manual@15, cl-ord-id@16/20,
/// orig-cl-ord-id@36/20, symbol@56/20, party@76/20, sending-time@96
#[derive(Debug, Clone, Copy)]
pub struct OrderCancelReplace<'a>(pub &'a [u8]);

impl<'a> OrderCancelReplace<'a> {
    pub fn price(&self) -> i64 {
        i64_le(self.0, 0)
    }
    pub fn order_qty(&self) -> u32 {
        u32_le(self.0, 8)
    }
    pub fn side(&self) -> u8 {
        self.0[12]
    }
    pub fn ord_type(&self) -> u8 {
        self.0[13]
    }
    pub fn cl_ord_id(&self) -> &'a str {
        alpha(self.0, 16, CL_ORD_ID_LEN)
    }
    pub fn orig_cl_ord_id(&self) -> &'a str {
        alpha(self.0, 36, CL_ORD_ID_LEN)
    }
    pub fn symbol(&self) -> &'a str {
        alpha(self.0, 56, SYMBOL_LEN)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_cancel_replace(
    out: &mut [u8],
    price: i64,
    qty: u32,
    side: u8,
    ord_type: u8,
    cl_ord_id: &str,
    orig_cl_ord_id: &str,
    symbol: &str,
    sending_time: u64,
) -> usize {
    let at = encode_frame_header(out, template::ORDER_CANCEL_REPLACE, CANCEL_REPLACE_BLOCK);
    let block = &mut out[at..at + CANCEL_REPLACE_BLOCK];
    block.fill(0);
    put_i64_le(block, 0, price);
    put_u32_le(block, 8, qty);
    block[12] = side;
    block[13] = ord_type;
    block[15] = 1;
    put_alpha(block, 16, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 36, CL_ORD_ID_LEN, orig_cl_ord_id);
    put_alpha(block, 56, SYMBOL_LEN, symbol);
    put_alpha(block, 76, 20, "");
    put_u64_le(block, 96, sending_time);
    frame_size(CANCEL_REPLACE_BLOCK)
}

/// OrderCancelRequest (516): cl-ord-id@0/20, orig-cl-ord-id@20/20,
/// symbol@40/20, sending-time@60
#[derive(Debug, Clone, Copy)]
pub struct OrderCancelRequest<'a>(pub &'a [u8]);

impl<'a> OrderCancelRequest<'a> {
    pub fn cl_ord_id(&self) -> &'a str {
        alpha(self.0, 0, CL_ORD_ID_LEN)
    }
    pub fn orig_cl_ord_id(&self) -> &'a str {
        alpha(self.0, 20, CL_ORD_ID_LEN)
    }
    pub fn symbol(&self) -> &'a str {
        alpha(self.0, 40, SYMBOL_LEN)
    }
}

pub fn encode_cancel_request(
    out: &mut [u8],
    cl_ord_id: &str,
    orig_cl_ord_id: &str,
    symbol: &str,
    sending_time: u64,
) -> usize {
    let at = encode_frame_header(out, template::ORDER_CANCEL_REQUEST, CANCEL_BLOCK);
    let block = &mut out[at..at + CANCEL_BLOCK];
    block.fill(0);
    put_alpha(block, 0, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 20, CL_ORD_ID_LEN, orig_cl_ord_id);
    put_alpha(block, 40, SYMBOL_LEN, symbol);
    put_u64_le(block, 60, sending_time);
    frame_size(CANCEL_BLOCK)
}

/// ExecutionReportNew (532): order-id@0, price@8, qty@16, cum@20,
/// leaves@24, side@28, ord-status@29, cl-ord-id@30/20, symbol@50/20
#[derive(Debug, Clone, Copy)]
pub struct ExecReportNew<'a>(pub &'a [u8]);

impl<'a> ExecReportNew<'a> {
    pub fn order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn price(&self) -> i64 {
        i64_le(self.0, 8)
    }
    pub fn order_qty(&self) -> u32 {
        u32_le(self.0, 16)
    }
    pub fn leaves_qty(&self) -> u32 {
        u32_le(self.0, 24)
    }
    pub fn ord_status(&self) -> u8 {
        self.0[29]
    }
    pub fn cl_ord_id(&self) -> &'a str {
        alpha(self.0, 30, CL_ORD_ID_LEN)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_exec_new(
    out: &mut [u8],
    order_id: u64,
    price: i64,
    qty: u32,
    cum: u32,
    leaves: u32,
    side: u8,
    ord_status: u8,
    cl_ord_id: &str,
    symbol: &str,
) -> usize {
    let at = encode_frame_header(out, template::EXEC_REPORT_NEW, EXEC_NEW_BLOCK);
    let block = &mut out[at..at + EXEC_NEW_BLOCK];
    block.fill(0);
    put_u64_le(block, 0, order_id);
    put_i64_le(block, 8, price);
    put_u32_le(block, 16, qty);
    put_u32_le(block, 20, cum);
    put_u32_le(block, 24, leaves);
    block[28] = side;
    block[29] = ord_status;
    put_alpha(block, 30, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 50, SYMBOL_LEN, symbol);
    frame_size(EXEC_NEW_BLOCK)
}

/// ExecutionReportTrade (533): order-id@0, last-px@8, last-qty@16,
/// cum@20, leaves@24, side@28, ord-status@29, cl-ord-id@30/20,
/// symbol@50/20, match@70
#[derive(Debug, Clone, Copy)]
pub struct ExecReportTrade<'a>(pub &'a [u8]);

impl<'a> ExecReportTrade<'a> {
    pub fn order_id(&self) -> u64 {
        u64_le(self.0, 0)
    }
    pub fn last_px(&self) -> i64 {
        i64_le(self.0, 8)
    }
    pub fn last_qty(&self) -> u32 {
        u32_le(self.0, 16)
    }
    pub fn cum_qty(&self) -> u32 {
        u32_le(self.0, 20)
    }
    pub fn leaves_qty(&self) -> u32 {
        u32_le(self.0, 24)
    }
    pub fn ord_status(&self) -> u8 {
        self.0[29]
    }
    pub fn cl_ord_id(&self) -> &'a str {
        alpha(self.0, 30, CL_ORD_ID_LEN)
    }
    pub fn match_number(&self) -> u64 {
        u64_le(self.0, 70)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn encode_exec_trade(
    out: &mut [u8],
    order_id: u64,
    last_px: i64,
    last_qty: u32,
    cum: u32,
    leaves: u32,
    side: u8,
    ord_status: u8,
    cl_ord_id: &str,
    symbol: &str,
    match_number: u64,
) -> usize {
    let at = encode_frame_header(out, template::EXEC_REPORT_TRADE, EXEC_TRADE_BLOCK);
    let block = &mut out[at..at + EXEC_TRADE_BLOCK];
    block.fill(0);
    put_u64_le(block, 0, order_id);
    put_i64_le(block, 8, last_px);
    put_u32_le(block, 16, last_qty);
    put_u32_le(block, 20, cum);
    put_u32_le(block, 24, leaves);
    block[28] = side;
    block[29] = ord_status;
    put_alpha(block, 30, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 50, SYMBOL_LEN, symbol);
    put_u64_le(block, 70, match_number);
    frame_size(EXEC_TRADE_BLOCK)
}

/// ExecutionReportCancel (534): order-id@0, canceled-qty@8,
/// ord-status@12, cl-ord-id@13/20, orig-cl-ord-id@33/20
pub fn encode_exec_cancel(
    out: &mut [u8],
    order_id: u64,
    canceled_qty: u32,
    cl_ord_id: &str,
    orig_cl_ord_id: &str,
) -> usize {
    let at = encode_frame_header(out, template::EXEC_REPORT_CANCEL, EXEC_CANCEL_BLOCK);
    let block = &mut out[at..at + EXEC_CANCEL_BLOCK];
    block.fill(0);
    put_u64_le(block, 0, order_id);
    put_u32_le(block, 8, canceled_qty);
    block[12] = 4; // canceled
    put_alpha(block, 13, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 33, CL_ORD_ID_LEN, orig_cl_ord_id);
    frame_size(EXEC_CANCEL_BLOCK)
}

/// ExecutionReportModify (535): order-id@0, price@8, qty@16, leaves@20,
/// ord-status@24, cl-ord-id@25/20, orig-cl-ord-id@45/20, symbol@65/20
#[allow(clippy::too_many_arguments)]
pub fn encode_exec_modify(
    out: &mut [u8],
    order_id: u64,
    price: i64,
    qty: u32,
    leaves: u32,
    cl_ord_id: &str,
    orig_cl_ord_id: &str,
    symbol: &str,
) -> usize {
    let at = encode_frame_header(out, template::EXEC_REPORT_MODIFY, EXEC_MODIFY_BLOCK);
    let block = &mut out[at..at + EXEC_MODIFY_BLOCK];
    block.fill(0);
    put_u64_le(block, 0, order_id);
    put_i64_le(block, 8, price);
    put_u32_le(block, 16, qty);
    put_u32_le(block, 20, leaves);
    block[24] = 0; // new
    put_alpha(block, 25, CL_ORD_ID_LEN, cl_ord_id);
    put_alpha(block, 45, CL_ORD_ID_LEN, orig_cl_ord_id);
    put_alpha(block, 65, SYMBOL_LEN, symbol);
    frame_size(EXEC_MODIFY_BLOCK)
}

/// BusinessReject (537): ref-template@0, reason@2, text@4/40
pub fn encode_business_reject(out: &mut [u8], ref_template: u16, reason: u16, text: &str) -> usize {
    let at = encode_frame_header(out, template::BUSINESS_REJECT, BUSINESS_REJECT_BLOCK);
    let block = &mut out[at..at + BUSINESS_REJECT_BLOCK];
    block.fill(0);
    put_u16_le(block, 0, ref_template);
    put_u16_le(block, 2, reason);
    put_alpha(block, 4, 40, text);
    frame_size(BUSINESS_REJECT_BLOCK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ilink::decode_frame;

    #[test]
    fn test_negotiate_roundtrip() {
        let mut wire = [0u8; 128];
        let n = encode_negotiate(&mut wire, 0xDEAD, 123, "S01", "F1", "KEY-1");

        let (total, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        assert_eq!(total, n);
        assert_eq!(frame.template_id, template::NEGOTIATE);
        assert_eq!(frame.block_length as usize, NEGOTIATE_BLOCK);

        let msg = Negotiate(frame.block);
        assert_eq!(msg.uuid(), 0xDEAD);
        assert_eq!(msg.request_timestamp(), 123);
        assert_eq!(msg.session(), "S01");
        assert_eq!(msg.firm(), "F1");
        assert_eq!(msg.access_key_id(), "KEY-1");
    }

    #[test]
    fn test_establish_roundtrip() {
        let mut wire = [0u8; 128];
        let n = encode_establish(&mut wire, 7, 456, 1, 10_000, "S01", "F1");

        let (_, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        let msg = Establish(frame.block);
        assert_eq!(msg.uuid(), 7);
        assert_eq!(msg.next_seq_no(), 1);
        assert_eq!(msg.keep_alive_interval_ms(), 10_000);
        assert_eq!(msg.firm(), "F1");
    }

    #[test]
    fn test_new_order_roundtrip() {
        let mut wire = [0u8; 256];
        // PRICE9: 4500.25 = 4_500_250_000_000
        let n = encode_new_order(
            &mut wire,
            4_500_250_000_000,
            3,
            1,
            2,
            "ORD-00001",
            "ESZ5",
            987_654_321,
        );
        assert_eq!(n, frame_size(NEW_ORDER_BLOCK));

        let (_, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        assert_eq!(frame.template_id, template::NEW_ORDER_SINGLE);
        let msg = NewOrderSingle(frame.block);
        assert_eq!(msg.price(), 4_500_250_000_000);
        assert_eq!(msg.order_qty(), 3);
        assert_eq!(msg.side(), 1);
        assert_eq!(msg.ord_type(), 2);
        assert_eq!(msg.cl_ord_id(), "ORD-00001");
        assert_eq!(msg.symbol(), "ESZ5");
        assert_eq!(msg.sending_time(), 987_654_321);
    }

    #[test]
    fn test_exec_trade_roundtrip() {
        let mut wire = [0u8; 256];
        let n = encode_exec_trade(
            &mut wire,
            42,
            4_500_000_000_000,
            2,
            2,
            1,
            1,
            1,
            "ORD-00001",
            "ESZ5",
            99,
        );

        let (_, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        let msg = ExecReportTrade(frame.block);
        assert_eq!(msg.order_id(), 42);
        assert_eq!(msg.last_px(), 4_500_000_000_000);
        assert_eq!(msg.last_qty(), 2);
        assert_eq!(msg.cum_qty(), 2);
        assert_eq!(msg.leaves_qty(), 1);
        assert_eq!(msg.match_number(), 99);
    }

    #[test]
    fn test_sequence_roundtrip() {
        let mut wire = [0u8; 64];
        let n = encode_sequence(&mut wire, 5, 17, true);
        let (_, frame) = decode_frame(&wire[..n]).unwrap().unwrap();
        let msg = Sequence(frame.block);
        assert_eq!(msg.uuid(), 5);
        assert_eq!(msg.next_seq_no(), 17);
        assert!(msg.keep_alive_lapsed());
    }
}
