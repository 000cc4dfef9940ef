//! FIX application-message dispatcher
//!
//! Bridges decoded NewOrderSingle / Cancel / CancelReplace / Status
//! requests to the shared registry + fill engine and renders
//! ExecutionReports back through the session's outbound path.

use anyhow::Result;

use mimir_core::book::Order;
use mimir_core::config::{CancelOnFilledPolicy, FixListenerConfig};
use mimir_core::core::{OrdType, OrderState, Side};
use mimir_core::session::SessionCore;

use crate::engine::{
    cancel_order, replace_order, submit_order, AppliedFill, CancelOutcome, EngineHandles,
    ReplaceOutcome, SubmitOutcome,
};

use super::decoder::FixMessage;
use super::session::FixOutbound;
use super::{exec, msg_type, session_reject, tags, FixError, PRICE_SCALE};

/// Everything one application message needs
pub struct AppContext<'a> {
    pub handles: &'a EngineHandles,
    pub out: &'a FixOutbound,
    pub core: &'a mut SessionCore,
    pub config: &'a FixListenerConfig,
    pub now_ms: u64,
}

pub fn dispatch_app(ctx: &mut AppContext<'_>, msg: &FixMessage) -> Result<()> {
    match msg.msg_type() {
        t if t == msg_type::NEW_ORDER_SINGLE => new_order(ctx, msg),
        t if t == msg_type::ORDER_CANCEL_REQUEST => cancel(ctx, msg),
        t if t == msg_type::ORDER_CANCEL_REPLACE => replace(ctx, msg),
        t if t == msg_type::ORDER_STATUS_REQUEST => status(ctx, msg),
        other => {
            let other = other.to_vec();
            business_reject(ctx, msg, &other);
            Ok(())
        }
    }
}

// ----------------------------------------------------------------------
// Field mapping
// ----------------------------------------------------------------------

fn side_from_wire(c: u8) -> Option<Side> {
    match c {
        b'1' => Some(Side::Buy),
        b'2' => Some(Side::Sell),
        b'5' => Some(Side::SellShort),
        b'6' => Some(Side::SellShortExempt),
        _ => None,
    }
}

fn side_to_wire(side: Side) -> u8 {
    match side {
        Side::Buy => b'1',
        Side::Sell => b'2',
        Side::SellShort => b'5',
        Side::SellShortExempt => b'6',
    }
}

fn ord_type_from_wire(c: u8) -> Option<OrdType> {
    match c {
        b'1' => Some(OrdType::Market),
        b'2' => Some(OrdType::Limit),
        b'3' => Some(OrdType::Stop),
        b'4' => Some(OrdType::StopLimit),
        _ => None,
    }
}

fn ord_status_char(state: OrderState) -> u8 {
    match state {
        OrderState::New | OrderState::Accepted => exec::NEW,
        OrderState::PartiallyFilled => exec::PARTIAL_FILL,
        OrderState::Filled => exec::FILL,
        OrderState::Canceled => exec::CANCELED,
        OrderState::Replaced => exec::REPLACED,
        OrderState::Rejected => exec::REJECTED,
    }
}

/// Parse the order-defining fields shared by D and G
fn parse_order_fields(
    ctx: &AppContext<'_>,
    msg: &FixMessage,
    client_id: &str,
) -> Result<Order, FixError> {
    let symbol = msg
        .get_str(tags::SYMBOL)
        .ok_or(FixError::MissingTag(tags::SYMBOL))?;
    let side = msg
        .get_char(tags::SIDE)
        .and_then(side_from_wire)
        .ok_or(FixError::BadValue(tags::SIDE))?;
    let qty = msg
        .get_u64(tags::ORDER_QTY)
        .ok_or(FixError::MissingTag(tags::ORDER_QTY))?;
    let ord_type = msg
        .get_char(tags::ORD_TYPE)
        .and_then(ord_type_from_wire)
        .ok_or(FixError::BadValue(tags::ORD_TYPE))?;
    let price = msg.get_decimal(tags::PRICE, PRICE_SCALE);

    if ord_type.has_limit_price() && price.is_none() {
        return Err(FixError::MissingTag(tags::PRICE));
    }

    Ok(Order::new(
        ctx.handles.order_ids.next_id(),
        client_id,
        symbol,
        side,
        ord_type,
        qty,
        price,
        ctx.core.id.clone(),
        ctx.core.protocol,
    ))
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

fn new_order(ctx: &mut AppContext<'_>, msg: &FixMessage) -> Result<()> {
    let Some(cl_ord_id) = msg.get_str(tags::CL_ORD_ID).map(str::to_string) else {
        let seq = msg.seq_num().unwrap_or(0);
        session_reject_missing(ctx, seq, tags::CL_ORD_ID);
        return Ok(());
    };

    let order = match parse_order_fields(ctx, msg, &cl_ord_id) {
        Ok(order) => order,
        Err(e) => {
            tracing::warn!(session = %ctx.core.id, cl_ord_id, error = %e, "bad NewOrderSingle");
            session_reject_missing(ctx, msg.seq_num().unwrap_or(0), match e {
                FixError::MissingTag(t) | FixError::BadValue(t) => t,
                _ => 0,
            });
            return Ok(());
        }
    };

    match submit_order(ctx.handles, order) {
        SubmitOutcome::Duplicate => Ok(()),
        SubmitOutcome::Rejected(reason) => {
            // Never registered: report the rejection off the wire fields
            send_raw_reject_report(ctx, &cl_ord_id, msg, reason);
            Ok(())
        }
        SubmitOutcome::Accepted { order, fill } => {
            {
                let o = order.lock();
                send_exec_report(ctx, &o, Report::New);
            }
            if let Some(fill) = fill {
                let o = order.lock();
                send_exec_report(ctx, &o, Report::Fill(fill));
            }
            Ok(())
        }
    }
}

fn cancel(ctx: &mut AppContext<'_>, msg: &FixMessage) -> Result<()> {
    let Some(orig) = msg.get_str(tags::ORIG_CL_ORD_ID).map(str::to_string) else {
        session_reject_missing(ctx, msg.seq_num().unwrap_or(0), tags::ORIG_CL_ORD_ID);
        return Ok(());
    };
    let request_id = msg
        .get_str(tags::CL_ORD_ID)
        .unwrap_or(&orig)
        .to_string();

    match cancel_order(ctx.handles, &orig, &ctx.core.id) {
        CancelOutcome::NotFound => Ok(()),
        CancelOutcome::TooLate(order) => {
            match ctx.config.cancel_on_filled {
                CancelOnFilledPolicy::Silent => {}
                CancelOnFilledPolicy::CancelReject => {
                    let o = order.lock();
                    send_cancel_reject(ctx, &o, &request_id, &orig, b'1');
                }
            }
            Ok(())
        }
        CancelOutcome::Canceled { order, .. } => {
            let o = order.lock();
            send_exec_report(
                ctx,
                &o,
                Report::Canceled {
                    request_id: &request_id,
                    orig_cl_ord_id: &orig,
                },
            );
            Ok(())
        }
    }
}

fn replace(ctx: &mut AppContext<'_>, msg: &FixMessage) -> Result<()> {
    let Some(orig) = msg.get_str(tags::ORIG_CL_ORD_ID).map(str::to_string) else {
        session_reject_missing(ctx, msg.seq_num().unwrap_or(0), tags::ORIG_CL_ORD_ID);
        return Ok(());
    };
    let Some(new_cl_ord_id) = msg.get_str(tags::CL_ORD_ID).map(str::to_string) else {
        session_reject_missing(ctx, msg.seq_num().unwrap_or(0), tags::CL_ORD_ID);
        return Ok(());
    };

    let replacement = match parse_order_fields(ctx, msg, &new_cl_ord_id) {
        Ok(order) => order,
        Err(e) => {
            tracing::warn!(session = %ctx.core.id, error = %e, "bad CancelReplace");
            return Ok(());
        }
    };

    match replace_order(ctx.handles, &orig, &ctx.core.id, replacement) {
        ReplaceOutcome::NotFound => Ok(()),
        ReplaceOutcome::TooLate(order) => {
            match ctx.config.cancel_on_filled {
                CancelOnFilledPolicy::Silent => {}
                CancelOnFilledPolicy::CancelReject => {
                    let o = order.lock();
                    send_cancel_reject(ctx, &o, &new_cl_ord_id, &orig, b'2');
                }
            }
            Ok(())
        }
        ReplaceOutcome::Replaced { new, fill, .. } => {
            {
                let o = new.lock();
                send_exec_report(ctx, &o, Report::Replaced { orig_cl_ord_id: &orig });
            }
            if let Some(fill) = fill {
                let o = new.lock();
                send_exec_report(ctx, &o, Report::Fill(fill));
            }
            Ok(())
        }
    }
}

fn status(ctx: &mut AppContext<'_>, msg: &FixMessage) -> Result<()> {
    let Some(cl_ord_id) = msg.get_str(tags::CL_ORD_ID).map(str::to_string) else {
        session_reject_missing(ctx, msg.seq_num().unwrap_or(0), tags::CL_ORD_ID);
        return Ok(());
    };

    match ctx.handles.registry.by_client_id(&cl_ord_id, &ctx.core.id) {
        None => {
            tracing::info!(session = %ctx.core.id, cl_ord_id, "status for unknown order");
            Ok(())
        }
        Some(order) => {
            let o = order.lock();
            send_exec_report(ctx, &o, Report::Status);
            Ok(())
        }
    }
}

fn business_reject(ctx: &mut AppContext<'_>, msg: &FixMessage, ref_type: &[u8]) {
    let seq = msg.seq_num().unwrap_or(0);
    let ref_type = String::from_utf8_lossy(ref_type).into_owned();
    tracing::info!(session = %ctx.core.id, msg_type = %ref_type, "unsupported application message");
    let result = ctx
        .out
        .send(ctx.core, ctx.now_ms, msg_type::BUSINESS_REJECT, |enc| {
            enc.field_int(tags::REF_SEQ_NUM, seq as i64)
                .field_str(tags::REF_MSG_TYPE, &ref_type)
                .field_int(tags::BUSINESS_REJECT_REASON, 3)
                .field_str(tags::TEXT, "unsupported message type");
        });
    if let Err(e) = result {
        tracing::error!(session = %ctx.core.id, error = %e, "business reject send failed");
    }
}

fn session_reject_missing(ctx: &mut AppContext<'_>, ref_seq: u64, tag: u32) {
    let result = ctx.out.send(ctx.core, ctx.now_ms, msg_type::REJECT, |enc| {
        enc.field_int(tags::REF_SEQ_NUM, ref_seq as i64)
            .field_int(
                tags::SESSION_REJECT_REASON,
                session_reject::REQUIRED_TAG_MISSING as i64,
            )
            .field_str(tags::TEXT, &format!("required tag {tag} missing or bad"));
    });
    if let Err(e) = result {
        tracing::error!(session = %ctx.core.id, error = %e, "session reject send failed");
    }
}

// ----------------------------------------------------------------------
// ExecutionReport rendering
// ----------------------------------------------------------------------

enum Report<'a> {
    New,
    Fill(AppliedFill),
    Canceled {
        request_id: &'a str,
        orig_cl_ord_id: &'a str,
    },
    Replaced {
        orig_cl_ord_id: &'a str,
    },
    Status,
}

fn send_exec_report(ctx: &mut AppContext<'_>, order: &Order, report: Report<'_>) {
    let exec_id = ctx.handles.exec_ids.next_id();
    let fix42 = ctx.out.is_fix42();

    let (exec_type, ord_status, cl_ord_id, orig_cl_ord_id, last): (
        u8,
        u8,
        &str,
        Option<&str>,
        Option<(u64, i64)>,
    ) = match &report {
        Report::New => (exec::NEW, exec::NEW, order.client_id.as_str(), None, None),
        Report::Fill(fill) => {
            let status = if fill.is_full {
                exec::FILL
            } else {
                exec::PARTIAL_FILL
            };
            // FIX 4.2 spells fills 1/2 in ExecType; 4.4+ uses F
            let exec_type = if fix42 { status } else { exec::TRADE };
            (
                exec_type,
                status,
                order.client_id.as_str(),
                None,
                Some((fill.qty, fill.price)),
            )
        }
        Report::Canceled {
            request_id,
            orig_cl_ord_id,
        } => (
            exec::CANCELED,
            exec::CANCELED,
            *request_id,
            Some(*orig_cl_ord_id),
            None,
        ),
        Report::Replaced { orig_cl_ord_id } => (
            exec::REPLACED,
            exec::NEW,
            order.client_id.as_str(),
            Some(*orig_cl_ord_id),
            None,
        ),
        Report::Status => {
            let status = ord_status_char(order.state);
            (status, status, order.client_id.as_str(), None, None)
        }
    };

    // The fill engine may have already run by the time the acceptance
    // ack renders, so New/Replaced report the pre-fill quantities; fill
    // reports use the snapshot taken when the fill applied.
    let (leaves, cum, avg) = match &report {
        Report::New | Report::Replaced { .. } => (order.original_qty, 0, 0),
        Report::Fill(fill) => (fill.leaves_qty, fill.cum_qty, fill.avg_price),
        Report::Canceled { .. } => (0, order.filled_qty, order.avg_price()),
        Report::Status => {
            let leaves = if order.state.is_terminal() && order.state != OrderState::Filled {
                0
            } else {
                order.leaves_qty
            };
            (leaves, order.filled_qty, order.avg_price())
        }
    };

    let result = ctx
        .out
        .send(ctx.core, ctx.now_ms, msg_type::EXECUTION_REPORT, |enc| {
            enc.field_int(tags::ORDER_ID, order.exchange_id as i64)
                .field_str(tags::CL_ORD_ID, cl_ord_id);
            if let Some(orig) = orig_cl_ord_id {
                enc.field_str(tags::ORIG_CL_ORD_ID, orig);
            }
            enc.field_int(tags::EXEC_ID, exec_id as i64);
            if fix42 {
                enc.field_char(tags::EXEC_TRANS_TYPE, b'0');
            }
            enc.field_char(tags::EXEC_TYPE, exec_type)
                .field_char(tags::ORD_STATUS, ord_status)
                .field_str(tags::SYMBOL, &order.symbol)
                .field_char(tags::SIDE, side_to_wire(order.side))
                .field_int(tags::ORDER_QTY, order.original_qty as i64);
            if let Some(px) = order.limit_price {
                enc.field_decimal(tags::PRICE, px, PRICE_SCALE);
            }
            if let Some((qty, px)) = last {
                enc.field_int(tags::LAST_SHARES, qty as i64)
                    .field_decimal(tags::LAST_PX, px, PRICE_SCALE);
            }
            enc.field_int(tags::LEAVES_QTY, leaves as i64)
                .field_int(tags::CUM_QTY, cum as i64)
                .field_decimal(tags::AVG_PX, avg, PRICE_SCALE);
        });
    if let Err(e) = result {
        tracing::error!(session = %ctx.core.id, error = %e, "execution report send failed");
    }
}

/// Rejection for an order that never made it into the registry
fn send_raw_reject_report(ctx: &mut AppContext<'_>, cl_ord_id: &str, msg: &FixMessage, reason: &str) {
    let exec_id = ctx.handles.exec_ids.next_id();
    let fix42 = ctx.out.is_fix42();
    let symbol = msg.get_str(tags::SYMBOL).unwrap_or("").to_string();
    let side = msg.get_char(tags::SIDE).unwrap_or(b'1');
    let qty = msg.get_u64(tags::ORDER_QTY).unwrap_or(0);

    let result = ctx
        .out
        .send(ctx.core, ctx.now_ms, msg_type::EXECUTION_REPORT, |enc| {
            enc.field_int(tags::ORDER_ID, 0)
                .field_str(tags::CL_ORD_ID, cl_ord_id)
                .field_int(tags::EXEC_ID, exec_id as i64);
            if fix42 {
                enc.field_char(tags::EXEC_TRANS_TYPE, b'0');
            }
            enc.field_char(tags::EXEC_TYPE, exec::REJECTED)
                .field_char(tags::ORD_STATUS, exec::REJECTED)
                .field_str(tags::SYMBOL, &symbol)
                .field_char(tags::SIDE, side)
                .field_int(tags::ORDER_QTY, qty as i64)
                .field_int(tags::LEAVES_QTY, 0)
                .field_int(tags::CUM_QTY, 0)
                .field_int(tags::AVG_PX, 0)
                .field_str(tags::TEXT, reason);
        });
    if let Err(e) = result {
        tracing::error!(session = %ctx.core.id, error = %e, "reject report send failed");
    }
}

fn send_cancel_reject(
    ctx: &mut AppContext<'_>,
    order: &Order,
    request_id: &str,
    orig_cl_ord_id: &str,
    response_to: u8,
) {
    let result = ctx
        .out
        .send(ctx.core, ctx.now_ms, msg_type::ORDER_CANCEL_REJECT, |enc| {
            enc.field_int(tags::ORDER_ID, order.exchange_id as i64)
                .field_str(tags::CL_ORD_ID, request_id)
                .field_str(tags::ORIG_CL_ORD_ID, orig_cl_ord_id)
                .field_char(tags::ORD_STATUS, ord_status_char(order.state))
                .field_char(tags::CXL_REJ_RESPONSE_TO, response_to)
                .field_int(tags::CXL_REJ_REASON, 0)
                .field_str(tags::TEXT, "too late to cancel");
        });
    if let Err(e) = result {
        tracing::error!(session = %ctx.core.id, error = %e, "cancel reject send failed");
    }
}
