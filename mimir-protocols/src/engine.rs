//! Shared engine wiring and the protocol-agnostic dispatch semantics
//!
//! [`EngineHandles`] is built once at startup and handed to every
//! protocol engine by reference; there is no service locator. The
//! `submit_order` / `cancel_order` / `replace_order` helpers hold the
//! registry + fill-engine choreography that is identical across
//! protocols, so each dispatcher only decodes, calls, and encodes.

use std::sync::Arc;

use mimir_core::book::{Order, OrderRef, OrderRegistry};
use mimir_core::config::SimulatorConfig;
use mimir_core::core::ExchangeIdAllocator;
use mimir_core::fill::FillEngine;
use mimir_core::journal::Journal;
use mimir_core::session::SessionListener;

/// Everything a protocol engine needs, wired explicitly at startup
pub struct EngineHandles {
    pub registry: Arc<OrderRegistry>,
    pub fill_engine: Arc<FillEngine>,
    pub journal: Arc<Journal>,
    /// Exchange-assigned order ids, unique across all protocols
    pub order_ids: Arc<ExchangeIdAllocator>,
    /// Execution ids / match numbers
    pub exec_ids: Arc<ExchangeIdAllocator>,
    pub listener: Arc<dyn SessionListener>,
    pub config: SimulatorConfig,
}

impl EngineHandles {
    pub fn new(
        config: SimulatorConfig,
        journal: Arc<Journal>,
        listener: Arc<dyn SessionListener>,
    ) -> Arc<Self> {
        let fill_engine = Arc::new(FillEngine::new(
            config.fill_rules.clone(),
            config.rng_seed,
            config.reference_price,
        ));
        Arc::new(Self {
            registry: OrderRegistry::new(),
            fill_engine,
            journal,
            order_ids: Arc::new(ExchangeIdAllocator::new()),
            exec_ids: Arc::new(ExchangeIdAllocator::new()),
            listener,
            config,
        })
    }
}

/// A fill the engine just applied to an order
#[derive(Debug, Clone, Copy)]
pub struct AppliedFill {
    pub qty: u64,
    pub price: i64,
    pub cum_qty: u64,
    pub leaves_qty: u64,
    pub avg_price: i64,
    pub is_full: bool,
    pub match_number: u64,
}

/// Outcome of a new-order submission
pub enum SubmitOutcome {
    /// Client id already live on this session; log and drop, never ack
    Duplicate,
    /// Order failed validation; carries the reject reason
    Rejected(&'static str),
    /// Accepted (and possibly immediately filled)
    Accepted {
        order: OrderRef,
        fill: Option<AppliedFill>,
    },
}

/// Outcome of a cancel request
pub enum CancelOutcome {
    /// No such client id on this session; log and drop
    NotFound,
    /// Order is already terminal; whether to answer is protocol policy
    TooLate(OrderRef),
    Canceled {
        order: OrderRef,
        decremented_qty: u64,
    },
}

/// Outcome of a cancel/replace request
pub enum ReplaceOutcome {
    NotFound,
    TooLate(OrderRef),
    Replaced {
        old: OrderRef,
        new: OrderRef,
        fill: Option<AppliedFill>,
    },
}

/// Register, accept, and run the fill engine over a new order.
///
/// The order arrives in state New; on success it leaves Accepted,
/// PartiallyFilled or Filled. Empty symbol or zero quantity rejects.
pub fn submit_order(handles: &EngineHandles, order: Order) -> SubmitOutcome {
    let session_id = order.session_id.clone();
    let client_id = order.client_id.clone();

    if order.symbol.is_empty() {
        return SubmitOutcome::Rejected("unknown symbol");
    }
    if order.original_qty == 0 {
        return SubmitOutcome::Rejected("zero quantity");
    }

    // A client id that still names a live order is a duplicate
    if let Some(existing) = handles.registry.by_client_id(&client_id, &session_id) {
        if existing.lock().state.is_live() {
            tracing::warn!(
                session = %session_id,
                client_id = %client_id,
                "duplicate client order id, dropping"
            );
            return SubmitOutcome::Duplicate;
        }
    }

    let exchange_id = order.exchange_id;
    if !handles.registry.add(order) {
        tracing::warn!(exchange_id, "duplicate exchange id, dropping");
        return SubmitOutcome::Duplicate;
    }

    let order_ref = handles
        .registry
        .by_exchange_id(exchange_id)
        .expect("order registered above");

    let fill = {
        let mut order = order_ref.lock();
        if !order.accept() {
            tracing::error!(exchange_id, state = %order.state, "accept refused");
            return SubmitOutcome::Duplicate;
        }

        let decision = handles.fill_engine.evaluate(&order);
        if decision.should_fill && order.fill(decision.quantity, decision.price) {
            Some(AppliedFill {
                qty: decision.quantity,
                price: decision.price,
                cum_qty: order.filled_qty,
                leaves_qty: order.leaves_qty,
                avg_price: order.avg_price(),
                is_full: order.leaves_qty == 0,
                match_number: handles.exec_ids.next_id(),
            })
        } else {
            None
        }
    };

    SubmitOutcome::Accepted {
        order: order_ref,
        fill,
    }
}

/// Cancel by (client id, session). The false path of `Order::cancel`
/// surfaces as `TooLate`; the dispatcher decides whether that is silent.
pub fn cancel_order(handles: &EngineHandles, client_id: &str, session_id: &str) -> CancelOutcome {
    let Some(order_ref) = handles.registry.by_client_id(client_id, session_id) else {
        tracing::info!(session = session_id, client_id, "cancel for unknown order, dropping");
        return CancelOutcome::NotFound;
    };

    let decremented = {
        let mut order = order_ref.lock();
        let leaves = order.leaves_qty;
        if !order.cancel() {
            drop(order);
            return CancelOutcome::TooLate(order_ref);
        }
        leaves
    };

    CancelOutcome::Canceled {
        order: order_ref,
        decremented_qty: decremented,
    }
}

/// Cancel/replace: retire the old order, register the replacement under a
/// fresh exchange id, then let the fill engine look at the new quantity.
pub fn replace_order(
    handles: &EngineHandles,
    orig_client_id: &str,
    session_id: &str,
    new_order: Order,
) -> ReplaceOutcome {
    let Some(old_ref) = handles.registry.by_client_id(orig_client_id, session_id) else {
        tracing::info!(
            session = session_id,
            client_id = orig_client_id,
            "replace for unknown order, dropping"
        );
        return ReplaceOutcome::NotFound;
    };

    {
        let mut old = old_ref.lock();
        if !old.mark_replaced() {
            drop(old);
            return ReplaceOutcome::TooLate(old_ref);
        }
    }

    match submit_order(handles, new_order) {
        SubmitOutcome::Accepted { order, fill } => ReplaceOutcome::Replaced {
            old: old_ref,
            new: order,
            fill,
        },
        // The old order is already Replaced; a failed re-registration
        // leaves the chain broken, which mirrors dropping the request.
        _ => {
            tracing::warn!(
                session = session_id,
                client_id = orig_client_id,
                "replacement registration failed after retiring original"
            );
            ReplaceOutcome::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimir_core::config::SimulatorConfig;
    use mimir_core::core::{OrdType, OrderState, Protocol, Side};
    use mimir_core::fill::FillRule;
    use mimir_core::session::LoggingListener;

    fn handles_with_rules(rules: Vec<FillRule>) -> Arc<EngineHandles> {
        let dir = tempfile::tempdir().unwrap().into_path();
        let journal = Journal::open(dir.join("j")).unwrap();
        let config = SimulatorConfig {
            fill_rules: rules,
            ..SimulatorConfig::default()
        };
        EngineHandles::new(config, journal, Arc::new(LoggingListener))
    }

    fn order(handles: &EngineHandles, client_id: &str, qty: u64) -> Order {
        Order::new(
            handles.order_ids.next_id(),
            client_id,
            "AAPL",
            Side::Buy,
            OrdType::Limit,
            qty,
            Some(1_500_000),
            "sess",
            Protocol::Ouch42,
        )
    }

    #[test]
    fn test_submit_full_fill() {
        let handles = handles_with_rules(vec![]);
        let o = order(&handles, "c1", 100);

        match submit_order(&handles, o) {
            SubmitOutcome::Accepted { order, fill } => {
                let fill = fill.expect("default rule fills in full");
                assert_eq!(fill.qty, 100);
                assert_eq!(fill.leaves_qty, 0);
                assert!(fill.is_full);
                assert_eq!(fill.match_number, 1);
                assert_eq!(order.lock().state, OrderState::Filled);
            }
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn test_submit_duplicate_client_id_dropped() {
        let handles = handles_with_rules(vec![FillRule {
            symbol_pattern: "*".to_string(),
            priority: 0,
            fill_probability: 0.0,
            partial_fill_probability: 0.0,
        }]);

        let first = order(&handles, "dup", 10);
        assert!(matches!(
            submit_order(&handles, first),
            SubmitOutcome::Accepted { .. }
        ));

        let second = order(&handles, "dup", 10);
        assert!(matches!(
            submit_order(&handles, second),
            SubmitOutcome::Duplicate
        ));
    }

    #[test]
    fn test_submit_rejects_bad_orders() {
        let handles = handles_with_rules(vec![]);

        let mut empty_symbol = order(&handles, "c1", 10);
        empty_symbol.symbol.clear();
        assert!(matches!(
            submit_order(&handles, empty_symbol),
            SubmitOutcome::Rejected("unknown symbol")
        ));

        let zero_qty = order(&handles, "c2", 0);
        assert!(matches!(
            submit_order(&handles, zero_qty),
            SubmitOutcome::Rejected("zero quantity")
        ));
    }

    #[test]
    fn test_cancel_flow() {
        let handles = handles_with_rules(vec![FillRule {
            symbol_pattern: "*".to_string(),
            priority: 0,
            fill_probability: 0.0,
            partial_fill_probability: 0.0,
        }]);

        let o = order(&handles, "c1", 50);
        submit_order(&handles, o);

        match cancel_order(&handles, "c1", "sess") {
            CancelOutcome::Canceled {
                order,
                decremented_qty,
            } => {
                assert_eq!(decremented_qty, 50);
                assert_eq!(order.lock().state, OrderState::Canceled);
            }
            _ => panic!("expected cancel"),
        }

        assert!(matches!(
            cancel_order(&handles, "c1", "sess"),
            CancelOutcome::TooLate(_)
        ));
        assert!(matches!(
            cancel_order(&handles, "nope", "sess"),
            CancelOutcome::NotFound
        ));
    }

    #[test]
    fn test_cancel_filled_is_too_late() {
        let handles = handles_with_rules(vec![]);
        submit_order(&handles, order(&handles, "c1", 10));

        assert!(matches!(
            cancel_order(&handles, "c1", "sess"),
            CancelOutcome::TooLate(_)
        ));
    }

    #[test]
    fn test_replace_flow() {
        let handles = handles_with_rules(vec![FillRule {
            symbol_pattern: "*".to_string(),
            priority: 0,
            fill_probability: 0.0,
            partial_fill_probability: 0.0,
        }]);

        submit_order(&handles, order(&handles, "c1", 50));

        let replacement = order(&handles, "c1-r", 80);
        match replace_order(&handles, "c1", "sess", replacement) {
            ReplaceOutcome::Replaced { old, new, fill } => {
                assert_eq!(old.lock().state, OrderState::Replaced);
                assert_eq!(new.lock().original_qty, 80);
                assert_eq!(new.lock().state, OrderState::Accepted);
                assert!(fill.is_none());
            }
            _ => panic!("expected replace"),
        }

        // Old client id resolves to the replaced (terminal) order now;
        // the new id is live
        assert!(matches!(
            cancel_order(&handles, "c1", "sess"),
            CancelOutcome::TooLate(_)
        ));
        assert!(matches!(
            cancel_order(&handles, "c1-r", "sess"),
            CancelOutcome::Canceled { .. }
        ));
    }
}
