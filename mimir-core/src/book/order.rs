use crate::core::{OrdType, OrderState, Protocol, Side};
use crate::time::now_millis;

/// The canonical live order record
///
/// Protocol dispatchers construct one of these from whatever their wire
/// format carried, and every response they emit is rendered back out of
/// it. Quantities are shares; prices are integer fixed-point in the
/// owning protocol's scale (the dispatcher that created the order is the
/// only writer, so the scale never mixes).
///
/// Invariants, maintained by the transition methods:
/// - `filled_qty + leaves_qty == original_qty`
/// - `state == Filled` exactly when `leaves_qty == 0 && original_qty > 0`
/// - `avg_price()` is the share-weighted mean of fill prices
#[derive(Debug, Clone)]
pub struct Order {
    pub exchange_id: u64,
    pub client_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrdType,
    pub original_qty: u64,
    pub filled_qty: u64,
    pub leaves_qty: u64,
    pub limit_price: Option<i64>,
    pub session_id: String,
    pub protocol: Protocol,
    pub state: OrderState,
    pub reject_reason: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// Share-weighted fill notional, i128 so price*qty cannot overflow
    filled_notional: i128,
    /// Price of the most recent fill
    last_fill_price: i64,
    /// Quantity of the most recent fill
    last_fill_qty: u64,
}

impl Order {
    pub fn new(
        exchange_id: u64,
        client_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrdType,
        qty: u64,
        limit_price: Option<i64>,
        session_id: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        let now = now_millis();
        Self {
            exchange_id,
            client_id: client_id.into(),
            symbol: symbol.into(),
            side,
            order_type,
            original_qty: qty,
            filled_qty: 0,
            leaves_qty: qty,
            limit_price,
            session_id: session_id.into(),
            protocol,
            state: OrderState::New,
            reject_reason: None,
            created_at_ms: now,
            updated_at_ms: now,
            filled_notional: 0,
            last_fill_price: 0,
            last_fill_qty: 0,
        }
    }

    /// Share-weighted average fill price (0 before any fill)
    #[inline]
    pub fn avg_price(&self) -> i64 {
        if self.filled_qty == 0 {
            0
        } else {
            (self.filled_notional / self.filled_qty as i128) as i64
        }
    }

    #[inline]
    pub fn last_fill(&self) -> (u64, i64) {
        (self.last_fill_qty, self.last_fill_price)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    // ------------------------------------------------------------------
    // Transitions. Each returns false when illegal from the current
    // state; callers must tolerate the false path (e.g. a cancel for a
    // filled order simply produces no ack).
    // ------------------------------------------------------------------

    /// New -> Accepted
    pub fn accept(&mut self) -> bool {
        if self.state != OrderState::New {
            return false;
        }
        self.state = OrderState::Accepted;
        self.updated_at_ms = now_millis();
        true
    }

    /// Apply a fill. Accepted | PartiallyFilled -> PartiallyFilled | Filled.
    /// Rejects zero quantity, zero/negative price, and overfills.
    pub fn fill(&mut self, qty: u64, price: i64) -> bool {
        if !self.state.is_live() {
            return false;
        }
        if qty == 0 || price <= 0 || qty > self.leaves_qty {
            return false;
        }

        self.filled_qty += qty;
        self.leaves_qty -= qty;
        self.filled_notional += qty as i128 * price as i128;
        self.last_fill_qty = qty;
        self.last_fill_price = price;
        self.state = if self.leaves_qty == 0 {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        self.updated_at_ms = now_millis();
        true
    }

    /// Accepted | PartiallyFilled -> Canceled
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.state = OrderState::Canceled;
        self.updated_at_ms = now_millis();
        true
    }

    /// Shrink a live order by `qty` shares (cancel-down). Reducing by the
    /// full remaining quantity is a plain cancel. The original quantity
    /// shrinks with leaves so conservation holds.
    pub fn decrement(&mut self, qty: u64) -> bool {
        if !self.state.is_live() || qty == 0 || qty > self.leaves_qty {
            return false;
        }
        if qty == self.leaves_qty {
            return self.cancel();
        }
        self.leaves_qty -= qty;
        self.original_qty -= qty;
        self.updated_at_ms = now_millis();
        true
    }

    /// Accepted | PartiallyFilled -> Replaced
    pub fn mark_replaced(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.state = OrderState::Replaced;
        self.updated_at_ms = now_millis();
        true
    }

    /// New -> Rejected
    pub fn reject(&mut self, reason: impl Into<String>) -> bool {
        if self.state != OrderState::New {
            return false;
        }
        self.state = OrderState::Rejected;
        self.reject_reason = Some(reason.into());
        self.updated_at_ms = now_millis();
        true
    }

    /// Debug-only invariant check
    #[cfg(test)]
    pub fn assert_invariants(&self) {
        assert_eq!(self.filled_qty + self.leaves_qty, self.original_qty);
        assert_eq!(
            self.state == OrderState::Filled,
            self.leaves_qty == 0 && self.original_qty > 0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_order(qty: u64, price: i64) -> Order {
        Order::new(
            1,
            "C1",
            "AAPL",
            Side::Buy,
            OrdType::Limit,
            qty,
            Some(price),
            "sess-1",
            Protocol::Fix42,
        )
    }

    #[test]
    fn test_lifecycle_full_fill() {
        let mut order = limit_order(100, 1_500_000);
        assert_eq!(order.state, OrderState::New);

        assert!(order.accept());
        assert_eq!(order.state, OrderState::Accepted);

        assert!(order.fill(100, 1_500_000));
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_qty, 100);
        assert_eq!(order.leaves_qty, 0);
        assert_eq!(order.avg_price(), 1_500_000);
        order.assert_invariants();
    }

    #[test]
    fn test_partial_fills_accumulate() {
        let mut order = limit_order(100, 1_500_000);
        order.accept();

        assert!(order.fill(40, 1_500_000));
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.leaves_qty, 60);
        order.assert_invariants();

        assert!(order.fill(60, 1_500_000));
        assert_eq!(order.state, OrderState::Filled);
        order.assert_invariants();
    }

    #[test]
    fn test_weighted_average_price() {
        let mut order = limit_order(100, 0);
        order.limit_price = None;
        order.accept();

        order.fill(60, 1_000_000);
        order.fill(40, 2_000_000);

        // (60*1.0 + 40*2.0) / 100 = 1.4
        assert_eq!(order.avg_price(), 1_400_000);
        assert_eq!(order.last_fill(), (40, 2_000_000));
    }

    #[test]
    fn test_overfill_rejected() {
        let mut order = limit_order(10, 100);
        order.accept();
        assert!(!order.fill(11, 100));
        assert!(order.fill(10, 100));
        // Already filled: no more fills
        assert!(!order.fill(1, 100));
        order.assert_invariants();
    }

    #[test]
    fn test_fill_validation() {
        let mut order = limit_order(10, 100);
        order.accept();
        assert!(!order.fill(0, 100));
        assert!(!order.fill(1, 0));
        assert!(!order.fill(1, -5));
        assert_eq!(order.filled_qty, 0);
    }

    #[test]
    fn test_cancel_paths() {
        let mut order = limit_order(10, 100);
        // New order cannot cancel (never acked)
        assert!(!order.cancel());

        order.accept();
        assert!(order.cancel());
        assert_eq!(order.state, OrderState::Canceled);

        // Idempotent-false afterwards
        assert!(!order.cancel());
        assert!(!order.fill(1, 100));
    }

    #[test]
    fn test_cancel_after_fill_is_refused() {
        let mut order = limit_order(10, 100);
        order.accept();
        order.fill(10, 100);
        assert!(!order.cancel());
        assert_eq!(order.state, OrderState::Filled);
    }

    #[test]
    fn test_replace_from_partial() {
        let mut order = limit_order(10, 100);
        order.accept();
        order.fill(4, 100);
        assert!(order.mark_replaced());
        assert_eq!(order.state, OrderState::Replaced);
        assert!(!order.fill(1, 100));
    }

    #[test]
    fn test_decrement_partial_and_full() {
        let mut order = limit_order(100, 50);
        order.accept();
        order.fill(20, 50);

        // Cancel down 30 of the 80 remaining
        assert!(order.decrement(30));
        assert_eq!(order.leaves_qty, 50);
        assert_eq!(order.original_qty, 70);
        assert_eq!(order.state, OrderState::PartiallyFilled);
        order.assert_invariants();

        // Decrementing the rest is a cancel
        assert!(order.decrement(50));
        assert_eq!(order.state, OrderState::Canceled);
        order.assert_invariants();

        // And terminal orders refuse
        assert!(!order.decrement(1));
    }

    #[test]
    fn test_decrement_validation() {
        let mut order = limit_order(10, 50);
        order.accept();
        assert!(!order.decrement(0));
        assert!(!order.decrement(11));
        assert_eq!(order.leaves_qty, 10);
    }

    #[test]
    fn test_reject_only_from_new() {
        let mut order = limit_order(10, 100);
        assert!(order.reject("unknown symbol"));
        assert_eq!(order.state, OrderState::Rejected);
        assert_eq!(order.reject_reason.as_deref(), Some("unknown symbol"));

        let mut order = limit_order(10, 100);
        order.accept();
        assert!(!order.reject("too late"));
    }

    #[test]
    fn test_huge_notional_no_overflow() {
        // Price near the i64 ceiling with large quantity still averages
        let mut order = limit_order(1_000_000, i64::MAX / 2);
        order.accept();
        assert!(order.fill(1_000_000, i64::MAX / 2));
        assert_eq!(order.avg_price(), i64::MAX / 2);
    }
}
