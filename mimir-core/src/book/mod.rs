//! Live-order registry
//!
//! Process-wide map of every order the simulator has seen, shared by all
//! sessions of all protocol families. Dual-indexed: by exchange-assigned
//! id and by (session id, client id). Orders are mutated only by
//! dispatcher code, under the individual order's lock; the maps
//! themselves are sharded (dashmap) so cross-session traffic does not
//! serialize.
//!
//! Orders are kept for the life of the process; there is no eviction.

mod order;

pub use order::Order;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Shared handle to one registered order
pub type OrderRef = Arc<Mutex<Order>>;

pub struct OrderRegistry {
    by_exchange_id: DashMap<u64, OrderRef>,
    /// (session id, client id) -> exchange id. A replace chain leaves the
    /// old client id mapped to the replaced order; the replacement is
    /// registered under its own client id.
    by_client_id: DashMap<(String, String), u64>,
}

impl OrderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            by_exchange_id: DashMap::new(),
            by_client_id: DashMap::new(),
        })
    }

    /// Register an order. Returns false (and registers nothing) when the
    /// exchange id is already taken.
    pub fn add(&self, order: Order) -> bool {
        use dashmap::mapref::entry::Entry;

        let exchange_id = order.exchange_id;
        let client_key = (order.session_id.clone(), order.client_id.clone());

        match self.by_exchange_id.entry(exchange_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Arc::new(Mutex::new(order)));
                self.by_client_id.insert(client_key, exchange_id);
                true
            }
        }
    }

    pub fn by_exchange_id(&self, exchange_id: u64) -> Option<OrderRef> {
        self.by_exchange_id
            .get(&exchange_id)
            .map(|e| Arc::clone(e.value()))
    }

    /// Look up the order a (session, client id) pair currently names.
    /// After a replace the pair resolves to the most recent registration.
    pub fn by_client_id(&self, client_id: &str, session_id: &str) -> Option<OrderRef> {
        let key = (session_id.to_string(), client_id.to_string());
        let exchange_id = *self.by_client_id.get(&key)?;
        self.by_exchange_id(exchange_id)
    }

    /// Orders still able to trade (Accepted or PartiallyFilled)
    pub fn active_count(&self) -> usize {
        self.by_exchange_id
            .iter()
            .filter(|e| e.value().lock().state.is_live())
            .count()
    }

    /// Total registered, any state
    pub fn total_count(&self) -> usize {
        self.by_exchange_id.len()
    }

    /// Snapshot of every order, for the status/viewer paths
    pub fn snapshot(&self) -> Vec<Order> {
        self.by_exchange_id
            .iter()
            .map(|e| e.value().lock().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrdType, Protocol, Side};

    fn order(exchange_id: u64, client_id: &str, session: &str) -> Order {
        Order::new(
            exchange_id,
            client_id,
            "MSFT",
            Side::Buy,
            OrdType::Limit,
            100,
            Some(3_000_000),
            session,
            Protocol::Ouch42,
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let registry = OrderRegistry::new();
        assert!(registry.add(order(1, "c1", "s1")));

        let by_ex = registry.by_exchange_id(1).unwrap();
        assert_eq!(by_ex.lock().client_id, "c1");

        let by_client = registry.by_client_id("c1", "s1").unwrap();
        assert_eq!(by_client.lock().exchange_id, 1);
    }

    #[test]
    fn test_duplicate_exchange_id_refused() {
        let registry = OrderRegistry::new();
        assert!(registry.add(order(7, "c1", "s1")));
        assert!(!registry.add(order(7, "c2", "s1")));
        // Original untouched
        assert_eq!(registry.by_exchange_id(7).unwrap().lock().client_id, "c1");
    }

    #[test]
    fn test_client_ids_scoped_by_session() {
        let registry = OrderRegistry::new();
        registry.add(order(1, "c1", "alpha"));
        registry.add(order(2, "c1", "beta"));

        assert_eq!(
            registry.by_client_id("c1", "alpha").unwrap().lock().exchange_id,
            1
        );
        assert_eq!(
            registry.by_client_id("c1", "beta").unwrap().lock().exchange_id,
            2
        );
        assert!(registry.by_client_id("c1", "gamma").is_none());
    }

    #[test]
    fn test_active_count_tracks_transitions() {
        let registry = OrderRegistry::new();
        registry.add(order(1, "c1", "s1"));
        registry.add(order(2, "c2", "s1"));
        assert_eq!(registry.active_count(), 0); // both still New

        registry.by_exchange_id(1).unwrap().lock().accept();
        registry.by_exchange_id(2).unwrap().lock().accept();
        assert_eq!(registry.active_count(), 2);

        {
            let order_ref = registry.by_exchange_id(1).unwrap();
            let mut o = order_ref.lock();
            o.fill(100, 3_000_000);
        }
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.total_count(), 2);
    }

    #[test]
    fn test_mutation_through_lock_visible_to_other_index() {
        let registry = OrderRegistry::new();
        registry.add(order(5, "c9", "s1"));

        registry.by_client_id("c9", "s1").unwrap().lock().accept();
        assert!(registry.by_exchange_id(5).unwrap().lock().state.is_live());
    }
}
