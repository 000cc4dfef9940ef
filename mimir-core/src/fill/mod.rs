//! Probabilistic fill engine
//!
//! Evaluates each newly accepted (or replaced) order against an ordered
//! rule list and answers: no fill, partial fill, or full fill, with
//! quantity and price. Two uniform draws per matching rule: the first
//! against the fill probability, the second against the partial-fill
//! probability. Partials take `max(1, leaves/2)` shares, the simulator's
//! convention.
//!
//! The RNG is process-local and seeded from configuration, so a fixed
//! seed plus a fixed rule list replays the same decision sequence.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::book::Order;

/// One fill rule. Larger priority is consulted earlier; the first rule
/// whose pattern matches the symbol wins.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FillRule {
    /// `*` matches any symbol; a pattern containing `*` glob-matches;
    /// anything else is literal equality.
    pub symbol_pattern: String,
    #[serde(default)]
    pub priority: i32,
    pub fill_probability: f64,
    #[serde(default)]
    pub partial_fill_probability: f64,
}

impl FillRule {
    /// The default when no rules are configured: fill everything in full
    pub fn fill_all() -> Self {
        Self {
            symbol_pattern: "*".to_string(),
            priority: 0,
            fill_probability: 1.0,
            partial_fill_probability: 0.0,
        }
    }

    pub fn matches(&self, symbol: &str) -> bool {
        glob_match(&self.symbol_pattern, symbol)
    }
}

/// Anchored glob over `*` wildcards; no character classes
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;

    // First segment anchors at the start unless the pattern opens with *
    if let Some(first) = segments.first() {
        if !first.is_empty() {
            match rest.strip_prefix(first) {
                Some(r) => rest = r,
                None => return false,
            }
        }
    }
    // Last segment anchors at the end unless the pattern closes with *
    let last = segments.last().copied().unwrap_or("");
    let middle = &segments[1..segments.len().saturating_sub(1)];

    for seg in middle {
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(at) => rest = &rest[at + seg.len()..],
            None => return false,
        }
    }

    if last.is_empty() {
        true
    } else {
        rest.ends_with(last)
    }
}

/// The engine's answer for one order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillDecision {
    pub should_fill: bool,
    pub quantity: u64,
    pub price: i64,
    pub is_full_fill: bool,
}

impl FillDecision {
    pub const fn no_fill() -> Self {
        Self {
            should_fill: false,
            quantity: 0,
            price: 0,
            is_full_fill: false,
        }
    }
}

pub struct FillEngine {
    /// Priority-descending; ties keep configuration order
    rules: Vec<FillRule>,
    rng: Mutex<StdRng>,
    /// Price used for market orders with no limit price on file
    reference_price: i64,
}

impl FillEngine {
    pub fn new(mut rules: Vec<FillRule>, seed: u64, reference_price: i64) -> Self {
        if rules.is_empty() {
            rules.push(FillRule::fill_all());
        }
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        Self {
            rules,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            reference_price,
        }
    }

    pub fn rules(&self) -> &[FillRule] {
        &self.rules
    }

    /// Decide what, if anything, this order trades right now.
    ///
    /// Draws at most two uniforms; both come from the shared seeded
    /// stream so decisions are reproducible run-to-run.
    pub fn evaluate(&self, order: &Order) -> FillDecision {
        if order.leaves_qty == 0 {
            return FillDecision::no_fill();
        }

        let Some(rule) = self.rules.iter().find(|r| r.matches(&order.symbol)) else {
            return FillDecision::no_fill();
        };

        let (fill_draw, partial_draw) = {
            let mut rng = self.rng.lock();
            (rng.gen::<f64>(), rng.gen::<f64>())
        };

        if fill_draw >= rule.fill_probability {
            return FillDecision::no_fill();
        }

        // Limit orders trade at their limit; market orders fall back to
        // the configured reference price when no price came on the wire.
        let price = order.limit_price.unwrap_or(self.reference_price);

        let quantity = if partial_draw < rule.partial_fill_probability {
            (order.leaves_qty / 2).max(1)
        } else {
            order.leaves_qty
        };

        FillDecision {
            should_fill: true,
            quantity,
            price,
            is_full_fill: quantity == order.leaves_qty,
        }
    }
}
