use std::collections::HashMap;

/// The operations a price can be attached to (spec.md §4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Store,
    Deliver,
    Query,
}

/// Required-amount-in-satoshi lookup for `(operation, event_kind)` pairs.
/// Loaded once at startup from configuration; changes require a restart
/// (spec.md §4.14).
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    store_event: u64,
    deliver_event: u64,
    query: u64,
    kind_overrides: HashMap<i32, u64>,
}

impl PricingPolicy {
    pub fn new(store_event: u64, deliver_event: u64, query: u64, kind_overrides: HashMap<i32, u64>) -> Self {
        Self {
            store_event,
            deliver_event,
            query,
            kind_overrides,
        }
    }

    /// Precedence: (1) per-kind override, (2) per-operation default, (3)
    /// zero for an unrecognized operation. `kind` is only meaningful for
    /// `Store`/`Deliver`; `Query` has no associated event kind.
    pub fn required_amount(&self, operation: Operation, kind: Option<i32>) -> u64 {
        if let Some(kind) = kind {
            if let Some(&amount) = self.kind_overrides.get(&kind) {
                return amount;
            }
        }
        match operation {
            Operation::Store => self.store_event,
            Operation::Deliver => self.deliver_event,
            Operation::Query => self.query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_override_takes_precedence_over_operation_default() {
        let mut overrides = HashMap::new();
        overrides.insert(1, 50);
        let pricing = PricingPolicy::new(10, 1, 5, overrides);
        assert_eq!(pricing.required_amount(Operation::Store, Some(1)), 50);
    }

    #[test]
    fn falls_back_to_operation_default_without_override() {
        let pricing = PricingPolicy::new(10, 1, 5, HashMap::new());
        assert_eq!(pricing.required_amount(Operation::Store, Some(7)), 10);
        assert_eq!(pricing.required_amount(Operation::Deliver, Some(7)), 1);
        assert_eq!(pricing.required_amount(Operation::Query, None), 5);
    }
}
