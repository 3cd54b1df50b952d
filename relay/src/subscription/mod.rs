use dashmap::DashMap;
use nostr_types::NostrFilter;

/// A live REQ subscription (spec.md §3 `Subscription`). Owned by the
/// registry; the fan-out scheduler only ever reads it.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub sub_id: String,
    pub subscriber: String,
    pub filters: Vec<NostrFilter>,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("REQ requires at least one filter")]
    EmptyFilters,
    #[error("sub_id must not be empty")]
    EmptySubId,
    #[error("ttl exceeds the configured maximum")]
    TtlTooLarge,
}

type Key = (String, String);

/// Tracks active REQ subscriptions keyed by `(subscriber, sub_id)`
/// (spec.md §4.4). Backed by a concurrent map: registration, lookup and
/// sweeping are all synchronous, non-suspending operations (spec.md §5).
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<Key, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        sub_id: String,
        subscriber: String,
        filters: Vec<NostrFilter>,
        ttl_secs: i64,
        max_ttl_secs: i64,
        now: i64,
    ) -> Result<(), RegisterError> {
        if filters.is_empty() {
            return Err(RegisterError::EmptyFilters);
        }
        if sub_id.is_empty() {
            return Err(RegisterError::EmptySubId);
        }
        if ttl_secs > max_ttl_secs {
            return Err(RegisterError::TtlTooLarge);
        }
        let key = (subscriber.clone(), sub_id.clone());
        self.subscriptions.insert(
            key,
            Subscription {
                sub_id,
                subscriber,
                filters,
                created_at: now,
                expires_at: now + ttl_secs,
            },
        );
        Ok(())
    }

    /// Idempotent: unregistering an absent subscription is not an error
    /// (spec.md §4.4, CLOSE idempotence).
    pub fn unregister(&self, sub_id: &str, subscriber: &str) -> bool {
        self.subscriptions
            .remove(&(subscriber.to_string(), sub_id.to_string()))
            .is_some()
    }

    pub fn get(&self, sub_id: &str, subscriber: &str) -> Option<Subscription> {
        self.subscriptions
            .get(&(subscriber.to_string(), sub_id.to_string()))
            .map(|e| e.clone())
    }

    pub fn has(&self, sub_id: &str, subscriber: &str) -> bool {
        self.subscriptions
            .contains_key(&(subscriber.to_string(), sub_id.to_string()))
    }

    pub fn by_subscriber(&self, subscriber: &str) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|e| e.key().0 == subscriber)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.subscriptions.len()
    }

    /// All live subscriptions, for the fan-out scheduler to match against.
    pub fn all(&self) -> Vec<Subscription> {
        self.subscriptions.iter().map(|e| e.value().clone()).collect()
    }

    /// Evicts subscriptions whose `expires_at <= now`. Returns how many
    /// were removed.
    pub fn sweep(&self, now: i64) -> usize {
        let expired: Vec<Key> = self
            .subscriptions
            .iter()
            .filter(|e| e.value().expires_at <= now)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.subscriptions.remove(key);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> Vec<NostrFilter> {
        vec![NostrFilter::default()]
    }

    #[test]
    fn register_rejects_empty_filters() {
        let reg = SubscriptionRegistry::new();
        assert_eq!(
            reg.register("s1".into(), "peer".into(), vec![], 60, 3600, 0),
            Err(RegisterError::EmptyFilters)
        );
    }

    #[test]
    fn register_rejects_empty_sub_id() {
        let reg = SubscriptionRegistry::new();
        assert_eq!(
            reg.register("".into(), "peer".into(), filters(), 60, 3600, 0),
            Err(RegisterError::EmptySubId)
        );
    }

    #[test]
    fn register_rejects_ttl_over_max() {
        let reg = SubscriptionRegistry::new();
        assert_eq!(
            reg.register("s1".into(), "peer".into(), filters(), 7200, 3600, 0),
            Err(RegisterError::TtlTooLarge)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let reg = SubscriptionRegistry::new();
        reg.register("s1".into(), "peer".into(), filters(), 60, 3600, 0).unwrap();
        assert!(reg.unregister("s1", "peer"));
        assert!(!reg.unregister("s1", "peer"));
        assert!(!reg.has("s1", "peer"));
    }

    #[test]
    fn distinct_subscribers_with_same_sub_id_are_independent() {
        let reg = SubscriptionRegistry::new();
        reg.register("s1".into(), "alice".into(), filters(), 60, 3600, 0).unwrap();
        reg.register("s1".into(), "bob".into(), filters(), 60, 3600, 0).unwrap();
        assert!(reg.unregister("s1", "alice"));
        assert!(reg.has("s1", "bob"));
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let reg = SubscriptionRegistry::new();
        reg.register("expired".into(), "peer".into(), filters(), 10, 3600, 0).unwrap();
        reg.register("fresh".into(), "peer".into(), filters(), 100, 3600, 0).unwrap();
        let removed = reg.sweep(50);
        assert_eq!(removed, 1);
        assert!(!reg.has("expired", "peer"));
        assert!(reg.has("fresh", "peer"));
    }

    #[test]
    fn by_subscriber_returns_only_that_subscribers_subscriptions() {
        let reg = SubscriptionRegistry::new();
        reg.register("s1".into(), "alice".into(), filters(), 60, 3600, 0).unwrap();
        reg.register("s2".into(), "alice".into(), filters(), 60, 3600, 0).unwrap();
        reg.register("s1".into(), "bob".into(), filters(), 60, 3600, 0).unwrap();
        assert_eq!(reg.by_subscriber("alice").len(), 2);
        assert_eq!(reg.count(), 3);
    }
}
