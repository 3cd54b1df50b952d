use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeTierStatus {
    pub eligible: bool,
    pub remaining: u32,
    pub whitelisted: bool,
}

/// Per-pubkey free-event allowance with a whitelist bypass (spec.md §4.10).
/// `increment` is fire-and-forget: callers must not await it before
/// accepting an event, so the counter lives behind an `Arc` the caller can
/// clone into a detached task.
#[derive(Clone)]
pub struct FreeTierTracker {
    inner: Arc<Inner>,
}

struct Inner {
    allowance: u32,
    whitelist: HashSet<String>,
    counts: DashMap<String, u32>,
}

impl FreeTierTracker {
    pub fn new(allowance: u32, whitelist: HashSet<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                allowance,
                whitelist,
                counts: DashMap::new(),
            }),
        }
    }

    pub fn check(&self, pubkey: &str) -> FreeTierStatus {
        if self.inner.whitelist.contains(pubkey) {
            return FreeTierStatus {
                eligible: true,
                remaining: u32::MAX,
                whitelisted: true,
            };
        }
        let used = self.inner.counts.get(pubkey).map(|c| *c).unwrap_or(0);
        let remaining = self.inner.allowance.saturating_sub(used);
        FreeTierStatus {
            eligible: used < self.inner.allowance,
            remaining,
            whitelisted: false,
        }
    }

    /// Spawns the increment as a detached task so it never delays event
    /// acceptance (spec.md §4.10: "callers should not await its
    /// completion").
    pub fn increment(&self, pubkey: String) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            *inner.counts.entry(pubkey).or_insert(0) += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn whitelisted_pubkey_is_always_eligible() {
        let mut whitelist = HashSet::new();
        whitelist.insert("alice".to_string());
        let tracker = FreeTierTracker::new(0, whitelist);
        assert!(tracker.check("alice").eligible);
        assert!(tracker.check("alice").whitelisted);
    }

    #[tokio::test]
    async fn disabled_allowance_rejects_non_whitelisted() {
        let tracker = FreeTierTracker::new(0, HashSet::new());
        assert!(!tracker.check("bob").eligible);
    }

    #[tokio::test]
    async fn increment_reduces_remaining_allowance() {
        let tracker = FreeTierTracker::new(2, HashSet::new());
        assert!(tracker.check("carol").eligible);
        tracker.increment("carol".to_string());
        tokio::task::yield_now().await;
        let status = tracker.check("carol");
        assert_eq!(status.remaining, 1);
        assert!(status.eligible);
    }
}
