use crate::subscription::SubscriptionRegistry;
use dashmap::DashMap;
use nostr_types::{NostrEvent, NostrFilter};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An EVENT delivery destined for one subscriber's connection.
#[derive(Debug, Clone)]
pub struct OutboundDelivery {
    pub sub_id: String,
    pub event: NostrEvent,
}

/// Per-peer outbound channels. Each peer's connection task owns the
/// receiving half and writes frames to the socket in the order it reads
/// them, which is what gives fan-out its per-subscriber ordering guarantee
/// (spec.md §5) — the channel itself is the ordering point.
#[derive(Default)]
pub struct PeerRegistry {
    senders: DashMap<String, mpsc::UnboundedSender<OutboundDelivery>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: String, sender: mpsc::UnboundedSender<OutboundDelivery>) {
        self.senders.insert(peer, sender);
    }

    pub fn unregister(&self, peer: &str) {
        self.senders.remove(peer);
    }

    /// `true` if `peer` has a live connection and the frame was handed off
    /// to it. `false` means the peer is gone or its channel is closed.
    pub fn send(&self, peer: &str, delivery: OutboundDelivery) -> bool {
        match self.senders.get(peer) {
            Some(sender) => sender.send(delivery).is_ok(),
            None => false,
        }
    }
}

/// For each accepted event, notifies every live subscription whose filter
/// set matches (spec.md §4.13). A failed send means the peer's connection
/// is gone; the subscription is torn down immediately rather than resent.
pub struct FanoutScheduler {
    subscriptions: Arc<SubscriptionRegistry>,
    peers: Arc<PeerRegistry>,
}

impl FanoutScheduler {
    pub fn new(subscriptions: Arc<SubscriptionRegistry>, peers: Arc<PeerRegistry>) -> Self {
        Self { subscriptions, peers }
    }

    /// Enqueues the event to every matching active subscription. Deliveries
    /// to distinct subscribers are independent channel sends and may be
    /// drained in parallel by their owning connection tasks; deliveries
    /// queued for the same subscriber preserve this call's iteration order.
    pub fn dispatch(&self, event: &NostrEvent) {
        for sub in self.subscriptions.all() {
            if !NostrFilter::any_matches(&sub.filters, event) {
                continue;
            }
            let delivered = self.peers.send(
                &sub.subscriber,
                OutboundDelivery {
                    sub_id: sub.sub_id.clone(),
                    event: event.clone(),
                },
            );
            if !delivered {
                self.subscriptions.unregister(&sub.sub_id, &sub.subscriber);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_types::{EventId, PubKey, Signature};

    fn event(kind: i32) -> NostrEvent {
        NostrEvent {
            id: EventId([9u8; 32]),
            pubkey: PubKey([1u8; 32]),
            created_at: 100,
            kind,
            tags: vec![],
            content: String::new(),
            sig: Signature([0u8; 64]),
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_only_to_matching_subscriptions() {
        let subs = Arc::new(SubscriptionRegistry::new());
        let peers = Arc::new(PeerRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        peers.register("alice".to_string(), tx);

        subs.register(
            "s1".to_string(),
            "alice".to_string(),
            vec![NostrFilter {
                kinds: Some(vec![1]),
                ..Default::default()
            }],
            60,
            3600,
            0,
        )
        .unwrap();

        let scheduler = FanoutScheduler::new(subs, peers);
        scheduler.dispatch(&event(1));
        scheduler.dispatch(&event(2));

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.sub_id, "s1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_unregisters_subscription_on_dead_peer() {
        let subs = Arc::new(SubscriptionRegistry::new());
        let peers = Arc::new(PeerRegistry::new());
        subs.register("s1".to_string(), "ghost".to_string(), vec![NostrFilter::default()], 60, 3600, 0)
            .unwrap();

        let scheduler = FanoutScheduler::new(subs.clone(), peers);
        scheduler.dispatch(&event(1));

        assert!(!subs.has("s1", "ghost"));
    }
}
