use super::{dedup_by_id, order_and_limit, EventStore, StoreError, StoreOutcome, StoredEvent};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nostr_types::{EventId, NostrEvent, NostrFilter};
use std::collections::HashMap;

/// In-memory [`EventStore`], used by this crate's own unit tests and
/// available to any embedder that wants the relay without a Postgres
/// dependency (spec.md §9: "define the Event Store purely as a behavioral
/// contract ... so concrete backends can be plugged without altering
/// callers").
#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<EventId, StoredEvent>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store(&self, event: NostrEvent, source_peer: String, now: i64) -> Result<StoreOutcome, StoreError> {
        let expires_at = event.expiration();
        // `entry()` locks the shard for the id, making check-then-insert
        // atomic under concurrent stores of the same id.
        match self.events.entry(event.id.clone()) {
            Entry::Occupied(_) => Ok(StoreOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(StoredEvent {
                    event,
                    received_at: now,
                    source_peer,
                    is_deleted: false,
                    expires_at,
                });
                Ok(StoreOutcome::Inserted)
            }
        }
    }

    async fn exists(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.events.contains_key(id))
    }

    async fn get(&self, id: &EventId, now: i64) -> Result<Option<NostrEvent>, StoreError> {
        Ok(self
            .events
            .get(id)
            .filter(|e| e.is_visible(now))
            .map(|e| e.event.clone()))
    }

    async fn delete(&self, id: &EventId) -> Result<bool, StoreError> {
        if let Some(mut entry) = self.events.get_mut(id) {
            entry.is_deleted = true;
            return Ok(true);
        }
        Ok(false)
    }

    async fn query(&self, filters: &[NostrFilter], now: i64) -> Result<Vec<NostrEvent>, StoreError> {
        let matching: Vec<NostrEvent> = self
            .events
            .iter()
            .filter(|entry| entry.is_visible(now))
            .filter(|entry| NostrFilter::any_matches(filters, &entry.event))
            .map(|entry| entry.event.clone())
            .collect();
        Ok(order_and_limit(dedup_by_id(matching), filters))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.events.len() as u64)
    }

    async fn count_by_kind(&self) -> Result<HashMap<i32, u64>, StoreError> {
        let mut counts = HashMap::new();
        for entry in self.events.iter() {
            *counts.entry(entry.event.kind).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn deleted_count(&self) -> Result<u64, StoreError> {
        Ok(self.events.iter().filter(|e| e.is_deleted).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_types::{PubKey, Signature};

    fn event(id_byte: u8, created_at: i64, kind: i32, tags: Vec<Vec<String>>) -> NostrEvent {
        NostrEvent {
            id: EventId([id_byte; 32]),
            pubkey: PubKey([1u8; 32]),
            created_at,
            kind,
            tags,
            content: String::new(),
            sig: Signature([0u8; 64]),
        }
    }

    #[tokio::test]
    async fn store_idempotence() {
        let store = InMemoryEventStore::new();
        let e = event(1, 100, 1, vec![]);
        assert_eq!(store.store(e.clone(), "peer".into(), 100).await.unwrap(), StoreOutcome::Inserted);
        assert_eq!(store.store(e.clone(), "peer".into(), 100).await.unwrap(), StoreOutcome::Duplicate);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_hides_from_get() {
        let store = InMemoryEventStore::new();
        let e = event(2, 100, 1, vec![]);
        store.store(e.clone(), "peer".into(), 100).await.unwrap();
        assert!(store.delete(&e.id).await.unwrap());
        assert!(store.delete(&e.id).await.unwrap());
        assert_eq!(store.get(&e.id, 200).await.unwrap(), None);
        assert!(store.exists(&e.id).await.unwrap());
    }

    #[tokio::test]
    async fn get_hides_expired_events() {
        let store = InMemoryEventStore::new();
        let e = event(3, 100, 1, vec![vec!["expiration".to_string(), "150".to_string()]]);
        store.store(e.clone(), "peer".into(), 100).await.unwrap();
        assert!(store.get(&e.id, 120).await.unwrap().is_some());
        assert!(store.get(&e.id, 200).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_orders_by_created_at_desc_then_id_asc() {
        let store = InMemoryEventStore::new();
        let e1 = event(1, 100, 1, vec![]);
        let e2 = event(2, 200, 1, vec![]);
        let e3 = event(3, 200, 1, vec![]);
        for e in [e1.clone(), e2.clone(), e3.clone()] {
            store.store(e, "peer".into(), 0).await.unwrap();
        }

        let results = store.query(&[NostrFilter::default()], 1_000).await.unwrap();
        assert_eq!(results[0].id, e2.id);
        assert_eq!(results[1].id, e3.id);
        assert_eq!(results[2].id, e1.id);
    }

    #[tokio::test]
    async fn query_excludes_deleted_and_expired() {
        let store = InMemoryEventStore::new();
        let visible = event(1, 100, 1, vec![]);
        let deleted = event(2, 100, 1, vec![]);
        store.store(visible.clone(), "peer".into(), 0).await.unwrap();
        store.store(deleted.clone(), "peer".into(), 0).await.unwrap();
        store.delete(&deleted.id).await.unwrap();

        let results = store.query(&[NostrFilter::default()], 1_000).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, visible.id);
    }

    #[tokio::test]
    async fn query_by_ids_filter_matches_exact_event() {
        let store = InMemoryEventStore::new();
        let e = event(7, 100, 1, vec![]);
        store.store(e.clone(), "peer".into(), 0).await.unwrap();

        let filter = NostrFilter {
            ids: Some(vec![e.id.clone()]),
            ..Default::default()
        };
        let results = store.query(&[filter], 1_000).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, e.id);
    }
}
