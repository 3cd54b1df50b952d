mod in_memory;
mod postgres;
pub mod schema;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

use async_trait::async_trait;
use nostr_types::{EventId, NostrEvent, NostrFilter};

/// Outcome of `store()` (spec.md §4.3). Duplicate insertion is not an
/// error — callers branch on this to decide which `OK` response to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A stored event (spec.md §3 `StoredEvent`): a [`NostrEvent`] plus the
/// bookkeeping fields the store itself owns.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: NostrEvent,
    pub received_at: i64,
    pub source_peer: String,
    pub is_deleted: bool,
    pub expires_at: Option<i64>,
}

impl StoredEvent {
    pub fn is_visible(&self, now: i64) -> bool {
        !self.is_deleted && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// The Event Store contract (spec.md §4.3). Defined as a trait so an
/// in-memory implementation (used in tests and in this crate's own unit
/// tests) and a Postgres-backed implementation can be swapped without
/// touching any caller — no mock database leaks into the contract itself.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn store(&self, event: NostrEvent, source_peer: String, now: i64) -> Result<StoreOutcome, StoreError>;
    async fn exists(&self, id: &EventId) -> Result<bool, StoreError>;
    async fn get(&self, id: &EventId, now: i64) -> Result<Option<NostrEvent>, StoreError>;
    async fn delete(&self, id: &EventId) -> Result<bool, StoreError>;
    async fn query(&self, filters: &[NostrFilter], now: i64) -> Result<Vec<NostrEvent>, StoreError>;
    async fn count(&self) -> Result<u64, StoreError>;
    async fn count_by_kind(&self) -> Result<std::collections::HashMap<i32, u64>, StoreError>;
    async fn deleted_count(&self) -> Result<u64, StoreError>;
}

/// Orders query results by `created_at DESC, id ASC` (spec.md §4.3) and
/// applies the first `limit` matching filter's `limit`, if any.
pub(crate) fn order_and_limit(mut events: Vec<NostrEvent>, filters: &[NostrFilter]) -> Vec<NostrEvent> {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
    });

    if let Some(limit) = filters.iter().find_map(|f| f.limit) {
        events.truncate(limit as usize);
    }
    events
}

/// Deduplicates by event id, keeping first occurrence (spec.md §4.12 REQ
/// step 4: "union across filters, deduplicated by event id").
pub(crate) fn dedup_by_id(events: Vec<NostrEvent>) -> Vec<NostrEvent> {
    let mut seen = std::collections::HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}
