use super::schema::events;
use super::{EventStore, StoreError, StoreOutcome};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use nostr_types::{EventId, NostrEvent, NostrFilter, PubKey, Signature, Tag};
use std::collections::HashMap;
use tokio::task::spawn_blocking;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Queryable)]
struct EventRow {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: i32,
    tags: serde_json::Value,
    content: String,
    sig: String,
    #[allow(dead_code)]
    received_at: i64,
    #[allow(dead_code)]
    source_peer: String,
    #[allow(dead_code)]
    is_deleted: bool,
    #[allow(dead_code)]
    expires_at: Option<i64>,
}

impl EventRow {
    fn into_event(self) -> Result<NostrEvent, StoreError> {
        let tags: Vec<Tag> = serde_json::from_value(self.tags)
            .map_err(|e| StoreError::Backend(format!("corrupt tags column: {e}")))?;
        Ok(NostrEvent {
            id: EventId::from_hex(&self.id)
                .map_err(|e| StoreError::Backend(format!("corrupt id column: {e}")))?,
            pubkey: PubKey::from_hex(&self.pubkey)
                .map_err(|e| StoreError::Backend(format!("corrupt pubkey column: {e}")))?,
            created_at: self.created_at,
            kind: self.kind,
            tags,
            content: self.content,
            sig: Signature::from_hex(&self.sig)
                .map_err(|e| StoreError::Backend(format!("corrupt sig column: {e}")))?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = events)]
struct NewEventRow {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: i32,
    tags: serde_json::Value,
    content: String,
    sig: String,
    received_at: i64,
    source_peer: String,
    is_deleted: bool,
    expires_at: Option<i64>,
}

/// Postgres-backed [`EventStore`] (spec.md §6 persisted schema). Connection
/// checkout and query execution both block, so every method hands the
/// actual work to [`spawn_blocking`] rather than tying up the async runtime.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn insert_event(conn: &mut PgConnection, row: NewEventRow) -> QueryResult<StoreOutcome> {
    let inserted = diesel::insert_into(events::table)
        .values(&row)
        .on_conflict(events::id)
        .do_nothing()
        .execute(conn)?;
    Ok(if inserted == 1 {
        StoreOutcome::Inserted
    } else {
        StoreOutcome::Duplicate
    })
}

fn soft_delete(conn: &mut PgConnection, id: &str) -> QueryResult<bool> {
    let updated = diesel::update(events::table)
        .filter(events::id.eq(id))
        .set(events::is_deleted.eq(true))
        .execute(conn)?;
    Ok(updated > 0)
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn store(
        &self,
        event: NostrEvent,
        source_peer: String,
        now: i64,
    ) -> Result<StoreOutcome, StoreError> {
        let pool = self.pool.clone();
        let expires_at = event.expiration();
        let row = NewEventRow {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            created_at: event.created_at,
            kind: event.kind,
            tags: serde_json::to_value(&event.tags)
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            content: event.content,
            sig: event.sig.to_hex(),
            received_at: now,
            source_peer,
            is_deleted: false,
            expires_at,
        };
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            insert_event(&mut conn, row).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn exists(&self, id: &EventId) -> Result<bool, StoreError> {
        let pool = self.pool.clone();
        let id = id.to_hex();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            events::table
                .filter(events::id.eq(&id))
                .count()
                .get_result::<i64>(&mut conn)
                .map(|n| n > 0)
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn get(&self, id: &EventId, now: i64) -> Result<Option<NostrEvent>, StoreError> {
        let pool = self.pool.clone();
        let id = id.to_hex();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            let row = events::table
                .filter(events::id.eq(&id))
                .filter(events::is_deleted.eq(false))
                .filter(
                    events::expires_at
                        .is_null()
                        .or(events::expires_at.gt(now)),
                )
                .first::<EventRow>(&mut conn)
                .optional()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            row.map(EventRow::into_event).transpose()
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn delete(&self, id: &EventId) -> Result<bool, StoreError> {
        let pool = self.pool.clone();
        let id = id.to_hex();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            soft_delete(&mut conn, &id).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn query(
        &self,
        filters: &[NostrFilter],
        now: i64,
    ) -> Result<Vec<NostrEvent>, StoreError> {
        // Filter matching (authors/kinds/tags/since/until union semantics,
        // spec.md §3 `NostrFilter`) is evaluated in Rust against the
        // candidate set rather than translated into SQL — the filter
        // language has no fixed arity, so a single prepared query can't
        // express it. Candidates are everything visible as of `now`.
        let pool = self.pool.clone();
        let filters = filters.to_vec();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            let rows = events::table
                .filter(events::is_deleted.eq(false))
                .filter(
                    events::expires_at
                        .is_null()
                        .or(events::expires_at.gt(now)),
                )
                .load::<EventRow>(&mut conn)
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let mut matching = Vec::new();
            for row in rows {
                let event = row.into_event()?;
                if NostrFilter::any_matches(&filters, &event) {
                    matching.push(event);
                }
            }
            Ok(super::order_and_limit(
                super::dedup_by_id(matching),
                &filters,
            ))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            events::table
                .count()
                .get_result::<i64>(&mut conn)
                .map(|n| n as u64)
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn count_by_kind(&self) -> Result<HashMap<i32, u64>, StoreError> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            let kinds = events::table
                .select(events::kind)
                .load::<i32>(&mut conn)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let mut counts = HashMap::new();
            for kind in kinds {
                *counts.entry(kind).or_insert(0) += 1;
            }
            Ok(counts)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    async fn deleted_count(&self) -> Result<u64, StoreError> {
        let pool = self.pool.clone();
        spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
            events::table
                .filter(events::is_deleted.eq(true))
                .count()
                .get_result::<i64>(&mut conn)
                .map(|n| n as u64)
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}
