//! Diesel table definition for the persisted event store (spec.md §6).

diesel::table! {
    events (id) {
        id -> Text,
        pubkey -> Text,
        created_at -> BigInt,
        kind -> Integer,
        tags -> Jsonb,
        content -> Text,
        sig -> Text,
        received_at -> BigInt,
        source_peer -> Text,
        is_deleted -> Bool,
        expires_at -> Nullable<BigInt>,
    }
}
