//! Wire-level types shared across the relay: Nostr events and filters, the
//! binary packet envelope, and the Interledger-style payment claim.
//!
//! This crate is intentionally free of I/O and of any runtime dependency —
//! everything here is pure data plus the validation spec.md requires of it,
//! so it can be depended on by the relay's codec/verifier/claim-parser
//! without pulling in tokio, diesel, or any transport.

mod claim;
mod event;
mod filter;
mod packet;

pub use claim::{Currency, PaymentClaim, PaymentClaimError};
pub use event::{compute_event_id, EventId, NostrEvent, PubKey, Signature, Tag};
pub use filter::NostrFilter;
pub use packet::{
    MessageType, Packet, PacketPayload, PaymentInfo, RequestMetadata, NostrPayload,
    MAX_PAYLOAD_LEN,
};
