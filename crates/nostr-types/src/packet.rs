use crate::event::NostrEvent;
use crate::filter::NostrFilter;
use serde::{Deserialize, Serialize};

/// Maximum payload declared by the 4-byte header's `u16` length field
/// (spec.md §6).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// The seven BTP-NIPs message types (spec.md §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Event = 0x01,
    Req = 0x02,
    Close = 0x03,
    Notice = 0x04,
    Eose = 0x05,
    Ok = 0x06,
    Auth = 0x07,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Event),
            0x02 => Some(Self::Req),
            0x03 => Some(Self::Close),
            0x04 => Some(Self::Notice),
            0x05 => Some(Self::Eose),
            0x06 => Some(Self::Ok),
            0x07 => Some(Self::Auth),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub amount: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub timestamp: i64,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

/// The type-specific `nostr` payload field (spec.md §3, §6), constructed by
/// the relay when building an outbound packet. Deliberately keeps `subId`
/// as written — spec.md §9 flags the upstream's `subId` vs `subscriptionId`
/// split as an open question and directs implementers not to silently
/// unify the wire names; this crate speaks `subId` only.
///
/// Inbound packets carry this same shape, but are decoded from the raw
/// `serde_json::Value` held in [`PacketPayload::nostr`] against the type
/// implied by the packet's [`MessageType`] rather than by guessing from an
/// untagged union — §4.1 requires a specific type-shape check per message
/// type, not best-effort matching.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NostrPayload {
    Event(Box<NostrEvent>),
    Req(Vec<NostrFilter>),
    Close { #[serde(rename = "subId")] sub_id: String },
    Notice { message: String },
    Eose { #[serde(rename = "subId")] sub_id: String },
    Ok { #[serde(rename = "eventId")] event_id: String, accepted: bool, message: String },
    Auth(Box<NostrEvent>),
    /// Relay-to-subscriber event delivery: `EVENT{subId, event}` (spec.md
    /// §6). Distinct from the bare `Event` variant clients use to submit a
    /// new event, which carries no subscription id.
    EventDelivery {
        #[serde(rename = "subId")]
        sub_id: String,
        event: Box<NostrEvent>,
    },
}

/// The JSON payload carried after the 4-byte header (spec.md §6). `nostr`
/// is left as a raw value here because its shape depends on the sibling
/// [`MessageType`], which lives one level up in [`Packet`]; the codec
/// decodes it into the concrete type once both are known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketPayload {
    pub payment: PaymentInfo,
    pub nostr: serde_json::Value,
    pub metadata: RequestMetadata,
}

impl PacketPayload {
    pub fn new(payment: PaymentInfo, nostr: &NostrPayload, metadata: RequestMetadata) -> Self {
        Self {
            payment,
            nostr: serde_json::to_value(nostr).expect("NostrPayload always serializes"),
            metadata,
        }
    }
}

/// A fully parsed binary packet: header fields plus its typed payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub version: u8,
    pub message_type: MessageType,
    pub payload: PacketPayload,
}

impl Packet {
    pub fn new(message_type: MessageType, payload: PacketPayload) -> Self {
        Self {
            version: 1,
            message_type,
            payload,
        }
    }
}
