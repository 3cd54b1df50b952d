use nostr_types::{MessageType, NostrEvent, NostrFilter, Packet, PacketPayload};

/// All the ways a BTP-NIPs packet can fail to parse (spec.md §4.1).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("packet shorter than the 4-byte header")]
    HeaderTooShort,
    #[error("unsupported protocol version: {0}")]
    WrongVersion(u8),
    #[error("message type byte out of range 1..=7: {0}")]
    InvalidMessageType(u8),
    #[error("declared payload_length does not match actual packet length")]
    LengthMismatch,
    #[error("payload is not valid UTF-8")]
    MalformedPayload,
    #[error("payload JSON does not match the expected shape: {0}")]
    InvalidPayloadShape(String),
}

/// `true` iff `bytes` looks like a complete, well-framed BTP-NIPs packet:
/// `len >= 4`, version byte is `1`, the message-type byte is `1..=7`, and
/// the declared `payload_length` matches the actual remaining length
/// (spec.md §4.1). Performs no JSON parsing — this is a cheap framing
/// check callers can use to decide whether more bytes are needed yet.
pub fn detect(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    if bytes[0] != 1 {
        return false;
    }
    if !(1..=7).contains(&bytes[1]) {
        return false;
    }
    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    bytes.len() == 4 + declared
}

/// Parses a complete packet: header, then payload JSON, then the
/// type-specific shape of `nostr` implied by the message type.
pub fn deserialize(bytes: &[u8]) -> Result<Packet, ParseError> {
    if bytes.len() < 4 {
        return Err(ParseError::HeaderTooShort);
    }
    let version = bytes[0];
    if version != 1 {
        return Err(ParseError::WrongVersion(version));
    }
    let message_type =
        MessageType::from_byte(bytes[1]).ok_or(ParseError::InvalidMessageType(bytes[1]))?;

    let declared_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() != 4 + declared_len {
        return Err(ParseError::LengthMismatch);
    }

    let payload_bytes = &bytes[4..];
    let payload_str = std::str::from_utf8(payload_bytes).map_err(|_| ParseError::MalformedPayload)?;

    let payload: PacketPayload =
        serde_json::from_str(payload_str).map_err(|e| ParseError::InvalidPayloadShape(e.to_string()))?;

    validate_nostr_shape(message_type, &payload.nostr)?;

    Ok(Packet {
        version,
        message_type,
        payload,
    })
}

/// Validates that `nostr` decodes into the shape spec.md §3/§6 mandates for
/// this message type. We only need the shape check here — handlers (C12)
/// layer semantic validation (non-empty filters, limit bounds, …) on top.
fn validate_nostr_shape(message_type: MessageType, nostr: &serde_json::Value) -> Result<(), ParseError> {
    let err = |e: serde_json::Error| ParseError::InvalidPayloadShape(e.to_string());
    match message_type {
        MessageType::Event | MessageType::Auth => {
            serde_json::from_value::<NostrEvent>(nostr.clone()).map_err(err)?;
        }
        MessageType::Req => {
            let filters =
                serde_json::from_value::<Vec<NostrFilter>>(nostr.clone()).map_err(err)?;
            if filters.is_empty() {
                return Err(ParseError::InvalidPayloadShape(
                    "REQ requires a non-empty filter array".to_string(),
                ));
            }
        }
        MessageType::Close => {
            #[derive(serde::Deserialize)]
            struct CloseBody {
                #[serde(rename = "subId")]
                #[allow(dead_code)]
                sub_id: String,
            }
            serde_json::from_value::<CloseBody>(nostr.clone()).map_err(err)?;
        }
        MessageType::Notice => {
            #[derive(serde::Deserialize)]
            struct NoticeBody {
                #[allow(dead_code)]
                message: String,
            }
            serde_json::from_value::<NoticeBody>(nostr.clone()).map_err(err)?;
        }
        MessageType::Eose => {
            #[derive(serde::Deserialize)]
            struct EoseBody {
                #[serde(rename = "subId")]
                #[allow(dead_code)]
                sub_id: String,
            }
            serde_json::from_value::<EoseBody>(nostr.clone()).map_err(err)?;
        }
        MessageType::Ok => {
            #[derive(serde::Deserialize)]
            struct OkBody {
                #[serde(rename = "eventId")]
                #[allow(dead_code)]
                event_id: String,
                #[allow(dead_code)]
                accepted: bool,
                #[allow(dead_code)]
                message: String,
            }
            serde_json::from_value::<OkBody>(nostr.clone()).map_err(err)?;
        }
    }
    Ok(())
}

/// Serializes a packet back to bytes, always recomputing `payload_length`
/// from the actual encoded payload (spec.md §4.1).
pub fn serialize(packet: &Packet) -> Vec<u8> {
    let payload_bytes =
        serde_json::to_vec(&packet.payload).expect("PacketPayload always serializes");
    let len = payload_bytes.len() as u16;

    let mut out = Vec::with_capacity(4 + payload_bytes.len());
    out.push(packet.version);
    out.push(packet.message_type.as_byte());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload_bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_types::{NostrPayload, PacketPayload, PaymentInfo, RequestMetadata};

    fn event_packet() -> (Packet, Vec<u8>) {
        let event = serde_json::json!({
            "id": "a".repeat(64),
            "pubkey": "b".repeat(64),
            "created_at": 1_700_000_000,
            "kind": 1,
            "tags": [],
            "content": "hello",
            "sig": "c".repeat(128),
        });
        let payload = PacketPayload {
            payment: PaymentInfo {
                amount: "100".to_string(),
                currency: "msat".to_string(),
                purpose: None,
            },
            nostr: event,
            metadata: RequestMetadata {
                timestamp: 1_700_000_000,
                sender: "g.dassie.alice".to_string(),
                ttl: None,
            },
        };
        let packet = Packet::new(MessageType::Event, payload);
        let bytes = serialize(&packet);
        (packet, bytes)
    }

    #[test]
    fn detect_true_for_well_framed_bytes() {
        let (_, bytes) = event_packet();
        assert!(detect(&bytes));
    }

    #[test]
    fn detect_false_for_short_buffer() {
        assert!(!detect(&[1, 1, 0]));
    }

    #[test]
    fn detect_false_on_length_mismatch() {
        let (_, mut bytes) = event_packet();
        bytes.push(0); // trailing garbage byte not accounted for in the header
        assert!(!detect(&bytes));
    }

    #[test]
    fn deserialize_round_trips_through_serialize() {
        let (_, bytes) = event_packet();
        let packet = deserialize(&bytes).unwrap();
        let reserialized = serialize(&packet);
        assert_eq!(bytes, reserialized);

        // And re-parsing + re-serializing again is a fixed point.
        let packet2 = deserialize(&reserialized).unwrap();
        assert_eq!(serialize(&packet2), reserialized);
    }

    #[test]
    fn rejects_wrong_version() {
        let (_, mut bytes) = event_packet();
        bytes[0] = 2;
        assert_eq!(deserialize(&bytes), Err(ParseError::WrongVersion(2)));
    }

    #[test]
    fn rejects_message_type_out_of_range() {
        let (_, mut bytes) = event_packet();
        bytes[1] = 9;
        assert_eq!(deserialize(&bytes), Err(ParseError::InvalidMessageType(9)));
    }

    #[test]
    fn rejects_length_mismatch() {
        let (_, mut bytes) = event_packet();
        bytes[3] = bytes[3].wrapping_add(1);
        assert_eq!(deserialize(&bytes), Err(ParseError::LengthMismatch));
    }

    #[test]
    fn rejects_req_with_empty_filter_array() {
        let payload = PacketPayload {
            payment: PaymentInfo {
                amount: "0".to_string(),
                currency: "msat".to_string(),
                purpose: None,
            },
            nostr: serde_json::json!([]),
            metadata: RequestMetadata {
                timestamp: 0,
                sender: "peer".to_string(),
                ttl: None,
            },
        };
        let packet = Packet::new(MessageType::Req, payload);
        let bytes = serialize(&packet);
        assert!(matches!(
            deserialize(&bytes),
            Err(ParseError::InvalidPayloadShape(_))
        ));
    }

    #[test]
    fn close_payload_keeps_sub_id_field_name_literal() {
        let payload = PacketPayload::new(
            PaymentInfo {
                amount: "0".to_string(),
                currency: "msat".to_string(),
                purpose: None,
            },
            &NostrPayload::Close {
                sub_id: "s1".to_string(),
            },
            RequestMetadata {
                timestamp: 0,
                sender: "peer".to_string(),
                ttl: None,
            },
        );
        assert_eq!(payload.nostr.get("subId").and_then(|v| v.as_str()), Some("s1"));
        assert!(payload.nostr.get("subscriptionId").is_none());
    }
}
