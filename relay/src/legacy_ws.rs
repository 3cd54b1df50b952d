//! Legacy WebSocket transport (spec.md §6): plain NIP-01 JSON-array framing
//! (`["EVENT", event]`, `["REQ", subId, filter…]`, `["CLOSE", subId]`) whose
//! events carry an inline `["payment","ilp", …]` claim tag instead of a
//! separate payment envelope. Routed through the same [`Dispatcher`] as the
//! binary transport; only the framing on the wire differs.

use crate::dispatch::{Dispatcher, IlpContext};
use crate::fanout::OutboundDelivery;
use crate::state::RelayState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use nostr_types::{MessageType, NostrPayload, Packet, PacketPayload, PaymentInfo, RequestMetadata};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

#[derive(Clone)]
struct LegacyWsState {
    relay: Arc<RelayState>,
    dispatcher: Arc<Dispatcher>,
}

pub fn router(relay: Arc<RelayState>, dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .with_state(LegacyWsState { relay, dispatcher })
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<LegacyWsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr.to_string(), state.relay, state.dispatcher))
}

async fn handle_socket(socket: WebSocket, peer: String, state: Arc<RelayState>, dispatcher: Arc<Dispatcher>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<OutboundDelivery>();
    state.peers.register(peer.clone(), delivery_tx);

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let forward_tx = out_tx.clone();
    let delivery_forwarder = tokio::spawn(async move {
        while let Some(delivery) = delivery_rx.recv().await {
            if forward_tx.send(encode_event_delivery(&delivery)).is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let outgoing = match parse_frame(&text) {
            Ok((message_type, nostr, requested_sub_id)) => {
                let now = now_unix();
                let payload = PacketPayload {
                    payment: PaymentInfo {
                        amount: "0".to_string(),
                        currency: "sat".to_string(),
                        purpose: None,
                    },
                    nostr,
                    metadata: RequestMetadata {
                        timestamp: now,
                        sender: peer.clone(),
                        ttl: None,
                    },
                };
                let packet = Packet::new(message_type, payload);
                let ctx = IlpContext {
                    sender: peer.clone(),
                    timestamp: now,
                    ttl: None,
                    requested_sub_id,
                };
                match dispatcher.route(packet, ctx, &state).await {
                    Ok(Some(response)) => Some(encode_response(&response)),
                    Ok(None) => None,
                    Err(err) => Some(encode_notice(&format!("error: {err}"))),
                }
            }
            Err(reason) => Some(encode_notice(&format!("invalid: {reason}"))),
        };

        let Some(outgoing) = outgoing else { continue };
        if out_tx.send(outgoing).is_err() {
            break;
        }
    }

    state.peers.unregister(&peer);
    writer.abort();
    delivery_forwarder.abort();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parses one NIP-01 frame into `(message_type, nostr payload value,
/// caller-supplied sub id)`. Unsupported client-originated command names
/// (`AUTH` submissions aside) are reported as a parse error rather than
/// silently dropped.
fn parse_frame(text: &str) -> Result<(MessageType, serde_json::Value, Option<String>), String> {
    let frame: Vec<serde_json::Value> =
        serde_json::from_str(text).map_err(|e| format!("malformed JSON array: {e}"))?;
    let command = frame
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing command name".to_string())?;

    match command {
        "EVENT" => {
            let event = frame.get(1).cloned().ok_or("EVENT requires an event object")?;
            Ok((MessageType::Event, event, None))
        }
        "REQ" => {
            let sub_id = frame
                .get(1)
                .and_then(|v| v.as_str())
                .ok_or("REQ requires a subscription id")?
                .to_string();
            let filters: Vec<serde_json::Value> = frame.into_iter().skip(2).collect();
            Ok((MessageType::Req, serde_json::Value::Array(filters), Some(sub_id)))
        }
        "CLOSE" => {
            let sub_id = frame
                .get(1)
                .and_then(|v| v.as_str())
                .ok_or("CLOSE requires a subscription id")?
                .to_string();
            Ok((
                MessageType::Close,
                serde_json::json!({ "subId": sub_id }),
                None,
            ))
        }
        other => Err(format!("unsupported command: {other}")),
    }
}

fn encode_response(payload: &NostrPayload) -> String {
    let array = match payload {
        NostrPayload::Ok { event_id, accepted, message } => {
            serde_json::json!(["OK", event_id, accepted, message])
        }
        NostrPayload::Eose { sub_id } => serde_json::json!(["EOSE", sub_id]),
        NostrPayload::Notice { message } => serde_json::json!(["NOTICE", message]),
        NostrPayload::EventDelivery { sub_id, event } => serde_json::json!(["EVENT", sub_id, event]),
        NostrPayload::Event(event) => serde_json::json!(["EVENT", event]),
        NostrPayload::Close { sub_id } => serde_json::json!(["CLOSE", sub_id]),
        NostrPayload::Req(filters) => serde_json::json!(["REQ", filters]),
        NostrPayload::Auth(event) => serde_json::json!(["AUTH", event]),
    };
    array.to_string()
}

fn encode_event_delivery(delivery: &OutboundDelivery) -> String {
    serde_json::json!(["EVENT", delivery.sub_id, delivery.event]).to_string()
}

fn encode_notice(message: &str) -> String {
    serde_json::json!(["NOTICE", message]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_frame() {
        let (message_type, nostr, sub_id) = parse_frame(r#"["EVENT", {"id":"a"}]"#).unwrap();
        assert_eq!(message_type, MessageType::Event);
        assert_eq!(nostr.get("id").and_then(|v| v.as_str()), Some("a"));
        assert!(sub_id.is_none());
    }

    #[test]
    fn parses_req_frame_with_caller_sub_id() {
        let (message_type, nostr, sub_id) = parse_frame(r#"["REQ", "sub-1", {"kinds":[1]}]"#).unwrap();
        assert_eq!(message_type, MessageType::Req);
        assert_eq!(sub_id, Some("sub-1".to_string()));
        assert!(nostr.is_array());
    }

    #[test]
    fn parses_close_frame() {
        let (message_type, nostr, _) = parse_frame(r#"["CLOSE", "sub-1"]"#).unwrap();
        assert_eq!(message_type, MessageType::Close);
        assert_eq!(nostr.get("subId").and_then(|v| v.as_str()), Some("sub-1"));
    }

    #[test]
    fn rejects_unsupported_command() {
        assert!(parse_frame(r#"["AUTH", {}]"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_frame("not json").is_err());
    }
}
