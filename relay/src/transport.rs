//! Binary BTP-NIPs transport (spec.md §6): a raw `TcpListener`, one task per
//! connection, framed with the 4-byte header [`crate::packet::detect`]
//! checks for before handing a complete frame to
//! [`crate::packet::deserialize`].

use crate::dispatch::{Dispatcher, IlpContext};
use crate::fanout::OutboundDelivery;
use crate::packet;
use crate::state::RelayState;
use nostr_types::{MessageType, NostrPayload, Packet, PacketPayload, PaymentInfo, RequestMetadata};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Accepts connections until the listener itself errors out (caller is
/// expected to run this inside its own task and race it against shutdown).
pub async fn serve(listener: TcpListener, state: Arc<RelayState>, dispatcher: Arc<Dispatcher>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "btp-nips accept failed");
                continue;
            }
        };
        let state = state.clone();
        let dispatcher = dispatcher.clone();
        let peer = addr.to_string();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer.clone(), state, dispatcher).await {
                tracing::debug!(error = %err, peer, "btp-nips connection ended");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: String,
    state: Arc<RelayState>,
    dispatcher: Arc<Dispatcher>,
) -> std::io::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<OutboundDelivery>();
    state.peers.register(peer.clone(), delivery_tx);

    let writer = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let forward_tx = out_tx.clone();
    let delivery_forwarder = tokio::spawn(async move {
        while let Some(delivery) = delivery_rx.recv().await {
            let bytes = packet::serialize(&delivery_packet(delivery));
            if forward_tx.send(bytes).is_err() {
                break;
            }
        }
    });

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let read_result = loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some(frame_len) = next_frame_len(&buf) {
            let frame: Vec<u8> = buf.drain(..frame_len).collect();
            match packet::deserialize(&frame) {
                Ok(request) => {
                    if let Some(response) = dispatch_one(request, &peer, &state, &dispatcher).await {
                        if out_tx.send(packet::serialize(&response)).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, peer = %peer, "dropping malformed btp-nips frame");
                }
            }
        }
    };

    state.peers.unregister(&peer);
    writer.abort();
    delivery_forwarder.abort();
    read_result
}

/// `None` until `buf` holds a complete frame per the 4-byte header's
/// declared length; `Some(len)` is that frame's total byte length.
fn next_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total = 4 + declared;
    (buf.len() >= total).then_some(total)
}

async fn dispatch_one(
    request: Packet,
    peer: &str,
    state: &Arc<RelayState>,
    dispatcher: &Arc<Dispatcher>,
) -> Option<Packet> {
    let ctx = IlpContext {
        sender: peer.to_string(),
        timestamp: request.payload.metadata.timestamp,
        ttl: request.payload.metadata.ttl,
        requested_sub_id: None,
    };
    let payload = match dispatcher.route(request, ctx, state).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return None,
        Err(err) => {
            tracing::error!(error = %err, peer, "dispatch error");
            NostrPayload::Notice {
                message: format!("error: {err}"),
            }
        }
    };
    Some(response_packet(payload))
}

fn response_packet(payload: NostrPayload) -> Packet {
    let message_type = match &payload {
        NostrPayload::Ok { .. } => MessageType::Ok,
        NostrPayload::Eose { .. } => MessageType::Eose,
        NostrPayload::Notice { .. } => MessageType::Notice,
        NostrPayload::Event(_) | NostrPayload::EventDelivery { .. } => MessageType::Event,
        NostrPayload::Req(_) => MessageType::Req,
        NostrPayload::Close { .. } => MessageType::Close,
        NostrPayload::Auth(_) => MessageType::Auth,
    };
    Packet::new(message_type, relay_payload(&payload))
}

fn delivery_packet(delivery: OutboundDelivery) -> Packet {
    let payload = NostrPayload::EventDelivery {
        sub_id: delivery.sub_id,
        event: Box::new(delivery.event),
    };
    Packet::new(MessageType::Event, relay_payload(&payload))
}

fn relay_payload(payload: &NostrPayload) -> PacketPayload {
    PacketPayload::new(
        PaymentInfo {
            amount: "0".to_string(),
            currency: "msat".to_string(),
            purpose: None,
        },
        payload,
        RequestMetadata {
            timestamp: 0,
            sender: "relay".to_string(),
            ttl: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_frame_len_waits_for_full_frame() {
        let mut buf = vec![1, 1, 0, 5];
        assert_eq!(next_frame_len(&buf), None);
        buf.extend_from_slice(b"hello");
        assert_eq!(next_frame_len(&buf), Some(9));
    }

    #[test]
    fn next_frame_len_none_on_short_header() {
        assert_eq!(next_frame_len(&[1, 1]), None);
    }
}
