use crate::dispatch::{Handler, IlpContext};
use crate::fanout::OutboundDelivery;
use crate::metrics::ErrorKind;
use crate::state::RelayState;
use crate::store::StoreOutcome;
use async_trait::async_trait;
use nostr_types::{MessageType, NostrEvent, NostrFilter, NostrPayload, Packet};

/// `EVENT` handler (spec.md §4.12).
pub struct EventHandler;

#[async_trait]
impl Handler for EventHandler {
    fn message_type(&self) -> MessageType {
        MessageType::Event
    }

    async fn handle(&self, packet: &Packet, ctx: &IlpContext, state: &RelayState) -> Option<NostrPayload> {
        let event: NostrEvent = match serde_json::from_value(packet.payload.nostr.clone()) {
            Ok(event) => event,
            Err(_) => {
                let may_respond = state.error_tracker.handle(ErrorKind::InvalidPacket, &ctx.sender, "malformed event");
                return may_respond.then(|| NostrPayload::Ok {
                    event_id: String::new(),
                    accepted: false,
                    message: "invalid: malformed event".to_string(),
                });
            }
        };
        let event_id_hex = event.id.to_hex();

        if state.settings.verify_signatures && !event.verify() {
            let may_respond = state.error_tracker.handle(
                ErrorKind::SignatureVerificationFailed,
                &ctx.sender,
                "event signature verification failed",
            );
            return may_respond.then(|| NostrPayload::Ok {
                event_id: event_id_hex,
                accepted: false,
                message: "invalid: signature verification failed".to_string(),
            });
        }

        match state.store.exists(&event.id).await {
            Ok(true) => {
                let may_respond =
                    state.error_tracker.handle(ErrorKind::DuplicateEvent, &ctx.sender, "duplicate event");
                return may_respond.then(|| NostrPayload::Ok {
                    event_id: event_id_hex,
                    accepted: false,
                    message: "duplicate: event already exists".to_string(),
                });
            }
            Ok(false) => {}
            Err(err) => {
                let may_respond =
                    state.error_tracker.handle(ErrorKind::StorageError, &ctx.sender, "exists check failed");
                return may_respond.then(|| NostrPayload::Ok {
                    event_id: event_id_hex,
                    accepted: false,
                    message: format!("error: {err}"),
                });
            }
        }

        match state.store.store(event.clone(), ctx.sender.clone(), ctx.timestamp).await {
            Ok(StoreOutcome::Duplicate) => {
                let may_respond =
                    state.error_tracker.handle(ErrorKind::DuplicateEvent, &ctx.sender, "duplicate event");
                may_respond.then(|| NostrPayload::Ok {
                    event_id: event_id_hex,
                    accepted: false,
                    message: "duplicate: event already exists".to_string(),
                })
            }
            Ok(StoreOutcome::Inserted) => {
                state.fanout.dispatch(&event);
                Some(NostrPayload::Ok {
                    event_id: event_id_hex,
                    accepted: true,
                    message: String::new(),
                })
            }
            Err(err) => {
                let may_respond =
                    state.error_tracker.handle(ErrorKind::StorageError, &ctx.sender, "store failed");
                may_respond.then(|| NostrPayload::Ok {
                    event_id: event_id_hex,
                    accepted: false,
                    message: format!("error: {err}"),
                })
            }
        }
    }
}

/// `REQ` handler (spec.md §4.12). Queried events are pushed onto the
/// subscriber's outbound channel ahead of the returned `EOSE`, so ordering
/// within this delivery batch is preserved by construction.
pub struct ReqHandler;

#[async_trait]
impl Handler for ReqHandler {
    fn message_type(&self) -> MessageType {
        MessageType::Req
    }

    async fn handle(&self, packet: &Packet, ctx: &IlpContext, state: &RelayState) -> Option<NostrPayload> {
        let filters: Vec<NostrFilter> = match serde_json::from_value(packet.payload.nostr.clone()) {
            Ok(filters) => filters,
            Err(_) => {
                let may_respond =
                    state.error_tracker.handle(ErrorKind::MalformedFilter, &ctx.sender, "malformed REQ filters");
                return may_respond.then(|| NostrPayload::Notice {
                    message: "invalid: REQ requires at least one filter".to_string(),
                });
            }
        };
        if filters.is_empty() {
            let may_respond =
                state.error_tracker.handle(ErrorKind::MalformedFilter, &ctx.sender, "empty REQ filter array");
            return may_respond.then(|| NostrPayload::Notice {
                message: "invalid: REQ requires at least one filter".to_string(),
            });
        }
        for filter in &filters {
            if let Err(reason) = filter.validate() {
                let may_respond = state.error_tracker.handle(ErrorKind::MalformedFilter, &ctx.sender, &reason);
                return may_respond.then(|| NostrPayload::Notice {
                    message: format!("invalid: {reason}"),
                });
            }
        }

        let sub_id = ctx
            .requested_sub_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let ttl_secs = packet
            .payload
            .metadata
            .ttl
            .unwrap_or_else(|| state.settings.subscription_default_ttl.as_secs() as i64);
        let max_ttl_secs = state.settings.subscription_max_ttl.as_secs() as i64;

        if let Err(reason) = state.subscriptions.register(
            sub_id.clone(),
            ctx.sender.clone(),
            filters.clone(),
            ttl_secs,
            max_ttl_secs,
            ctx.timestamp,
        ) {
            let may_respond =
                state
                    .error_tracker
                    .handle(ErrorKind::MalformedFilter, &ctx.sender, &reason.to_string());
            return may_respond.then(|| NostrPayload::Notice {
                message: format!("invalid: {reason}"),
            });
        }

        match state.store.query(&filters, ctx.timestamp).await {
            Ok(events) => {
                for event in events {
                    state.peers.send(
                        &ctx.sender,
                        OutboundDelivery {
                            sub_id: sub_id.clone(),
                            event,
                        },
                    );
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "REQ query failed");
            }
        }

        Some(NostrPayload::Eose { sub_id })
    }
}

/// `CLOSE` handler (spec.md §4.12). Idempotent: unregistering an absent
/// subscription is not an error.
pub struct CloseHandler;

#[async_trait]
impl Handler for CloseHandler {
    fn message_type(&self) -> MessageType {
        MessageType::Close
    }

    async fn handle(&self, packet: &Packet, ctx: &IlpContext, state: &RelayState) -> Option<NostrPayload> {
        #[derive(serde::Deserialize)]
        struct CloseBody {
            #[serde(rename = "subId")]
            sub_id: String,
        }
        let Ok(body) = serde_json::from_value::<CloseBody>(packet.payload.nostr.clone()) else {
            let may_respond =
                state.error_tracker.handle(ErrorKind::InvalidPacket, &ctx.sender, "malformed CLOSE payload");
            return may_respond.then(|| NostrPayload::Notice {
                message: "invalid: malformed CLOSE payload".to_string(),
            });
        };
        if body.sub_id.is_empty() {
            let may_respond =
                state.error_tracker.handle(ErrorKind::InvalidPacket, &ctx.sender, "empty CLOSE subId");
            return may_respond.then(|| NostrPayload::Notice {
                message: "invalid: subId must not be empty".to_string(),
            });
        }

        state.subscriptions.unregister(&body.sub_id, &ctx.sender);
        Some(NostrPayload::Eose { sub_id: body.sub_id })
    }
}
