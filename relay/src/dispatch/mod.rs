use crate::claim;
use crate::degraded::VerificationQueueEntry;
use crate::metrics::ErrorKind;
use crate::pricing::Operation;
use crate::state::RelayState;
use async_trait::async_trait;
use nostr_types::{MessageType, NostrPayload, Packet};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-packet sender context, carried from the transport layer (binary
/// socket peer address or legacy WS connection id) down into handlers.
#[derive(Debug, Clone)]
pub struct IlpContext {
    pub sender: String,
    pub timestamp: i64,
    pub ttl: Option<i64>,
    /// A caller-supplied subscription id, when the transport has one to
    /// offer (the legacy `["REQ", subId, …]` framing does; the binary
    /// REQ payload is a bare filter array and never sets this).
    pub requested_sub_id: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a handler is already registered for {0:?}")]
    DuplicateHandler(MessageType),
    #[error("no handler registered for {0:?}")]
    NoHandler(MessageType),
}

/// A type-specific packet handler (spec.md §4.11). Implementations must not
/// block the dispatcher's task — suspend only at genuine I/O points. `None`
/// means the error-response throttle (C6) denied this peer a reply; the
/// packet must still be dropped silently rather than left unanswered.
#[async_trait]
pub trait Handler: Send + Sync {
    fn message_type(&self) -> MessageType;
    async fn handle(&self, packet: &Packet, ctx: &IlpContext, state: &RelayState) -> Option<NostrPayload>;
}

/// Routes decoded packets to the handler registered for their type,
/// enforcing the dispatch contract ahead of the handler itself: rate limit,
/// then free-tier/payment verification for EVENT (spec.md §4.12 preamble).
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<(), DispatchError> {
        let message_type = handler.message_type();
        if self.handlers.contains_key(&message_type) {
            return Err(DispatchError::DuplicateHandler(message_type));
        }
        self.handlers.insert(message_type, handler);
        Ok(())
    }

    pub async fn route(
        &self,
        packet: Packet,
        ctx: IlpContext,
        state: &RelayState,
    ) -> Result<Option<NostrPayload>, DispatchError> {
        let handler = self
            .handlers
            .get(&packet.message_type)
            .ok_or(DispatchError::NoHandler(packet.message_type))?
            .clone();

        if !state.rate_limiter.try_consume(&ctx.sender) {
            let may_respond =
                state
                    .error_tracker
                    .handle(ErrorKind::RateLimited, &ctx.sender, "rate limit exceeded");
            return Ok(may_respond.then(|| NostrPayload::Notice {
                message: "rate-limited: slow down".to_string(),
            }));
        }

        if packet.message_type == MessageType::Event {
            match payment_gate(&packet, &ctx, state).await {
                GateOutcome::Deny(response) => return Ok(response),
                GateOutcome::Proceed => {}
            }
        }

        Ok(handler.handle(&packet, &ctx, state).await)
    }
}

/// Outcome of the payment gate: either the EVENT proceeds to its handler, or
/// it is denied with (at most) one NOTICE — `Deny(None)` means C6's
/// error-response throttle suppressed the reply.
enum GateOutcome {
    Proceed,
    Deny(Option<NostrPayload>),
}

/// Free-tier bypass, else claim extraction + pricing + verification with
/// degraded-mode fallback, ahead of the EVENT handler (spec.md §4.12
/// preamble, §4.9, §4.14).
async fn payment_gate(packet: &Packet, ctx: &IlpContext, state: &RelayState) -> GateOutcome {
    let Ok(event) = serde_json::from_value::<nostr_types::NostrEvent>(packet.payload.nostr.clone()) else {
        return GateOutcome::Proceed;
    };

    let status = state.free_tier.check(&event.pubkey.to_hex());
    if status.eligible {
        if !status.whitelisted {
            state.free_tier.increment(event.pubkey.to_hex());
        }
        return GateOutcome::Proceed;
    }

    let Some(claim) = claim::extract(&event) else {
        return GateOutcome::Proceed;
    };

    if state.degraded.is_degraded() {
        state
            .degraded
            .enqueue(VerificationQueueEntry {
                event: event.clone(),
                claim,
                queued_at: ctx.timestamp,
            })
            .await;
        return GateOutcome::Proceed;
    }

    let result = match state.claim_cache.get(&claim) {
        Some(cached) => cached,
        None => {
            let verified = state.settlement.verify_claim(claim.clone()).await;
            state.claim_cache.put(&claim, verified.clone());
            verified
        }
    };

    if !result.valid {
        let may_respond = state.error_tracker.handle(
            ErrorKind::SignatureVerificationFailed,
            &ctx.sender,
            "invalid payment claim signature",
        );
        return GateOutcome::Deny(may_respond.then(|| NostrPayload::Notice {
            message: "restricted: invalid payment signature".to_string(),
        }));
    }

    state.rate_limiter.set_capacity(&ctx.sender, claim.amount_sats as f64);

    let required = state.pricing.required_amount(Operation::Store, Some(event.kind));
    if claim.amount_sats < required {
        let may_respond = state.error_tracker.handle(
            ErrorKind::UnknownError,
            &ctx.sender,
            "payment claim below required amount",
        );
        return GateOutcome::Deny(may_respond.then(|| NostrPayload::Notice {
            message: "restricted: insufficient payment".to_string(),
        }));
    }

    GateOutcome::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler(MessageType);

    #[async_trait]
    impl Handler for NoopHandler {
        fn message_type(&self) -> MessageType {
            self.0
        }
        async fn handle(&self, _packet: &Packet, _ctx: &IlpContext, _state: &RelayState) -> Option<NostrPayload> {
            Some(NostrPayload::Notice {
                message: "ok".to_string(),
            })
        }
    }

    #[test]
    fn register_rejects_duplicate_handler_for_same_type() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(NoopHandler(MessageType::Close))).unwrap();
        assert_eq!(
            dispatcher.register(Arc::new(NoopHandler(MessageType::Close))),
            Err(DispatchError::DuplicateHandler(MessageType::Close))
        );
    }
}
