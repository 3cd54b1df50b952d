use dashmap::DashMap;
use nostr_types::{NostrEvent, PaymentClaim};
use settlement_proto::VerifyClaimResult;

/// Extracts the payment claim from an event's tags, if any (spec.md §4.7).
/// A thin wrapper over the pure parser in `nostr-types`; kept here so the
/// relay-side cache and the parser are reached through a single seam.
pub fn extract(event: &NostrEvent) -> Option<PaymentClaim> {
    PaymentClaim::parse_from_tags(&event.tags)
}

/// Memoizes settlement verification results by the claim's signature, so a
/// claim replayed across multiple events (or redelivered after a transient
/// disconnect) doesn't pay for a second round trip to the settlement
/// service (spec.md §4.7).
#[derive(Default)]
pub struct ClaimCache {
    verified: DashMap<String, VerifyClaimResult>,
}

impl ClaimCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, claim: &PaymentClaim) -> Option<VerifyClaimResult> {
        self.verified.get(&claim.signature).map(|v| v.clone())
    }

    pub fn put(&self, claim: &PaymentClaim, result: VerifyClaimResult) {
        self.verified.insert(claim.signature.clone(), result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_types::Currency;

    fn claim() -> PaymentClaim {
        PaymentClaim {
            channel_id: "chan-1".to_string(),
            amount_sats: 100,
            nonce: 1,
            signature: "deadbeefdeadbeefdeadbeef".to_string(),
            currency: Currency::Btc,
        }
    }

    #[test]
    fn cache_round_trips_a_verification_result() {
        let cache = ClaimCache::new();
        let c = claim();
        assert!(cache.get(&c).is_none());
        cache.put(&c, VerifyClaimResult { valid: true, error: None });
        assert_eq!(cache.get(&c), Some(VerifyClaimResult { valid: true, error: None }));
    }
}
