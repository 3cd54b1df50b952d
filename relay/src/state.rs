use crate::claim::ClaimCache;
use crate::config::Settings;
use crate::degraded::DegradedModeController;
use crate::fanout::{FanoutScheduler, PeerRegistry};
use crate::freetier::FreeTierTracker;
use crate::metrics::ErrorTracker;
use crate::pricing::PricingPolicy;
use crate::ratelimit::RateLimiter;
use crate::settlement::SettlementClient;
use crate::store::EventStore;
use crate::subscription::SubscriptionRegistry;
use std::sync::Arc;

/// Everything a handler needs to act on a packet, wired once at startup and
/// shared (via `Arc`) across every connection task.
pub struct RelayState {
    pub store: Arc<dyn EventStore>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub error_tracker: Arc<ErrorTracker>,
    pub claim_cache: Arc<ClaimCache>,
    pub settlement: Arc<SettlementClient>,
    pub degraded: Arc<DegradedModeController>,
    pub free_tier: FreeTierTracker,
    pub pricing: PricingPolicy,
    pub peers: Arc<PeerRegistry>,
    pub fanout: Arc<FanoutScheduler>,
    pub settings: Arc<Settings>,
}
