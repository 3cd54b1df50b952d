use crate::ratelimit::RateLimiter;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::fmt;

/// Closed set of error kinds the relay can classify (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidPacket,
    SignatureVerificationFailed,
    DuplicateEvent,
    StorageError,
    MalformedFilter,
    SubscriptionNotFound,
    RateLimited,
    UnknownError,
}

impl ErrorKind {
    fn as_label(self) -> &'static str {
        match self {
            ErrorKind::InvalidPacket => "invalid_packet",
            ErrorKind::SignatureVerificationFailed => "signature_verification_failed",
            ErrorKind::DuplicateEvent => "duplicate_event",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::MalformedFilter => "malformed_filter",
            ErrorKind::SubscriptionNotFound => "subscription_not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Classifies failures, counts them per `(kind, peer)`, and throttles how
/// often an error response is actually emitted back to a misbehaving peer
/// (spec.md §4.6). Counting happens unconditionally; throttling only gates
/// whether the caller is told it may reply.
pub struct ErrorTracker {
    by_kind_peer: IntCounterVec,
    total_errors: IntCounter,
    response_limiter: RateLimiter,
}

impl ErrorTracker {
    pub fn new(registry: &Registry, error_bucket_capacity: f64) -> Self {
        let by_kind_peer = IntCounterVec::new(
            Opts::new("relay_errors_total", "errors observed, by kind and peer"),
            &["kind", "peer"],
        )
        .expect("static metric options are always valid");
        let total_errors = IntCounter::new("relay_errors_grand_total", "all errors observed")
            .expect("static metric options are always valid");

        registry
            .register(Box::new(by_kind_peer.clone()))
            .expect("metric registered exactly once");
        registry
            .register(Box::new(total_errors.clone()))
            .expect("metric registered exactly once");

        Self {
            by_kind_peer,
            total_errors,
            response_limiter: RateLimiter::new(error_bucket_capacity, error_bucket_capacity),
        }
    }

    /// Records the error and decides whether an error response may still be
    /// sent to `peer`. Returns `false` when the error-response bucket for
    /// this peer is exhausted; callers must then count the throttle itself
    /// as a `RateLimited` occurrence and drop the outbound response.
    pub fn handle(&self, kind: ErrorKind, peer: &str, context: &str) -> bool {
        tracing::warn!(kind = %kind, peer, context, "handler error");
        self.by_kind_peer.with_label_values(&[kind.as_label(), peer]).inc();
        self.total_errors.inc();

        if self.response_limiter.try_consume(peer) {
            true
        } else {
            self.by_kind_peer
                .with_label_values(&[ErrorKind::RateLimited.as_label(), peer])
                .inc();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_allows_responses_within_bucket_capacity() {
        let registry = Registry::new();
        let tracker = ErrorTracker::new(&registry, 2.0);
        assert!(tracker.handle(ErrorKind::InvalidPacket, "peer", "bad header"));
        assert!(tracker.handle(ErrorKind::InvalidPacket, "peer", "bad header"));
        assert!(!tracker.handle(ErrorKind::InvalidPacket, "peer", "bad header"));
    }

    #[test]
    fn handle_counts_persist_even_when_throttled() {
        let registry = Registry::new();
        let tracker = ErrorTracker::new(&registry, 1.0);
        tracker.handle(ErrorKind::StorageError, "peer", "ctx");
        tracker.handle(ErrorKind::StorageError, "peer", "ctx");
        let metric = tracker
            .by_kind_peer
            .with_label_values(&[ErrorKind::StorageError.as_label(), "peer"]);
        assert_eq!(metric.get(), 2);
    }
}
