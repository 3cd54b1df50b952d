use crate::settlement::{ConnectionState, SettlementClient};
use nostr_types::{NostrEvent, PaymentClaim};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// `{event, claim, queued_at}` (spec.md §3). Queued while the settlement
/// link is down; replayed once it recovers.
#[derive(Debug, Clone)]
pub struct VerificationQueueEntry {
    pub event: NostrEvent,
    pub claim: PaymentClaim,
    pub queued_at: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DrainOutcome {
    pub valid: u32,
    pub invalid: u32,
}

/// Bounded FIFO plus a degraded flag (spec.md §4.9). The flag is a plain
/// atomic bool since it's read on every packet's hot path; the queue itself
/// is mutex-guarded since mutation always pairs a push/pop with a length
/// check.
pub struct DegradedModeController {
    degraded: AtomicBool,
    queue: Mutex<VecDeque<VerificationQueueEntry>>,
    max_queue: usize,
    drain_batch_size: usize,
    drain_concurrency: usize,
    dropped_total: std::sync::atomic::AtomicU64,
}

impl DegradedModeController {
    pub fn new(max_queue: usize, drain_batch_size: usize, drain_concurrency: usize) -> Self {
        Self {
            degraded: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            max_queue,
            drain_batch_size,
            drain_concurrency,
            dropped_total: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn enter(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    fn exit(&self) {
        self.degraded.store(false, Ordering::Release);
    }

    /// Enqueues a claim observed while degraded. Drops the oldest entry on
    /// overflow and counts the drop (spec.md §4.9).
    pub async fn enqueue(&self, entry: VerificationQueueEntry) {
        let mut queue = self.queue.lock().await;
        if queue.len() == self.max_queue {
            queue.pop_front();
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(max_queue = self.max_queue, "degraded-mode queue overflow, dropped oldest entry");
        }
        queue.push_back(entry);
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Drains the queue in batches, verifying up to `drain_concurrency`
    /// claims concurrently per batch. If the settlement client disconnects
    /// mid-drain, re-enters degraded mode and stops (spec.md §4.9).
    async fn drain(&self, settlement: &SettlementClient) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        loop {
            if settlement.state() != ConnectionState::Connected {
                self.enter();
                return outcome;
            }

            let batch: Vec<VerificationQueueEntry> = {
                let mut queue = self.queue.lock().await;
                let n = self.drain_batch_size.min(queue.len());
                queue.drain(..n).collect()
            };
            if batch.is_empty() {
                return outcome;
            }

            for chunk in batch.chunks(self.drain_concurrency.max(1)) {
                let results = futures::future::join_all(
                    chunk.iter().map(|entry| settlement.verify_claim(entry.claim.clone())),
                )
                .await;
                for result in results {
                    if result.valid {
                        outcome.valid += 1;
                    } else {
                        outcome.invalid += 1;
                    }
                }
            }
        }
    }

    /// Watches `settlement`'s connection state and drives degraded-mode
    /// transitions: enters on `Disconnected`/`Reconnecting`, drains and
    /// exits on `Connected`. Runs until the settlement client is dropped.
    pub async fn run(self: Arc<Self>, settlement: Arc<SettlementClient>) {
        let mut states = settlement.state_changes();
        loop {
            let state = *states.borrow();
            match state {
                ConnectionState::Connected => {
                    if self.is_degraded() {
                        self.drain(&settlement).await;
                        if settlement.state() == ConnectionState::Connected {
                            self.exit();
                        }
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                    self.enter();
                }
                ConnectionState::Connecting => {}
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_types::Currency;

    fn entry(queued_at: i64) -> VerificationQueueEntry {
        VerificationQueueEntry {
            event: NostrEvent {
                id: nostr_types::EventId([1u8; 32]),
                pubkey: nostr_types::PubKey([2u8; 32]),
                created_at: 0,
                kind: 1,
                tags: vec![],
                content: String::new(),
                sig: nostr_types::Signature([0u8; 64]),
            },
            claim: PaymentClaim {
                channel_id: "chan".to_string(),
                amount_sats: 10,
                nonce: 1,
                signature: "deadbeefdeadbeefdeadbeef".to_string(),
                currency: Currency::Btc,
            },
            queued_at,
        }
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let controller = DegradedModeController::new(2, 100, 10);
        controller.enqueue(entry(1)).await;
        controller.enqueue(entry(2)).await;
        controller.enqueue(entry(3)).await;
        assert_eq!(controller.queue_len().await, 2);
        assert_eq!(controller.dropped_total(), 1);
    }

    #[tokio::test]
    async fn starts_not_degraded() {
        let controller = DegradedModeController::new(10, 100, 10);
        assert!(!controller.is_degraded());
    }
}
