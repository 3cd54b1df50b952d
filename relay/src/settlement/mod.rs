use crate::config::SettlementConfig;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use nostr_types::PaymentClaim;
use rand::Rng;
use settlement_proto::{
    AccountBalance, GetBalanceParams, RoutingStats, RpcError, RpcId, RpcRequest, RpcResponse,
    SubscriptionData, SubscriptionParams, VerifyClaimParams, VerifyClaimResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Connection state of the persistent settlement link (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("settlement connection is down")]
    ConnectionError,
    #[error("request timed out")]
    Timeout,
    #[error("settlement RPC error on {method}: {source:?}")]
    RpcError { method: String, source: RpcError },
    #[error("settlement-payment endpoints are disabled")]
    FeatureDisabled,
}

type PendingTable = Arc<DashMap<RpcId, oneshot::Sender<RpcResponse>>>;

/// Persistent JSON-RPC client over a single outbound WebSocket connection
/// (spec.md §4.8). A background task owns the socket; callers interact
/// through channels and a pending-request table, so `call` can be awaited
/// from any task without touching the socket directly.
pub struct SettlementClient {
    config: SettlementConfig,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingTable,
    next_id: AtomicU64,
    state_rx: watch::Receiver<ConnectionState>,
    subscriptions: Arc<DashMap<String, mpsc::UnboundedSender<SubscriptionData>>>,
}

impl SettlementClient {
    /// Spawns the background connection task and returns a handle. The
    /// handle can be cloned-by-reference (`Arc`'d by the caller) across the
    /// whole relay.
    pub fn connect(config: SettlementConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let pending: PendingTable = Arc::new(DashMap::new());
        let subscriptions: Arc<DashMap<String, mpsc::UnboundedSender<SubscriptionData>>> =
            Arc::new(DashMap::new());

        let task_config = config.clone();
        let task_pending = pending.clone();
        let task_subscriptions = subscriptions.clone();
        tokio::spawn(run(task_config, outbound_rx, task_pending, task_subscriptions, state_tx));

        Self {
            config,
            outbound: outbound_tx,
            pending,
            next_id: AtomicU64::new(1),
            state_rx,
            subscriptions,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver the Degraded-Mode Controller watches for `connected` /
    /// `disconnected` transitions (spec.md §4.9).
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, SettlementError> {
        let mut attempt = 0;
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries => {
                    tracing::warn!(method, attempt, error = %err, "settlement RPC call failed, retrying");
                    attempt += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, SettlementError> {
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = RpcRequest::new(id.clone(), method.to_string(), params);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let frame = serde_json::to_string(&request).expect("RpcRequest always serializes");
        if self.outbound.send(Message::Text(frame)).is_err() {
            self.pending.remove(&id);
            return Err(SettlementError::ConnectionError);
        }

        let response = timeout(self.config.request_timeout, rx).await.map_err(|_| {
            self.pending.remove(&id);
            SettlementError::Timeout
        })?;
        let response = response.map_err(|_| SettlementError::ConnectionError)?;

        match response.error {
            Some(err) => Err(SettlementError::RpcError {
                method: method.to_string(),
                source: err,
            }),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        }
    }

    pub async fn get_balance(&self, account_path: String) -> Result<AccountBalance, SettlementError> {
        let params = GetBalanceParams { account_path };
        let value = self
            .call(
                "ledger.getBalance",
                serde_json::to_value(&params).expect("GetBalanceParams always serializes"),
            )
            .await?;
        serde_json::from_value(value).map_err(|_| SettlementError::ConnectionError)
    }

    /// Verifies a payment claim. Returns the feature-gated canned response
    /// without a network round trip when payments are disabled (spec.md
    /// §4.8), verified against the shorter verification timeout rather than
    /// the default RPC timeout.
    pub async fn verify_claim(&self, claim: PaymentClaim) -> VerifyClaimResult {
        if !self.config.payments_enabled {
            return VerifyClaimResult::unavailable();
        }
        let params = VerifyClaimParams { claim };
        let call = self.call(
            "payment.verifyPaymentClaim",
            serde_json::to_value(&params).expect("VerifyClaimParams always serializes"),
        );
        match timeout(self.config.verification_timeout, call).await {
            Ok(Ok(value)) => serde_json::from_value(value).unwrap_or_else(|_| VerifyClaimResult {
                valid: false,
                error: Some("malformed verification response".to_string()),
            }),
            Ok(Err(err)) => VerifyClaimResult {
                valid: false,
                error: Some(err.to_string()),
            },
            Err(_) => VerifyClaimResult {
                valid: false,
                error: Some("timeout".to_string()),
            },
        }
    }

    pub async fn convert_to_akt(&self, channel_id: String, amount: rust_decimal::Decimal) -> Result<serde_json::Value, SettlementError> {
        if !self.config.payments_enabled {
            return Err(SettlementError::FeatureDisabled);
        }
        let params = settlement_proto::ConvertToAktParams { channel_id, amount };
        self.call(
            "payment.convertToAKT",
            serde_json::to_value(&params).expect("ConvertToAktParams always serializes"),
        )
        .await
    }

    pub async fn claim_all_channels(&self) -> Result<serde_json::Value, SettlementError> {
        if !self.config.payments_enabled {
            return Err(SettlementError::FeatureDisabled);
        }
        self.call("payment.claimAllChannels", serde_json::Value::Null).await
    }

    pub async fn routing_stats(&self) -> Result<RoutingStats, SettlementError> {
        if !self.config.payments_enabled {
            return Err(SettlementError::FeatureDisabled);
        }
        let value = self.call("payment.getRoutingStats", serde_json::Value::Null).await?;
        serde_json::from_value(value).map_err(|_| SettlementError::ConnectionError)
    }

    /// Registers a callback channel for `subscription` push frames matching
    /// `account_path`, then issues `ledger.subscribeToAccount` (spec.md §4.8,
    /// §6).
    pub async fn subscribe_to_account(
        &self,
        account_path: String,
    ) -> Result<mpsc::UnboundedReceiver<SubscriptionData>, SettlementError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.insert(account_path.clone(), tx);
        let params = SubscriptionParams { account_path };
        self.call(
            "ledger.subscribeToAccount",
            serde_json::to_value(&params).expect("SubscriptionParams always serializes"),
        )
        .await?;
        Ok(rx)
    }

    pub async fn unsubscribe_from_account(&self, account_path: &str) -> Result<(), SettlementError> {
        self.subscriptions.remove(account_path);
        let params = SubscriptionParams {
            account_path: account_path.to_string(),
        };
        self.call(
            "ledger.unsubscribeFromAccount",
            serde_json::to_value(&params).expect("SubscriptionParams always serializes"),
        )
        .await?;
        Ok(())
    }
}

/// Exponential backoff with jitter: `min(max_delay, base * 2^attempt) *
/// (1 +/- jitter_pct)` (spec.md §4.8).
fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter_pct: f64) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max.as_millis());
    let jitter_span = (capped as f64) * jitter_pct;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let millis = (capped as f64 + jitter).max(0.0) as u64;
    Duration::from_millis(millis)
}

async fn run(
    config: SettlementConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    pending: PendingTable,
    subscriptions: Arc<DashMap<String, mpsc::UnboundedSender<SubscriptionData>>>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut attempt = 0u32;
    loop {
        let _ = state_tx.send(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        match timeout(config.connect_timeout, tokio_tungstenite::connect_async(&config.url)).await {
            Ok(Ok((stream, _))) => {
                attempt = 0;
                let _ = state_tx.send(ConnectionState::Connected);
                let (mut write, mut read) = stream.split();

                loop {
                    tokio::select! {
                        incoming = read.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    handle_incoming(&text, &pending, &subscriptions);
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    tracing::warn!(error = %err, "settlement connection read error");
                                    break;
                                }
                            }
                        }
                        outgoing = outbound_rx.recv() => {
                            match outgoing {
                                Some(message) => {
                                    if let Err(err) = write.send(message).await {
                                        tracing::warn!(error = %err, "settlement connection write error");
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                    }
                }

                fail_all_pending(&pending);
                let _ = state_tx.send(ConnectionState::Disconnected);
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, attempt, "settlement connect failed");
            }
            Err(_) => {
                tracing::warn!(attempt, "settlement connect timed out");
            }
        }

        let delay = backoff_delay(attempt, config.backoff_base, config.backoff_max, config.backoff_jitter_pct);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

fn handle_incoming(
    text: &str,
    pending: &PendingTable,
    subscriptions: &Arc<DashMap<String, mpsc::UnboundedSender<SubscriptionData>>>,
) {
    if let Ok(response) = serde_json::from_str::<RpcResponse>(text) {
        if let Some((_, tx)) = pending.remove(&response.id) {
            let _ = tx.send(response);
        }
        return;
    }
    if let Ok(notification) = serde_json::from_str::<settlement_proto::RpcNotification>(text) {
        if notification.method == "subscription" {
            if let Ok(data) = serde_json::from_value::<SubscriptionData>(notification.params) {
                if let Some(tx) = subscriptions.get(&data.account_path) {
                    let _ = tx.send(data);
                }
            }
        }
    }
}

fn fail_all_pending(pending: &PendingTable) {
    let keys: Vec<RpcId> = pending.iter().map(|e| e.key().clone()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            drop(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let delay = backoff_delay(20, Duration::from_millis(100), Duration::from_secs(30), 0.0);
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn backoff_doubles_each_attempt_without_jitter() {
        let d0 = backoff_delay(0, Duration::from_millis(100), Duration::from_secs(30), 0.0);
        let d1 = backoff_delay(1, Duration::from_millis(100), Duration::from_secs(30), 0.0);
        assert_eq!(d0, Duration::from_millis(100));
        assert_eq!(d1, Duration::from_millis(200));
    }
}
