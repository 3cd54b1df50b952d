use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use relay::claim::ClaimCache;
use relay::config::Settings;
use relay::degraded::DegradedModeController;
use relay::dispatch::Dispatcher;
use relay::fanout::{FanoutScheduler, PeerRegistry};
use relay::freetier::FreeTierTracker;
use relay::handlers::{CloseHandler, EventHandler, ReqHandler};
use relay::metrics::ErrorTracker;
use relay::pricing::PricingPolicy;
use relay::ratelimit::RateLimiter;
use relay::settlement::SettlementClient;
use relay::store::{EventStore, InMemoryEventStore, PostgresEventStore};
use relay::subscription::SubscriptionRegistry;
use relay::{legacy_ws, routes, transport, RelayState};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;
    let store = build_store().await?;
    let registry = prometheus::Registry::new();

    let state = Arc::new(build_state(settings, store, &registry));

    let degraded = state.degraded.clone();
    let settlement = state.settlement.clone();
    tokio::spawn(degraded.run(settlement));

    let subscriptions = state.subscriptions.clone();
    tokio::spawn(sweep_subscriptions(subscriptions));

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Arc::new(EventHandler))?;
    dispatcher.register(Arc::new(ReqHandler))?;
    dispatcher.register(Arc::new(CloseHandler))?;
    let dispatcher = Arc::new(dispatcher);

    let btp_addr: SocketAddr = std::env::var("BTP_NIPS_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7070".to_string())
        .parse()?;
    let btp_listener = TcpListener::bind(btp_addr).await?;
    tracing::info!(addr = %btp_addr, "btp-nips listener bound");
    let btp_task = tokio::spawn(transport::serve(btp_listener, state.clone(), dispatcher.clone()));

    let http_addr: SocketAddr = std::env::var("HTTP_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    let app = routes::router(state.clone(), registry).merge(legacy_ws::router(state.clone(), dispatcher));
    tracing::info!(addr = %http_addr, "http/legacy-ws listener bound");
    let http_task = axum::Server::bind(&http_addr).serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = http_task => {
            if let Err(err) = result {
                tracing::error!(error = %err, "http server exited with error");
            }
        }
        _ = btp_task => {
            tracing::error!("btp-nips listener task exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}

fn build_state(settings: Settings, store: Arc<dyn EventStore>, registry: &prometheus::Registry) -> RelayState {
    let settings = Arc::new(settings);
    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let peers = Arc::new(PeerRegistry::new());
    let fanout = Arc::new(FanoutScheduler::new(subscriptions.clone(), peers.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        settings.rate_limit.default_capacity,
        settings.rate_limit.base_rate,
    ));
    let error_tracker = Arc::new(ErrorTracker::new(registry, settings.rate_limit.error_bucket_capacity));
    let claim_cache = Arc::new(ClaimCache::new());
    let settlement = Arc::new(SettlementClient::connect(settings.settlement.clone()));
    let degraded = Arc::new(DegradedModeController::new(
        settings.degraded_mode.max_queue,
        settings.degraded_mode.drain_batch_size,
        settings.degraded_mode.drain_concurrency,
    ));
    let whitelist: HashSet<String> = std::env::var("PRICING_FREE_TIER_WHITELIST")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let free_tier = FreeTierTracker::new(settings.pricing.free_tier_events, whitelist);
    let pricing = PricingPolicy::new(
        settings.pricing.store_event,
        settings.pricing.deliver_event,
        settings.pricing.query,
        settings.pricing.kind_overrides.clone(),
    );

    RelayState {
        store,
        subscriptions,
        rate_limiter,
        error_tracker,
        claim_cache,
        settlement,
        degraded,
        free_tier,
        pricing,
        peers,
        fanout,
        settings,
    }
}

/// `EVENT_STORE_BACKEND=postgres` (the default) requires `DATABASE_URL`;
/// `in-memory` is for local development and this crate's own integration
/// tests.
async fn build_store() -> anyhow::Result<Arc<dyn EventStore>> {
    let backend = std::env::var("EVENT_STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string());
    match backend.as_str() {
        "in-memory" => Ok(Arc::new(InMemoryEventStore::new())),
        _ => {
            let database_url = std::env::var("DATABASE_URL")?;
            let manager = ConnectionManager::<PgConnection>::new(database_url);
            let pool: Pool<ConnectionManager<PgConnection>> =
                tokio::task::spawn_blocking(move || Pool::builder().max_size(16).build(manager)).await??;
            Ok(Arc::new(PostgresEventStore::new(pool)))
        }
    }
}

/// Periodically evicts expired subscriptions (spec.md §9: "a single
/// scheduled task per purpose").
async fn sweep_subscriptions(subscriptions: Arc<SubscriptionRegistry>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let now = now_unix();
        let removed = subscriptions.sweep(now);
        if removed > 0 {
            tracing::debug!(removed, "swept expired subscriptions");
        }
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
