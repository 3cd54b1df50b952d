use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Process-wide configuration, loaded once at startup from the environment
/// (spec.md §6). Invalid individual values log a warning and fall back to
/// their default; only a missing/invalid settlement URL aborts startup
/// (spec.md §7 "Fatal conditions").
#[derive(Debug, Clone)]
pub struct Settings {
    pub pricing: PricingConfig,
    pub settlement: SettlementConfig,
    pub rate_limit: RateLimitConfig,
    pub degraded_mode: DegradedModeConfig,
    pub subscription_max_ttl: Duration,
    pub subscription_default_ttl: Duration,
    /// Signature verification is on by default; disabling it is only ever
    /// appropriate for local development against unsigned fixture events.
    pub verify_signatures: bool,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub store_event: u64,
    pub deliver_event: u64,
    pub query: u64,
    pub free_tier_events: u32,
    pub kind_overrides: HashMap<i32, u64>,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub url: String,
    pub payments_enabled: bool,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter_pct: f64,
    pub request_timeout: Duration,
    pub verification_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_capacity: f64,
    pub base_rate: f64,
    pub error_bucket_capacity: f64,
}

#[derive(Debug, Clone)]
pub struct DegradedModeConfig {
    pub max_queue: usize,
    pub drain_batch_size: usize,
    pub drain_concurrency: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SETTLEMENT_URL must be set")]
    MissingSettlementUrl,
}

impl Settings {
    /// Loads configuration from the process environment. The settlement
    /// URL is the only mandatory setting (spec.md §7); every other value
    /// falls back to a documented default and logs why.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("SETTLEMENT_URL").map_err(|_| ConfigError::MissingSettlementUrl)?;

        Ok(Self {
            pricing: PricingConfig {
                store_event: env_u64("PRICING_STORE_EVENT", 10),
                deliver_event: env_u64("PRICING_DELIVER_EVENT", 1),
                query: env_u64("PRICING_QUERY", 5),
                free_tier_events: env_u32("PRICING_FREE_TIER_EVENTS", 0),
                kind_overrides: parse_kind_overrides(
                    env::var("PRICING_KIND_OVERRIDES").unwrap_or_default(),
                ),
            },
            settlement: SettlementConfig {
                url,
                payments_enabled: env_bool("SETTLEMENT_PAYMENTS_ENABLED", true),
                backoff_base: Duration::from_millis(env_u64("SETTLEMENT_BACKOFF_BASE_MS", 100)),
                backoff_max: Duration::from_millis(env_u64("SETTLEMENT_BACKOFF_MAX_MS", 30_000)),
                backoff_jitter_pct: env_f64("SETTLEMENT_BACKOFF_JITTER_PCT", 0.10),
                request_timeout: Duration::from_millis(env_u64("SETTLEMENT_REQUEST_TIMEOUT_MS", 10_000)),
                verification_timeout: Duration::from_millis(env_u64(
                    "SETTLEMENT_VERIFICATION_TIMEOUT_MS",
                    5_000,
                )),
                connect_timeout: Duration::from_millis(env_u64("SETTLEMENT_CONNECT_TIMEOUT_MS", 5_000)),
                max_retries: env_u32("SETTLEMENT_MAX_RETRIES", 3),
            },
            rate_limit: RateLimitConfig {
                default_capacity: env_f64("RATE_LIMIT_DEFAULT_CAPACITY", 100.0),
                base_rate: env_f64("RATE_LIMIT_BASE_RATE", 100.0),
                error_bucket_capacity: env_f64("RATE_LIMIT_ERROR_BUCKET_CAPACITY", 100.0),
            },
            degraded_mode: DegradedModeConfig {
                max_queue: env_usize("DEGRADED_MODE_MAX_QUEUE", 10_000),
                drain_batch_size: env_usize("DEGRADED_MODE_DRAIN_BATCH_SIZE", 100),
                drain_concurrency: env_usize("DEGRADED_MODE_DRAIN_CONCURRENCY", 10),
            },
            subscription_max_ttl: Duration::from_secs(env_u64("SUBSCRIPTION_MAX_TTL_SECS", 3600)),
            subscription_default_ttl: Duration::from_secs(env_u64("SUBSCRIPTION_DEFAULT_TTL_SECS", 600)),
            verify_signatures: env_bool("VERIFY_SIGNATURES", true),
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, default, "invalid integer env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, default, "invalid integer env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, default, "invalid integer env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, default, "invalid float env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                tracing::warn!(key, raw, default, "invalid boolean env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Parses `PRICING_KIND_OVERRIDES` (comma-separated `kind:amount`). Any
/// malformed entry is skipped with a warning rather than failing the whole
/// list — a single typo in an operator's env file shouldn't wipe out the
/// rest of the overrides.
fn parse_kind_overrides(raw: String) -> HashMap<i32, u64> {
    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.split_once(':') {
            Some((kind, amount)) => match (kind.parse::<i32>(), amount.parse::<u64>()) {
                (Ok(kind), Ok(amount)) => {
                    overrides.insert(kind, amount);
                }
                _ => tracing::warn!(entry, "invalid PRICING_KIND_OVERRIDES entry, skipping"),
            },
            None => tracing::warn!(entry, "invalid PRICING_KIND_OVERRIDES entry, skipping"),
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_kind_overrides() {
        let overrides = parse_kind_overrides("1:10,30023:500".to_string());
        assert_eq!(overrides.get(&1), Some(&10));
        assert_eq!(overrides.get(&30023), Some(&500));
    }

    #[test]
    fn skips_malformed_entry_but_keeps_the_rest() {
        let overrides = parse_kind_overrides("1:10,garbage,7:3".to_string());
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides.get(&1), Some(&10));
        assert_eq!(overrides.get(&7), Some(&3));
    }
}
