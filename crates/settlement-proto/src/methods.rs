use nostr_types::PaymentClaim;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Numeric fields the settlement service delivers as decimal strings are
/// coerced to an arbitrary-precision `Decimal` at this boundary (spec.md
/// §4.8) — financial amounts never round-trip through `f64`.
fn decimal_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    let s = String::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Serialize)]
pub struct GetBalanceParams {
    #[serde(rename = "accountPath")]
    pub account_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    #[serde(deserialize_with = "decimal_from_str")]
    pub balance: Decimal,
    #[serde(rename = "accountPath")]
    pub account_path: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionParams {
    #[serde(rename = "accountPath")]
    pub account_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPush {
    #[serde(deserialize_with = "decimal_from_str")]
    pub balance: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub delta: Decimal,
    pub timestamp: i64,
    pub reason: String,
}

/// A `{method: "subscription", params: {accountPath, data: {...}}}` push
/// frame (spec.md §6), already split out of the generic
/// [`crate::RpcNotification::params`] envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionData {
    #[serde(rename = "accountPath")]
    pub account_path: String,
    pub data: SubscriptionPush,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyClaimParams {
    #[serde(flatten)]
    pub claim: PaymentClaim,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifyClaimResult {
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl VerifyClaimResult {
    /// The canned response spec.md §4.8 mandates when settlement-payment
    /// endpoints are disabled by feature gate — no network round trip.
    pub fn unavailable() -> Self {
        Self {
            valid: false,
            error: Some("unavailable".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertToAktParams {
    pub channel_id: String,
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: Decimal,
}

fn serialize_decimal<S: serde::Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

impl<'de> Deserialize<'de> for ConvertToAktParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            channel_id: String,
            amount: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        let amount = Decimal::from_str(&raw.amount).map_err(serde::de::Error::custom)?;
        Ok(Self {
            channel_id: raw.channel_id,
            amount,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertToAktResult {
    #[serde(deserialize_with = "decimal_from_str")]
    pub akt_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimAllChannelsResult {
    pub claimed_channels: u32,
    #[serde(deserialize_with = "decimal_from_str")]
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingStats {
    pub total_routed_payments: u64,
    #[serde(deserialize_with = "decimal_from_str")]
    pub total_volume: Decimal,
}
