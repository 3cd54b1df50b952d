use serde::{Deserialize, Serialize};

/// Settlement currencies a payment claim may be denominated in (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "BASE")]
    Base,
    #[serde(rename = "AKT")]
    Akt,
    #[serde(rename = "XRP")]
    Xrp,
}

impl Currency {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BTC" => Some(Self::Btc),
            "BASE" => Some(Self::Base),
            "AKT" => Some(Self::Akt),
            "XRP" => Some(Self::Xrp),
            _ => None,
        }
    }
}

/// A proof of payment against a named Interledger-style channel, as carried
/// either in a BTP-NIPs packet payload or in a legacy `["payment", "ilp", …]`
/// Nostr event tag (spec.md §3, §4.7, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentClaim {
    pub channel_id: String,
    pub amount_sats: u64,
    pub nonce: u64,
    pub signature: String,
    pub currency: Currency,
}

/// Upper bound spec.md §3 places on `amount_sats` and `nonce`: 2^53 − 1, the
/// largest integer a JS `number` (and hence the upstream wire format) can
/// represent exactly.
pub const MAX_SAFE_INTEGER: u64 = (1u64 << 53) - 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PaymentClaimError {
    #[error("channel_id must be 1..=256 bytes, got {0}")]
    ChannelIdLength(usize),
    #[error("amount_sats must be a positive integer <= 2^53-1")]
    AmountOutOfRange,
    #[error("nonce must be <= 2^53-1")]
    NonceOutOfRange,
    #[error("signature must be hex, length >= 20, no 0x prefix")]
    InvalidSignature,
    #[error("unknown currency code: {0}")]
    UnknownCurrency(String),
}

impl PaymentClaim {
    /// Validates every field per spec.md §3. A claim assembled by hand
    /// (rather than parsed through [`crate::PacketPayload`] or the legacy
    /// tag parser) must still pass this before being treated as well-formed.
    pub fn validate(&self) -> Result<(), PaymentClaimError> {
        let len = self.channel_id.len();
        if len == 0 || len > 256 {
            return Err(PaymentClaimError::ChannelIdLength(len));
        }
        if self.amount_sats == 0 || self.amount_sats > MAX_SAFE_INTEGER {
            return Err(PaymentClaimError::AmountOutOfRange);
        }
        if self.nonce > MAX_SAFE_INTEGER {
            return Err(PaymentClaimError::NonceOutOfRange);
        }
        if self.signature.len() < 20
            || self.signature.starts_with("0x")
            || !self.signature.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(PaymentClaimError::InvalidSignature);
        }
        Ok(())
    }

    /// Parses the first `["payment","ilp", channel_id, amount, nonce,
    /// signature, currency, …]` tag from a legacy Nostr event's tag list
    /// (spec.md §4.7, §6). Pure: never performs I/O. Returns `None` rather
    /// than an error since an absent or malformed claim is not itself an
    /// error condition for the caller — it just means "no claim found".
    pub fn parse_from_tags(tags: &[Vec<String>]) -> Option<Self> {
        let tag = tags.iter().find(|t| {
            t.len() >= 7 && t[0] == "payment" && t[1] == "ilp"
        })?;

        let channel_id = tag[2].clone();
        let amount_sats: u64 = tag[3].parse().ok()?;
        let nonce: u64 = tag[4].parse().ok()?;
        let signature = tag[5].clone();
        let currency = Currency::parse(&tag[6])?;

        let claim = PaymentClaim {
            channel_id,
            amount_sats,
            nonce,
            signature,
            currency,
        };
        claim.validate().ok()?;
        Some(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_tag(extra: &[&str]) -> Vec<String> {
        let mut tag = vec![
            "payment".to_string(),
            "ilp".to_string(),
            "g.dassie.alice".to_string(),
            "100".to_string(),
            "1".to_string(),
            "abcdefabcdefabcdefabcdef".to_string(),
            "BTC".to_string(),
        ];
        tag.extend(extra.iter().map(|s| s.to_string()));
        tag
    }

    #[test]
    fn parses_well_formed_claim() {
        let tags = vec![valid_tag(&[])];
        let claim = PaymentClaim::parse_from_tags(&tags).unwrap();
        assert_eq!(claim.channel_id, "g.dassie.alice");
        assert_eq!(claim.amount_sats, 100);
        assert_eq!(claim.currency, Currency::Btc);
    }

    #[test]
    fn first_match_wins_and_trailing_elements_ignored() {
        let tags = vec![valid_tag(&["extra1", "extra2"])];
        assert!(PaymentClaim::parse_from_tags(&tags).is_some());
    }

    #[test]
    fn rejects_amount_zero() {
        let mut tag = valid_tag(&[]);
        tag[3] = "0".to_string();
        assert!(PaymentClaim::parse_from_tags(&[tag]).is_none());
    }

    #[test]
    fn rejects_0x_prefixed_signature() {
        let mut tag = valid_tag(&[]);
        tag[5] = "0xabcdefabcdefabcdefabcdef".to_string();
        assert!(PaymentClaim::parse_from_tags(&[tag]).is_none());
    }

    #[test]
    fn rejects_unknown_currency() {
        let mut tag = valid_tag(&[]);
        tag[6] = "DOGE".to_string();
        assert!(PaymentClaim::parse_from_tags(&[tag]).is_none());
    }

    #[test]
    fn no_matching_tag_returns_none() {
        let tags = vec![vec!["e".to_string(), "abc".to_string()]];
        assert!(PaymentClaim::parse_from_tags(&tags).is_none());
    }
}
