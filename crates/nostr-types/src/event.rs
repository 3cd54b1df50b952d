use secp256k1::schnorr;
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A fixed-length byte string carried on the wire as lowercase hex.
///
/// `NostrEvent::id`/`pubkey` are 32 bytes, `sig` is 64 bytes; all three share
/// this representation so the hex decode/length check lives in one place.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HexBytes<const N: usize>(pub [u8; N]);

impl<const N: usize> HexBytes<N> {
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        if s.len() != N * 2 {
            return Err(HexError::WrongLength {
                expected: N * 2,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s).map_err(|_| HexError::NotHex)?;
        let arr: [u8; N] = bytes.try_into().map_err(|_| HexError::NotHex)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HexError {
    #[error("expected {expected} hex chars, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("not valid hex")]
    NotHex,
}

impl<const N: usize> fmt::Debug for HexBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl<const N: usize> fmt::Display for HexBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl<const N: usize> Serialize for HexBytes<N> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for HexBytes<N> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

pub type EventId = HexBytes<32>;
pub type PubKey = HexBytes<32>;
pub type Signature = HexBytes<64>;

/// A Nostr tag is an ordered sequence of strings; the first element is the
/// tag name (`"e"`, `"p"`, `"expiration"`, `"payment"`, …).
pub type Tag = Vec<String>;

/// Content-addressed, immutable Nostr event (spec.md §3 `NostrEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NostrEvent {
    pub id: EventId,
    pub pubkey: PubKey,
    pub created_at: i64,
    pub kind: i32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: Signature,
}

impl NostrEvent {
    /// First tag value matching `name`, if the event has such a tag with at
    /// least one value beyond the name.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name) && t.len() > 1)
            .map(|t| t[1].as_str())
    }

    /// Parses the `expiration` tag into a UNIX timestamp, if present.
    pub fn expiration(&self) -> Option<i64> {
        self.first_tag_value("expiration").and_then(|v| v.parse().ok())
    }
}

/// Canonical serialization per spec.md §3: `[0, pubkey, created_at, kind,
/// tags, content]` with no extra whitespace. This exact byte sequence is
/// hashed to produce the event id and is never exposed as a `String` that
/// could accidentally pick up whitespace from a pretty-printer.
fn canonical_bytes(
    pubkey: &PubKey,
    created_at: i64,
    kind: i32,
    tags: &[Tag],
    content: &str,
) -> Vec<u8> {
    #[derive(Serialize)]
    struct Canonical<'a>(u8, &'a str, i64, i32, &'a [Tag], &'a str);

    let value = Canonical(0, &pubkey.to_hex(), created_at, kind, tags, content);
    serde_json::to_vec(&value).expect("canonical event tuple always serializes")
}

/// Computes the 32-byte SHA-256 event id for the given fields.
pub fn compute_event_id(pubkey: &PubKey, created_at: i64, kind: i32, tags: &[Tag], content: &str) -> EventId {
    let bytes = canonical_bytes(pubkey, created_at, kind, tags, content);
    let digest = Sha256::digest(&bytes);
    EventId(digest.into())
}

impl NostrEvent {
    /// Recomputes this event's id from its own fields.
    pub fn recompute_id(&self) -> EventId {
        compute_event_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Verifies both the id binding and the schnorr signature. Never panics
    /// or raises: any malformed key/signature simply verifies as `false`.
    pub fn verify(&self) -> bool {
        if self.recompute_id() != self.id {
            return false;
        }

        let Ok(pubkey) = XOnlyPublicKey::from_slice(self.pubkey.as_bytes()) else {
            return false;
        };
        let Ok(sig) = schnorr::Signature::from_slice(self.sig.as_bytes()) else {
            return false;
        };
        let Ok(msg) = secp256k1::Message::from_slice(self.id.as_bytes()) else {
            return false;
        };

        secp256k1::SECP256K1.verify_schnorr(&sig, &msg, &pubkey).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keypair() -> (secp256k1::KeyPair, XOnlyPublicKey) {
        let secp = secp256k1::Secp256k1::new();
        let sk = secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        let keypair = secp256k1::KeyPair::from_secret_key(&secp, &sk);
        let (xonly, _parity) = keypair.x_only_public_key();
        (keypair, xonly)
    }

    fn signed_event(created_at: i64, kind: i32, tags: Vec<Tag>, content: &str) -> NostrEvent {
        let secp = secp256k1::Secp256k1::new();
        let (keypair, xonly) = sample_keypair();
        let pubkey = PubKey(xonly.serialize());
        let id = compute_event_id(&pubkey, created_at, kind, &tags, content);
        let msg = secp256k1::Message::from_slice(id.as_bytes()).unwrap();
        let sig = secp.sign_schnorr(&msg, &keypair);
        NostrEvent {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content: content.to_string(),
            sig: Signature(sig.as_ref().try_into().unwrap()),
        }
    }

    #[test]
    fn verify_true_for_well_formed_event() {
        let event = signed_event(1_700_000_000, 1, vec![], "hello");
        assert!(event.verify());
    }

    #[test]
    fn verify_false_when_content_tampered_after_signing() {
        let mut event = signed_event(1_700_000_000, 1, vec![], "hello");
        event.content = "tampered".to_string();
        assert!(!event.verify());
        // id no longer matches content, independent of the signature check
        assert_ne!(event.recompute_id(), event.id);
    }

    #[test]
    fn verify_false_for_all_zero_signature() {
        let mut event = signed_event(1_700_000_000, 1, vec![], "hello");
        event.sig = Signature([0u8; 64]);
        assert!(!event.verify());
    }

    #[test]
    fn expiration_tag_is_parsed() {
        let tags = vec![vec!["expiration".to_string(), "1700000500".to_string()]];
        let event = signed_event(1_700_000_000, 1, tags, "hello");
        assert_eq!(event.expiration(), Some(1_700_000_500));
    }

    #[test]
    fn hex_bytes_rejects_wrong_length() {
        assert_eq!(
            EventId::from_hex("ab"),
            Err(HexError::WrongLength {
                expected: 64,
                actual: 2
            })
        );
    }
}
