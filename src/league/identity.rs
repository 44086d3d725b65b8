//! Opaque identifier and token newtypes.
//!
//! IDs are opaque strings to every peer; the core only ever compares them
//! for equality and orders `PlayerId` lexicographically for side assignment
//! and tiebreaks. Wrapping them keeps a `PlayerId` from being accidentally
//! passed where a `MatchId` is expected.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(LeagueId);
opaque_id!(PlayerId);
opaque_id!(RefereeId);
opaque_id!(MatchId);
opaque_id!(RoundId);
opaque_id!(ConversationId);

/// The sentinel participant in a BYE match.
pub const BYE: &str = "BYE";

/// A high-entropy bearer token minted by the League Manager at registration
/// and by a Referee for per-match session authentication. Compared in
/// constant time so a timing side channel can't be used to guess a valid
/// token byte-by-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken(pub String);

impl AuthToken {
    /// Generates `byte_len` bytes of CSPRNG output and hex-encodes them.
    /// `byte_len` is `LEAGUE_AUTH_TOKEN_BYTES` (default 32).
    pub fn generate(byte_len: usize) -> Self {
        let mut bytes = vec![0u8; byte_len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex_encode(&bytes))
    }

    /// Derives a deterministic per-match session token from the match's
    /// own auth token material, a match id, and a role tag, so each
    /// participant gets a distinct, unguessable token without the Referee
    /// needing its own CSPRNG call per invite.
    pub fn derive_session_token(match_id: &MatchId, role_tag: &str, secret: &AuthToken) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.0.as_bytes());
        hasher.update(b":");
        hasher.update(match_id.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(role_tag.as_bytes());
        Self(hex_encode(&hasher.finalize()))
    }

    /// Constant-time equality check for token authenticity — never branch
    /// on token bytes one at a time.
    pub fn verify(&self, presented: &AuthToken) -> bool {
        let a = self.0.as_bytes();
        let b = presented.0.as_bytes();
        a.len() == b.len() && bool::from(a.ct_eq(b))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

/// A fresh correlation id for an outbound exchange.
pub fn new_conversation_id() -> ConversationId {
    ConversationId::new(Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_have_expected_hex_length() {
        let token = AuthToken::generate(32);
        assert_eq!(token.0.len(), 64);
    }

    #[test]
    fn verify_accepts_matching_and_rejects_mismatched() {
        let token = AuthToken::generate(16);
        assert!(token.verify(&token.clone()));
        let other = AuthToken::generate(16);
        assert!(!token.verify(&other));
    }

    #[test]
    fn derived_session_tokens_differ_by_role() {
        let secret = AuthToken::generate(16);
        let match_id = MatchId::new("R1M1");
        let a = AuthToken::derive_session_token(&match_id, "ODD", &secret);
        let b = AuthToken::derive_session_token(&match_id, "EVEN", &secret);
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn player_id_orders_lexicographically() {
        let mut ids = vec![PlayerId::new("p10"), PlayerId::new("p2"), PlayerId::new("p1")];
        ids.sort();
        assert_eq!(ids, vec![PlayerId::new("p1"), PlayerId::new("p10"), PlayerId::new("p2")]);
    }
}
