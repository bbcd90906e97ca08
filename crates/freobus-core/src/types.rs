//! Session domain types shared across crates.

use crate::errors::{FreobusError, FreobusResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest nonce value; matches the safe-integer range of JSON numbers in
/// browser contexts (2^53 - 1).
pub const MAX_SAFE_NONCE: u64 = (1 << 53) - 1;

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Origin (scheme + host + port) of a connecting dApp or browser context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Wrap an origin string
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    /// Borrow the origin as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Origin {
    fn from(origin: &str) -> Self {
        Self::new(origin)
    }
}

impl From<String> for Origin {
    fn from(origin: String) -> Self {
        Self(origin)
    }
}

/// Address recovered from a message signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerAddress(String);

impl SignerAddress {
    /// Wrap an address string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One authenticated wallet-to-platform linkage.
///
/// Timestamps are epoch milliseconds. A session whose `expiry` is not in the
/// future is dead regardless of activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedSession {
    /// Session identifier
    pub id: SessionId,
    /// Platform user bound to the session
    pub user_id: String,
    /// Wallet address bound to the session
    pub wallet_address: String,
    /// Correlates to the wallet-side session record
    pub wallet_session_id: String,
    /// Creation time (epoch ms)
    pub created_at: u64,
    /// Absolute expiry (epoch ms)
    pub expiry: u64,
    /// Chain the wallet is connected to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

impl UnifiedSession {
    /// Create a session with a fresh id, valid from `now_ms` for `ttl_ms`.
    pub fn new(
        user_id: impl Into<String>,
        wallet_address: impl Into<String>,
        wallet_session_id: impl Into<String>,
        now_ms: u64,
        ttl_ms: u64,
    ) -> FreobusResult<Self> {
        let session = Self {
            id: SessionId::new_random(),
            user_id: user_id.into(),
            wallet_address: wallet_address.into(),
            wallet_session_id: wallet_session_id.into(),
            created_at: now_ms,
            expiry: now_ms.saturating_add(ttl_ms),
            chain_id: None,
        };
        session.check_invariants()?;
        Ok(session)
    }

    /// Attach a chain id
    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    /// Verify `expiry > created_at`
    pub fn check_invariants(&self) -> FreobusResult<()> {
        if self.expiry <= self.created_at {
            return Err(FreobusError::invalid(format!(
                "session {} expires at {} which is not after its creation at {}",
                self.id, self.expiry, self.created_at
            )));
        }
        Ok(())
    }

    /// True iff the session has an expiry and it lies after `now_ms`
    pub fn is_live_at(&self, now_ms: u64) -> bool {
        self.expiry != 0 && self.expiry > now_ms
    }
}

/// Signed attestation accompanying a cross-context message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProof {
    /// Session the proof refers to
    pub session_id: SessionId,
    /// Signature over the canonical message payload
    pub signature: String,
    /// When the proof was observed (epoch ms)
    pub timestamp: u64,
    /// Single-use token
    pub nonce: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn session_liveness_follows_expiry() {
        let session = UnifiedSession::new("user123", "0x123", "wallet-1", 1_000, 500).unwrap();
        assert!(session.is_live_at(1_499));
        assert!(!session.is_live_at(1_500));
        assert!(!session.is_live_at(2_000));
    }

    #[test]
    fn zero_expiry_is_never_live() {
        let mut session = UnifiedSession::new("u", "0x1", "w", 0, 10).unwrap();
        session.expiry = 0;
        assert!(!session.is_live_at(0));
    }

    #[test]
    fn session_rejects_non_positive_ttl() {
        assert_matches!(
            UnifiedSession::new("u", "0x1", "w", 1_000, 0),
            Err(FreobusError::Invalid { .. })
        );
    }

    #[test]
    fn session_serializes_camel_case() {
        let session = UnifiedSession::new("u", "0x1", "w", 1, 10)
            .unwrap()
            .with_chain_id("0x1");
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("walletSessionId").is_some());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["chainId"], "0x1");
    }

    #[test]
    fn max_safe_nonce_matches_js_safe_integer() {
        assert_eq!(MAX_SAFE_NONCE, 9_007_199_254_740_991);
    }
}
