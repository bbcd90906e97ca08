//! Canned values.

use freobus_core::{Ed25519MessageSigner, SessionId, UnifiedSession};

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Session valid for one hour from `now_ms`
pub fn sample_session(now_ms: u64) -> UnifiedSession {
    sample_session_with_id("test-session", now_ms)
}

/// Session with a chosen id, valid for one hour from `now_ms`
pub fn sample_session_with_id(id: &str, now_ms: u64) -> UnifiedSession {
    UnifiedSession {
        id: SessionId::new(id),
        user_id: "user123".to_string(),
        wallet_address: "0x123".to_string(),
        wallet_session_id: "wallet-session-123".to_string(),
        created_at: now_ms,
        expiry: now_ms + HOUR_MS,
        chain_id: None,
    }
}

/// Deterministic signer; different seeds give different addresses
pub fn test_signer(seed: u8) -> Ed25519MessageSigner {
    Ed25519MessageSigner::from_secret_bytes(&[seed; 32])
}
