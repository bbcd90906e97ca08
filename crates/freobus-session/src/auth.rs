//! Message authentication
//!
//! How a session manager seals outbound messages and decides whether to
//! trust inbound ones. [`SignedMessages`] is the authenticated variant used
//! between independent browser contexts; [`TrustedMessages`] is for contexts
//! that already trust their peers (an extension's own background and content
//! scripts).

use crate::message::CrossDAppMessage;
use crate::validator::SessionValidator;
use async_trait::async_trait;
use freobus_core::{FreobusResult, MessageSigner, PhysicalClock, SessionProof, UnifiedSession};
use std::sync::Arc;
use tracing::debug;

/// Outbound sealing and inbound admission of cross-context messages
#[async_trait]
pub trait MessageAuthenticator: Send + Sync {
    /// Prepare `message` for broadcast
    async fn seal(&self, message: CrossDAppMessage) -> FreobusResult<CrossDAppMessage>;

    /// Decide whether an inbound message may change local state
    async fn authenticate(&self, message: &CrossDAppMessage) -> bool;

    /// Time validity of a session
    fn check_session(&self, session: &UnifiedSession, now_ms: u64) -> bool {
        session.is_live_at(now_ms)
    }
}

/// Nonce + signature over the canonical payload, checked by the validator.
///
/// Freshness is judged on the sender's `data.timestamp`, which the signature
/// covers; messages without one are rejected.
pub struct SignedMessages {
    signer: Arc<dyn MessageSigner>,
    validator: Arc<SessionValidator>,
    clock: Arc<dyn PhysicalClock>,
}

impl SignedMessages {
    /// Seal with `signer`, admit through `validator`
    pub fn new(
        signer: Arc<dyn MessageSigner>,
        validator: Arc<SessionValidator>,
        clock: Arc<dyn PhysicalClock>,
    ) -> Self {
        Self {
            signer,
            validator,
            clock,
        }
    }

    /// The validator shared with this authenticator
    pub fn validator(&self) -> &Arc<SessionValidator> {
        &self.validator
    }
}

#[async_trait]
impl MessageAuthenticator for SignedMessages {
    async fn seal(&self, mut message: CrossDAppMessage) -> FreobusResult<CrossDAppMessage> {
        if message.timestamp().is_none() {
            message = message.with_data("timestamp", self.clock.now_ms());
        }
        message.nonce = Some(self.validator.generate_nonce());
        let payload = message.canonical_payload()?;
        message.signature = Some(self.signer.sign_message(&payload).await?);
        Ok(message)
    }

    async fn authenticate(&self, message: &CrossDAppMessage) -> bool {
        let (Some(signature), Some(nonce)) = (&message.signature, message.nonce) else {
            debug!(origin = %message.origin, "message missing signature or nonce");
            return false;
        };
        let Some(timestamp) = message.timestamp() else {
            debug!(origin = %message.origin, "message missing signed timestamp");
            return false;
        };
        let payload = match message.canonical_payload() {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        let proof = SessionProof {
            session_id: message.session_id.clone(),
            signature: signature.clone(),
            timestamp,
            nonce,
        };
        self.validator.validate_session_proof(&proof, &payload).await
    }

    fn check_session(&self, session: &UnifiedSession, _now_ms: u64) -> bool {
        self.validator.validate_session(session)
    }
}

/// Accepts every decoded message and leaves outbound ones unsigned
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedMessages;

#[async_trait]
impl MessageAuthenticator for TrustedMessages {
    async fn seal(&self, message: CrossDAppMessage) -> FreobusResult<CrossDAppMessage> {
        Ok(message)
    }

    async fn authenticate(&self, _message: &CrossDAppMessage) -> bool {
        true
    }
}
