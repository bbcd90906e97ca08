//! Session Proof Validator
//!
//! Authenticity and freshness gate for sessions and cross-context messages.
//! Owns the context's [`NonceLedger`]; one validator per browser context,
//! shared by `Arc` with whoever needs it.

use crate::nonce::NonceLedger;
use freobus_core::{
    NonceConfig, PhysicalClock, SessionProof, SignatureVerifier, SignerAddress, UnifiedSession,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Verifies session validity and signed proofs
pub struct SessionValidator {
    ledger: NonceLedger,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn PhysicalClock>,
    trusted_signers: Option<HashSet<SignerAddress>>,
}

impl SessionValidator {
    /// Create a validator with a fresh nonce ledger
    pub fn new(
        config: &NonceConfig,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn PhysicalClock>,
    ) -> Self {
        Self {
            ledger: NonceLedger::new(config.window(), clock.clone()),
            verifier,
            clock,
            trusted_signers: None,
        }
    }

    /// Only accept proofs signed by one of `signers`
    pub fn with_trusted_signers(mut self, signers: impl IntoIterator<Item = SignerAddress>) -> Self {
        self.trusted_signers = Some(signers.into_iter().collect());
        self
    }

    /// The nonce ledger owned by this validator
    pub fn ledger(&self) -> &NonceLedger {
        &self.ledger
    }

    /// True iff the session has an expiry in the future
    pub fn validate_session(&self, session: &UnifiedSession) -> bool {
        session.is_live_at(self.clock.now_ms())
    }

    /// Check a signed proof over `message`.
    ///
    /// Fails closed: replayed nonces, stale proofs, malformed or mismatched
    /// signatures and untrusted signers all yield `false`. On success the
    /// nonce is consumed so the same proof cannot be accepted twice.
    pub async fn validate_session_proof(&self, proof: &SessionProof, message: &str) -> bool {
        if self.ledger.is_used(proof.nonce) {
            debug!(session_id = %proof.session_id, nonce = proof.nonce, "rejecting replayed nonce");
            return false;
        }

        let now = self.clock.now_ms();
        let window = self.ledger.window_ms();
        if now.saturating_sub(proof.timestamp) > window || proof.timestamp.saturating_sub(now) > window
        {
            debug!(session_id = %proof.session_id, timestamp = proof.timestamp, "rejecting stale proof");
            return false;
        }

        let signer = match self.verifier.verify_message(message, &proof.signature).await {
            Ok(signer) => signer,
            Err(err) => {
                debug!(session_id = %proof.session_id, error = %err, "proof signature did not verify");
                return false;
            }
        };

        if let Some(trusted) = &self.trusted_signers {
            if !trusted.contains(&signer) {
                debug!(session_id = %proof.session_id, signer = %signer, "proof signed by untrusted signer");
                return false;
            }
        }

        // A concurrent validation may have consumed the nonce while we awaited.
        if !self.ledger.mark_used(proof.nonce) {
            debug!(session_id = %proof.session_id, nonce = proof.nonce, "nonce consumed concurrently");
            return false;
        }

        trace!(session_id = %proof.session_id, signer = %signer, "proof accepted");
        true
    }

    /// Fresh nonce from the ledger, already registered as used
    pub fn generate_nonce(&self) -> u64 {
        self.ledger.generate_nonce()
    }

    /// Spawn the periodic nonce sweep. Must be called inside a Tokio runtime.
    /// A zero `interval` is raised to one millisecond.
    pub fn start_maintenance(self: &Arc<Self>, interval: Duration) -> MaintenanceHandle {
        let validator = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = validator.ledger.sweep_expired();
                if removed > 0 {
                    trace!(removed, "swept expired nonces");
                }
            }
        });
        MaintenanceHandle { task: Some(task) }
    }
}

impl std::fmt::Debug for SessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionValidator")
            .field("ledger", &self.ledger)
            .field("trusted_signers", &self.trusted_signers)
            .finish_non_exhaustive()
    }
}

/// Cancels the nonce sweep when cancelled or dropped
#[derive(Debug)]
pub struct MaintenanceHandle {
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the sweep task
    pub fn cancel(mut self) {
        self.abort();
    }

    /// True while the sweep task is running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
