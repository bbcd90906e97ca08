//! Effect handlers with scripted behaviour.

use async_trait::async_trait;
use freobus_core::{
    BroadcastTransport, FreobusError, FreobusResult, InboundReceiver, MessageSigner, SessionId,
    SessionRevalidator,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Transport whose every post fails, as a closed browser channel would
#[derive(Debug)]
pub struct FailingTransport {
    message: String,
    attempts: AtomicUsize,
}

impl FailingTransport {
    /// Fail every post with `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of posts attempted so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BroadcastTransport for FailingTransport {
    fn channel_name(&self) -> &str {
        "failing"
    }

    async fn post(&self, _payload: String) -> FreobusResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(FreobusError::transport(self.message.clone()))
    }

    fn subscribe(&self) -> InboundReceiver {
        // Sender dropped immediately: the stream ends at once.
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    async fn close(&self) {}
}

/// Signer that is never able to sign (wallet locked)
#[derive(Debug, Default)]
pub struct FailingSigner;

#[async_trait]
impl MessageSigner for FailingSigner {
    async fn sign_message(&self, _payload: &str) -> FreobusResult<String> {
        Err(FreobusError::crypto("wallet locked"))
    }
}

/// Revalidator answering from a script, then from a fallback
#[derive(Debug)]
pub struct ScriptedRevalidator {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: Mutex<Vec<SessionId>>,
}

impl ScriptedRevalidator {
    /// Answer `fallback` for every call
    pub fn always(fallback: bool) -> Self {
        Self::scripted([], fallback)
    }

    /// Answer the scripted values in order, then `fallback`
    pub fn scripted(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Session ids seen so far
    pub fn calls(&self) -> Vec<SessionId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SessionRevalidator for ScriptedRevalidator {
    async fn revalidate(&self, session_id: &SessionId) -> bool {
        self.calls.lock().push(session_id.clone());
        self.script.lock().pop_front().unwrap_or(self.fallback)
    }
}
