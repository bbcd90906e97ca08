//! In-process broadcast hub

use async_trait::async_trait;
use freobus_core::{BroadcastTransport, FreobusError, FreobusResult, InboundReceiver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

type Subscribers = Vec<(u64, mpsc::UnboundedSender<String>)>;

/// Named channels shared by endpoints living in one process
#[derive(Clone, Default)]
pub struct LocalBroadcastHub {
    channels: Arc<Mutex<HashMap<String, Subscribers>>>,
    next_endpoint: Arc<AtomicU64>,
}

impl LocalBroadcastHub {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new endpoint on channel `name`
    pub fn open(&self, name: impl Into<String>) -> LocalBroadcastChannel {
        LocalBroadcastChannel {
            hub: self.clone(),
            name: name.into(),
            endpoint: self.next_endpoint.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
        }
    }

    /// Live subscriptions on channel `name`
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.channels.lock().get(name).map_or(0, |subs| {
            subs.iter().filter(|(_, tx)| !tx.is_closed()).count()
        })
    }
}

impl std::fmt::Debug for LocalBroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels: Vec<String> = self.channels.lock().keys().cloned().collect();
        f.debug_struct("LocalBroadcastHub")
            .field("channels", &channels)
            .finish()
    }
}

/// One context's endpoint on a hub channel
#[derive(Debug)]
pub struct LocalBroadcastChannel {
    hub: LocalBroadcastHub,
    name: String,
    endpoint: u64,
    closed: AtomicBool,
}

#[async_trait]
impl BroadcastTransport for LocalBroadcastChannel {
    fn channel_name(&self) -> &str {
        &self.name
    }

    async fn post(&self, payload: String) -> FreobusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FreobusError::transport(format!(
                "channel {} is closed",
                self.name
            )));
        }
        let mut channels = self.hub.channels.lock();
        let Some(subscribers) = channels.get_mut(&self.name) else {
            return Ok(());
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        let mut delivered = 0usize;
        for (endpoint, tx) in subscribers.iter() {
            if *endpoint != self.endpoint && tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(channel = %self.name, delivered, "posted payload");
        Ok(())
    }

    fn subscribe(&self) -> InboundReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed.load(Ordering::Acquire) {
            self.hub
                .channels
                .lock()
                .entry(self.name.clone())
                .or_default()
                .push((self.endpoint, tx));
        }
        rx
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(subscribers) = self.hub.channels.lock().get_mut(&self.name) {
            subscribers.retain(|(endpoint, _)| *endpoint != self.endpoint);
        }
    }
}
