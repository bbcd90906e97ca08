//! Cross-context broadcast transport effect.
//!
//! Models a same-origin publish/subscribe primitive (a browser
//! `BroadcastChannel`, an extension port fan-out, an in-process hub). The
//! coordination layer only relies on "deliver an opaque JSON payload to every
//! other subscriber of the named channel"; ordering across posters is not
//! guaranteed.

use crate::errors::FreobusResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Stream of raw payloads posted by other contexts
pub type InboundReceiver = mpsc::UnboundedReceiver<String>;

/// Same-origin broadcast channel endpoint
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Name of the shared channel
    fn channel_name(&self) -> &str;

    /// Deliver `payload` to every other endpoint on the channel
    async fn post(&self, payload: String) -> FreobusResult<()>;

    /// Receive payloads posted by other endpoints from now on
    fn subscribe(&self) -> InboundReceiver;

    /// Stop sending and receiving; later posts fail
    async fn close(&self);
}
