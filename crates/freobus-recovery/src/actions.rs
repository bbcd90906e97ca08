//! Recovery actions
//!
//! What "try again" means for each error category. The retry engine only
//! knows that an action either recovered (`Ok(true)`), did not (`Ok(false)`)
//! or failed outright (`Err`).

use crate::errors::RecoveryError;
use crate::record::ErrorRecord;
use async_trait::async_trait;
use freobus_core::{FreobusResult, SessionRevalidator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One recovery attempt for a category of errors
#[async_trait]
pub trait RecoveryAction: Send + Sync {
    /// Try to recover from `record`
    async fn recover(&self, record: &ErrorRecord) -> Result<bool, RecoveryError>;
}

/// Wallet-side capability to re-establish a connection
#[async_trait]
pub trait WalletReconnect: Send + Sync {
    /// Reconnect; true if the wallet is usable again
    async fn connect(&self) -> FreobusResult<bool>;
}

/// Reports whether the network is reachable
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// True if the network looks reachable
    async fn is_online(&self) -> bool;
}

/// Connectivity flag flipped by whoever watches the network
#[derive(Debug, Clone)]
pub struct OnlineFlag(Arc<AtomicBool>);

impl OnlineFlag {
    /// Flag starting at `online`
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    /// Update the flag
    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Default for OnlineFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectivityProbe for OnlineFlag {
    async fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Re-validates `context.session_id` with the session layer
pub struct SessionRecovery {
    revalidator: Arc<dyn SessionRevalidator>,
}

impl SessionRecovery {
    /// Recover through `revalidator`
    pub fn new(revalidator: Arc<dyn SessionRevalidator>) -> Self {
        Self { revalidator }
    }
}

#[async_trait]
impl RecoveryAction for SessionRecovery {
    async fn recover(&self, record: &ErrorRecord) -> Result<bool, RecoveryError> {
        let session_id = record
            .context
            .session_id
            .as_ref()
            .ok_or(RecoveryError::MissingContext { field: "sessionId" })?;
        Ok(self.revalidator.revalidate(session_id).await)
    }
}

/// Waits for the network to settle, then probes it
pub struct NetworkRecovery {
    probe: Arc<dyn ConnectivityProbe>,
    settle: Duration,
}

impl NetworkRecovery {
    /// Probe with `probe` after waiting `settle`
    pub fn new(probe: Arc<dyn ConnectivityProbe>, settle: Duration) -> Self {
        Self { probe, settle }
    }
}

#[async_trait]
impl RecoveryAction for NetworkRecovery {
    async fn recover(&self, _record: &ErrorRecord) -> Result<bool, RecoveryError> {
        tokio::time::sleep(self.settle).await;
        let online = self.probe.is_online().await;
        debug!(online, "network probe");
        Ok(online)
    }
}

/// Asks the record's wallet bridge to reconnect
#[derive(Debug, Default)]
pub struct WalletRecovery;

#[async_trait]
impl RecoveryAction for WalletRecovery {
    async fn recover(&self, record: &ErrorRecord) -> Result<bool, RecoveryError> {
        let bridge = record
            .context
            .wallet_bridge
            .as_ref()
            .ok_or(RecoveryError::MissingContext {
                field: "walletBridge",
            })?;
        Ok(bridge.connect().await?)
    }
}
