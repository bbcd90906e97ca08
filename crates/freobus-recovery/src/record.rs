//! Error records and their context.

use crate::actions::WalletReconnect;
use freobus_core::SessionId;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a recovery action may need to know about the failure
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// Session to re-validate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Wallet capable of reconnecting
    #[serde(skip)]
    pub wallet_bridge: Option<Arc<dyn WalletReconnect>>,
    /// Anything else the reporter wants to keep with the record
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ErrorContext {
    /// Context naming a session
    pub fn for_session(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Context carrying a wallet bridge
    pub fn for_wallet(bridge: Arc<dyn WalletReconnect>) -> Self {
        Self {
            wallet_bridge: Some(bridge),
            ..Self::default()
        }
    }

    /// Add a free-form entry
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("session_id", &self.session_id)
            .field("wallet_bridge", &self.wallet_bridge.as_ref().map(|_| "<bridge>"))
            .field("extra", &self.extra)
            .finish()
    }
}

/// One reported failure and its recovery progress
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// `"{type}_{timestamp}"`, suffixed when that id is taken
    pub id: String,
    /// When the failure was reported (epoch ms)
    pub timestamp: u64,
    /// Category; selects strategy and action
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable description
    pub message: String,
    /// Inputs for the recovery action
    pub context: ErrorContext,
    /// Attempts that have failed so far
    pub retry_count: u32,
}
