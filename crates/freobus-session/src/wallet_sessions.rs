//! Wallet Session Registry
//!
//! Wallet-side grants: which accounts, chain and permissions an origin was
//! given, and for how long. A [`UnifiedSession`](freobus_core::UnifiedSession)
//! refers to one of these through its `wallet_session_id`.
//!
//! Grants live for a fixed lifetime (24 hours by default). Expired grants are
//! dropped when read, when shared, or by [`WalletSessionRegistry::cleanup`].

use freobus_core::{Origin, PhysicalClock};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Lifetime of a grant unless overridden
pub const DEFAULT_WALLET_SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_EVENT_CAPACITY: usize = 64;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Wallet account exposed to a dApp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account address
    pub address: String,
    /// Display name
    pub name: String,
    /// Derivation index
    pub index: u32,
    /// Token symbol -> balance
    #[serde(default)]
    pub balances: BTreeMap<String, String>,
    /// Native balance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

/// What a dApp may do with the wallet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DAppPermissions {
    /// May request transaction signatures
    pub can_sign_transactions: bool,
    /// May read account addresses
    pub can_read_accounts: bool,
    /// May ask the wallet to switch chains
    pub can_switch_networks: bool,
    /// RPC methods the dApp may call
    pub allowed_methods: Vec<String>,
    /// Chain ids the dApp may use
    pub allowed_networks: Vec<String>,
}

/// Partial permissions; set fields override, unset fields keep the base value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsUpdate {
    /// Replaces `can_sign_transactions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_sign_transactions: Option<bool>,
    /// Replaces `can_read_accounts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_read_accounts: Option<bool>,
    /// Replaces `can_switch_networks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_switch_networks: Option<bool>,
    /// Replaces `allowed_methods`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,
    /// Replaces `allowed_networks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_networks: Option<Vec<String>>,
}

impl PermissionsUpdate {
    /// `base` with every set field of `self` laid over it
    pub fn merged_over(&self, base: &DAppPermissions) -> DAppPermissions {
        DAppPermissions {
            can_sign_transactions: self
                .can_sign_transactions
                .unwrap_or(base.can_sign_transactions),
            can_read_accounts: self.can_read_accounts.unwrap_or(base.can_read_accounts),
            can_switch_networks: self.can_switch_networks.unwrap_or(base.can_switch_networks),
            allowed_methods: self
                .allowed_methods
                .clone()
                .unwrap_or_else(|| base.allowed_methods.clone()),
            allowed_networks: self
                .allowed_networks
                .clone()
                .unwrap_or_else(|| base.allowed_networks.clone()),
        }
    }
}

/// One origin's grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    /// `session_<created ms>_<9 base36 chars>`
    pub id: String,
    /// Origin the grant was issued to
    pub origin: Origin,
    /// Accounts visible to the origin
    pub accounts: Vec<Account>,
    /// Chain the grant was issued on
    pub chain_id: String,
    /// What the origin may do
    pub permissions: DAppPermissions,
    /// Epoch ms
    pub created_at: u64,
    /// Epoch ms; the grant is expired strictly after this instant
    pub expires_at: u64,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WalletSession {
    /// True once `now_ms` is past `expires_at`
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }
}

/// Ask to extend an existing grant to another origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    /// Origin receiving the new grant
    pub target_origin: Origin,
    /// Grant being shared
    pub session_id: String,
    /// Overrides applied to the source permissions
    #[serde(default)]
    pub permissions: PermissionsUpdate,
}

/// Why a share was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    /// No grant with that id
    #[error("Session not found")]
    NotFound {
        /// Requested id
        session_id: String,
    },
    /// The source grant had expired; it has been removed
    #[error("Session expired")]
    Expired {
        /// Requested id
        session_id: String,
    },
}

/// Registry notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WalletSessionEvent {
    /// A grant was issued
    SessionCreated {
        /// The grant
        session: WalletSession,
    },
    /// A grant was extended to another origin
    #[serde(rename_all = "camelCase")]
    SessionShared {
        /// Grant that was shared
        source_session_id: String,
        /// Grant issued to the target
        target_session_id: String,
        /// Origin receiving the grant
        target_origin: Origin,
    },
    /// A grant's permissions changed
    SessionUpdated {
        /// The grant
        session: WalletSession,
    },
    /// A grant was revoked
    SessionTerminated {
        /// The grant
        session: WalletSession,
    },
    /// A grant was swept after expiring
    SessionExpired {
        /// The grant
        session: WalletSession,
    },
}

/// Grants issued by this wallet, keyed by id
pub struct WalletSessionRegistry {
    sessions: Mutex<HashMap<String, WalletSession>>,
    clock: Arc<dyn PhysicalClock>,
    lifetime_ms: u64,
    events: broadcast::Sender<WalletSessionEvent>,
}

impl WalletSessionRegistry {
    /// Empty registry issuing grants for [`DEFAULT_WALLET_SESSION_LIFETIME`]
    pub fn new(clock: Arc<dyn PhysicalClock>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            lifetime_ms: 0,
            events,
        }
        .with_lifetime(DEFAULT_WALLET_SESSION_LIFETIME)
    }

    /// Override the grant lifetime
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX);
        self
    }

    fn emit(&self, event: WalletSessionEvent) {
        let _ = self.events.send(event);
    }

    fn fresh_id(sessions: &HashMap<String, WalletSession>, now_ms: u64) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let suffix: String = (0..ID_SUFFIX_LEN)
                .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
                .collect();
            let id = format!("session_{now_ms}_{suffix}");
            if !sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Issue a grant to `origin`
    pub fn create_session(
        &self,
        origin: impl Into<Origin>,
        accounts: Vec<Account>,
        chain_id: impl Into<String>,
        permissions: DAppPermissions,
    ) -> WalletSession {
        let now = self.clock.now_ms();
        let session = {
            let mut sessions = self.sessions.lock();
            let session = WalletSession {
                id: Self::fresh_id(&sessions, now),
                origin: origin.into(),
                accounts,
                chain_id: chain_id.into(),
                permissions,
                created_at: now,
                expires_at: now.saturating_add(self.lifetime_ms),
                metadata: Map::new(),
            };
            sessions.insert(session.id.clone(), session.clone());
            session
        };
        info!(session_id = %session.id, origin = %session.origin, "wallet session created");
        self.emit(WalletSessionEvent::SessionCreated {
            session: session.clone(),
        });
        session
    }

    /// Issue a grant to `request.target_origin` with the source grant's
    /// accounts and chain, and its permissions overridden by the request
    pub fn share_session(&self, request: &ShareRequest) -> Result<WalletSession, ShareError> {
        let now = self.clock.now_ms();
        let source = {
            let mut sessions = self.sessions.lock();
            let Some(source) = sessions.get(&request.session_id).cloned() else {
                return Err(ShareError::NotFound {
                    session_id: request.session_id.clone(),
                });
            };
            if source.is_expired_at(now) {
                sessions.remove(&request.session_id);
                debug!(session_id = %request.session_id, "refusing to share expired wallet session");
                return Err(ShareError::Expired {
                    session_id: request.session_id.clone(),
                });
            }
            source
        };

        let target = self.create_session(
            request.target_origin.clone(),
            source.accounts,
            source.chain_id,
            request.permissions.merged_over(&source.permissions),
        );
        self.emit(WalletSessionEvent::SessionShared {
            source_session_id: source.id,
            target_session_id: target.id.clone(),
            target_origin: request.target_origin.clone(),
        });
        Ok(target)
    }

    /// Live grant by id; an expired one is dropped and reported absent
    pub fn get_session(&self, session_id: &str) -> Option<WalletSession> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        if sessions.get(session_id)?.is_expired_at(now) {
            sessions.remove(session_id);
            return None;
        }
        sessions.get(session_id).cloned()
    }

    /// Revoke a grant; false if it was unknown
    pub fn terminate_session(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.lock().remove(session_id) else {
            return false;
        };
        info!(session_id, "wallet session terminated");
        self.emit(WalletSessionEvent::SessionTerminated { session });
        true
    }

    /// Lay `update` over a live grant's permissions. `None` if the grant is
    /// unknown or expired.
    pub fn update_session_permissions(
        &self,
        session_id: &str,
        update: &PermissionsUpdate,
    ) -> Option<WalletSession> {
        let now = self.clock.now_ms();
        let updated = {
            let mut sessions = self.sessions.lock();
            let session = sessions.get_mut(session_id)?;
            if session.is_expired_at(now) {
                return None;
            }
            session.permissions = update.merged_over(&session.permissions);
            session.clone()
        };
        self.emit(WalletSessionEvent::SessionUpdated {
            session: updated.clone(),
        });
        Some(updated)
    }

    /// Drop every expired grant; returns how many were removed
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<WalletSession> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.is_expired_at(now))
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expired wallet sessions swept");
        }
        let removed = expired.len();
        for session in expired {
            self.emit(WalletSessionEvent::SessionExpired { session });
        }
        removed
    }

    /// Grants currently held, expired or not
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True if no grant is held
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WalletSessionEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for WalletSessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSessionRegistry")
            .field("sessions", &self.len())
            .field("lifetime_ms", &self.lifetime_ms)
            .finish_non_exhaustive()
    }
}
