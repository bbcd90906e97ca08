//! Session Manager
//!
//! Authoritative per-context orchestrator of the single active session and the
//! origins attached to it. Local changes are sealed by a
//! [`MessageAuthenticator`] and posted on a [`BroadcastTransport`]; inbound
//! messages from other contexts are admitted by the same authenticator and
//! applied only when they refer to this context's active session.
//!
//! Two variants share one state machine:
//!
//! - [`SessionManager::authenticated`]: signed, replay-protected messages and
//!   a cap on attached origins
//! - [`SessionManager::trusted`]: unsigned messages, no cap, for contexts that
//!   trust their peers
//!
//! Background tasks (inbound listener, inactivity monitor, optional refresh,
//! nonce sweep) live until [`SessionManager::shutdown`] or drop.

use crate::auth::{MessageAuthenticator, SignedMessages, TrustedMessages};
use crate::events::SessionEvent;
use crate::message::{describe_raw, CrossDAppMessage, MessageType};
use crate::snapshot::{SessionSnapshot, SnapshotStore};
use crate::store::{Detached, SessionState, SessionStore};
use crate::validator::{MaintenanceHandle, SessionValidator};
use async_trait::async_trait;
use freobus_core::{
    BroadcastTransport, FreobusError, FreobusResult, InboundReceiver, MessageSigner, NonceConfig, Origin,
    PhysicalClock, SessionConfig, SessionId, SessionRevalidator, SystemClock, UnifiedSession,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Errors returned by session manager operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// The attachment cap is reached
    #[error("Maximum concurrent sessions reached (limit {limit})")]
    CapacityReached {
        /// Configured cap
        limit: usize,
    },
    /// The session was already dead when offered
    #[error("session {session_id} has already expired")]
    SessionExpired {
        /// Rejected session
        session_id: SessionId,
    },
    /// Lower-level failure
    #[error(transparent)]
    Core(#[from] FreobusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Authenticated,
    Trusted,
}

impl Variant {
    fn as_str(self) -> &'static str {
        match self {
            Variant::Authenticated => "authenticated",
            Variant::Trusted => "trusted",
        }
    }
}

/// Configures and starts a [`SessionManager`]
pub struct SessionManagerBuilder {
    variant: Variant,
    origin: Origin,
    transport: Arc<dyn BroadcastTransport>,
    signer: Option<Arc<dyn MessageSigner>>,
    validator: Option<Arc<SessionValidator>>,
    config: SessionConfig,
    clock: Arc<dyn PhysicalClock>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    event_capacity: Option<usize>,
    nonce_sweep_interval: Duration,
}

impl SessionManagerBuilder {
    /// Override session settings
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the clock (defaults to the system clock)
    pub fn clock(mut self, clock: Arc<dyn PhysicalClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist and restore the session through `store`
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Size of the event buffer per subscriber
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Period of the validator's nonce sweep (authenticated variant)
    pub fn nonce_sweep_interval(mut self, interval: Duration) -> Self {
        self.nonce_sweep_interval = interval;
        self
    }

    /// Start the manager. Must be called inside a Tokio runtime.
    ///
    /// Fails on a configuration the background tasks cannot run with.
    pub async fn build(self) -> Result<SessionManager, SessionError> {
        self.config.validate()?;
        if self.validator.is_some() && self.nonce_sweep_interval.is_zero() {
            return Err(FreobusError::config("nonce sweep interval must be > 0").into());
        }
        let (auth, maintenance): (Arc<dyn MessageAuthenticator>, Option<MaintenanceHandle>) =
            match (self.signer, self.validator) {
                (Some(signer), Some(validator)) => {
                    let sweep = validator.start_maintenance(self.nonce_sweep_interval);
                    let auth = SignedMessages::new(signer, validator, self.clock.clone());
                    (Arc::new(auth), Some(sweep))
                }
                _ => (Arc::new(TrustedMessages), None),
            };
        let capacity_limit =
            (self.variant == Variant::Authenticated).then_some(self.config.max_concurrent_sessions);
        let (events, _) =
            broadcast::channel(self.event_capacity.unwrap_or(self.config.event_capacity).max(1));

        let core = Arc::new(ManagerCore {
            variant: self.variant,
            origin: self.origin,
            store: Mutex::new(SessionStore::new(self.clock.now_ms())),
            transport: self.transport,
            auth,
            capacity_limit,
            config: self.config,
            clock: self.clock,
            events,
            snapshots: self.snapshots,
            wallet_state: Mutex::new(None),
        });
        core.restore_snapshot().await;

        let mut tasks = vec![
            spawn_listener(core.clone(), core.transport.subscribe()),
            spawn_inactivity_monitor(core.clone()),
        ];
        if core.config.auto_refresh {
            tasks.push(spawn_refresher(core.clone()));
        }

        info!(
            origin = %core.origin,
            variant = core.variant.as_str(),
            channel = core.transport.channel_name(),
            "session manager started"
        );
        Ok(SessionManager {
            core,
            tasks: Mutex::new(tasks),
            maintenance: Mutex::new(maintenance),
        })
    }
}

/// Per-context session orchestrator
pub struct SessionManager {
    core: Arc<ManagerCore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl SessionManager {
    /// Builder for the signed, capacity-limited variant
    pub fn authenticated(
        origin: impl Into<Origin>,
        transport: Arc<dyn BroadcastTransport>,
        signer: Arc<dyn MessageSigner>,
        validator: Arc<SessionValidator>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            signer: Some(signer),
            validator: Some(validator),
            ..Self::builder(Variant::Authenticated, origin.into(), transport)
        }
    }

    /// Builder for the unsigned variant used between mutually trusting contexts
    pub fn trusted(
        origin: impl Into<Origin>,
        transport: Arc<dyn BroadcastTransport>,
    ) -> SessionManagerBuilder {
        Self::builder(Variant::Trusted, origin.into(), transport)
    }

    fn builder(
        variant: Variant,
        origin: Origin,
        transport: Arc<dyn BroadcastTransport>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            variant,
            origin,
            transport,
            signer: None,
            validator: None,
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            snapshots: None,
            event_capacity: None,
            nonce_sweep_interval: NonceConfig::default().sweep_interval(),
        }
    }

    /// This context's own origin
    pub fn origin(&self) -> &Origin {
        &self.core.origin
    }

    /// Attach `origin` to `session`, making it the active session
    pub async fn register_dapp(
        &self,
        origin: impl Into<Origin>,
        session: UnifiedSession,
    ) -> Result<(), SessionError> {
        self.core.register_dapp(origin.into(), session).await
    }

    /// Detach `origin` from the active session
    pub async fn unregister_dapp(&self, origin: impl Into<Origin>) {
        self.core.unregister_dapp(origin.into()).await
    }

    /// Re-check the active session on behalf of `origin`
    pub async fn validate_session(&self, session_id: &SessionId, origin: impl Into<Origin>) -> bool {
        self.core.validate_session(session_id, origin.into()).await
    }

    /// End the active session if it is `session_id`
    pub async fn terminate_session(&self, session_id: &SessionId) {
        self.core.terminate_session(session_id).await
    }

    /// Record activity now
    pub fn update_activity(&self) {
        self.core.update_activity()
    }

    /// Extend the active session's expiry to the maximum session duration
    pub async fn refresh_session(&self, session_id: &SessionId) -> Option<UnifiedSession> {
        self.core.refresh_session(session_id).await
    }

    /// Origins attached to the active session
    pub fn get_connected_dapps(&self) -> Vec<Origin> {
        self.core.store.lock().connected_dapps()
    }

    /// The active session, purging it if it has expired
    pub async fn get_active_session(&self) -> Option<UnifiedSession> {
        self.core.active_session().await
    }

    /// Copy of the whole session state
    pub fn get_state(&self) -> SessionState {
        self.core.store.lock().snapshot()
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    /// Apply one raw payload received from another context
    pub async fn handle_inbound(&self, raw: &str) {
        self.core.handle_inbound(raw).await
    }

    /// Wallet-side state persisted alongside the session
    pub fn wallet_state(&self) -> Option<Value> {
        self.core.wallet_state.lock().clone()
    }

    /// Replace the wallet-side state and persist it
    pub async fn set_wallet_state(&self, state: Option<Value>) {
        *self.core.wallet_state.lock() = state;
        self.core.persist().await;
    }

    /// Stop background work and close the transport endpoint
    pub async fn shutdown(&self) {
        self.stop_tasks();
        self.core.transport.close().await;
        info!(origin = %self.core.origin, "session manager stopped");
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(sweep) = self.maintenance.lock().take() {
            sweep.cancel();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("origin", &self.core.origin)
            .field("variant", &self.core.variant)
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionRevalidator for SessionManager {
    async fn revalidate(&self, session_id: &SessionId) -> bool {
        self.core
            .validate_session(session_id, self.core.origin.clone())
            .await
    }
}

struct ManagerCore {
    variant: Variant,
    origin: Origin,
    config: SessionConfig,
    store: Mutex<SessionStore>,
    transport: Arc<dyn BroadcastTransport>,
    auth: Arc<dyn MessageAuthenticator>,
    capacity_limit: Option<usize>,
    clock: Arc<dyn PhysicalClock>,
    events: broadcast::Sender<SessionEvent>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    wallet_state: Mutex<Option<Value>>,
}

impl ManagerCore {
    fn emit(&self, event: SessionEvent) {
        trace!(origin = %self.origin, event = event.name(), "session event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn max_expiry_from(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.config.max_session_duration_ms)
    }

    async fn register_dapp(
        &self,
        origin: Origin,
        mut session: UnifiedSession,
    ) -> Result<(), SessionError> {
        let now = self.clock.now_ms();
        if !session.is_live_at(now) {
            return Err(SessionError::SessionExpired {
                session_id: session.id,
            });
        }
        session.expiry = session.expiry.min(self.max_expiry_from(now));
        session.check_invariants()?;

        let replaced = {
            let mut store = self.store.lock();
            if let Some(limit) = self.capacity_limit {
                let joins_current = store.active_id().map_or(true, |id| id == &session.id);
                if joins_current && !store.is_attached(&origin) && store.attached_count() >= limit {
                    warn!(origin = %origin, limit, "rejecting registration at capacity");
                    return Err(SessionError::CapacityReached { limit });
                }
            }
            store.attach(origin.clone(), session.clone(), now)
        };
        if let Some(previous) = replaced {
            info!(previous = %previous, session_id = %session.id, "active session replaced");
        }
        info!(origin = %origin, session_id = %session.id, "dApp registered");

        let update = CrossDAppMessage::new(MessageType::SessionUpdate, session.id.clone(), origin.clone())
            .with_data("timestamp", now);
        self.broadcast(update).await;
        self.emit(SessionEvent::DAppRegistered { origin, session });
        self.persist().await;
        Ok(())
    }

    async fn unregister_dapp(&self, origin: Origin) {
        let (detached, session_id) = {
            let mut store = self.store.lock();
            let session_id = store.active_id().cloned();
            (store.detach(&origin), session_id)
        };

        if let Some(session_id) = &session_id {
            let terminate =
                CrossDAppMessage::new(MessageType::SessionTerminate, session_id.clone(), origin.clone())
                    .with_data("timestamp", self.clock.now_ms());
            self.broadcast(terminate).await;
        }
        info!(origin = %origin, "dApp unregistered");
        self.emit(SessionEvent::DAppUnregistered {
            origin: origin.clone(),
        });

        match detached {
            Detached::SessionCleared(session_id) => {
                info!(session_id = %session_id, "last dApp left, session cleared");
                self.emit(SessionEvent::SessionTerminated { session_id, origin });
                self.clear_snapshot().await;
            }
            Detached::Removed => self.persist().await,
            Detached::NotAttached => {}
        }
    }

    async fn validate_session(&self, session_id: &SessionId, origin: Origin) -> bool {
        let session = {
            let store = self.store.lock();
            store
                .active_session()
                .filter(|s| &s.id == session_id)
                .cloned()
        };
        let Some(session) = session else {
            debug!(session_id = %session_id, "validation for inactive session");
            return false;
        };

        if !self.auth.check_session(&session, self.clock.now_ms()) {
            info!(session_id = %session_id, "session failed validation, terminating");
            self.terminate_session(session_id).await;
            return false;
        }

        let validate = CrossDAppMessage::new(MessageType::SessionValidate, session_id.clone(), origin)
            .with_data("timestamp", self.clock.now_ms());
        self.broadcast(validate).await;
        true
    }

    async fn terminate_session(&self, session_id: &SessionId) {
        let cleared = {
            let mut store = self.store.lock();
            if !store.is_active(session_id) {
                return;
            }
            store.clear()
        };
        if cleared.is_none() {
            return;
        }
        info!(session_id = %session_id, origin = %self.origin, "session terminated");

        let terminate = CrossDAppMessage::new(
            MessageType::SessionTerminate,
            session_id.clone(),
            self.origin.clone(),
        )
        .with_data("timestamp", self.clock.now_ms());
        self.broadcast(terminate).await;
        self.emit(SessionEvent::SessionTerminated {
            session_id: session_id.clone(),
            origin: self.origin.clone(),
        });
        self.clear_snapshot().await;
    }

    fn update_activity(&self) {
        self.store.lock().touch(self.clock.now_ms());
    }

    async fn refresh_session(&self, session_id: &SessionId) -> Option<UnifiedSession> {
        let now = self.clock.now_ms();
        let expiry = self.max_expiry_from(now);
        let observed = {
            let mut store = self.store.lock();
            store
                .observe(now)
                .map(|live| live.and_then(|_| store.refresh_expiry(session_id, expiry)))
        };
        let refreshed = match observed {
            Ok(refreshed) => refreshed?,
            Err(expired) => {
                self.on_expired(expired).await;
                return None;
            }
        };
        debug!(session_id = %session_id, expiry, "session refreshed");

        let update = CrossDAppMessage::new(
            MessageType::SessionUpdate,
            session_id.clone(),
            self.origin.clone(),
        )
        .with_data("timestamp", now)
        .with_data("expiry", expiry);
        self.broadcast(update).await;
        self.emit(SessionEvent::SessionUpdated {
            session_id: session_id.clone(),
            origin: self.origin.clone(),
        });
        self.persist().await;
        Some(refreshed)
    }

    async fn active_session(&self) -> Option<UnifiedSession> {
        let observed = self.store.lock().observe(self.clock.now_ms());
        match observed {
            Ok(session) => session,
            Err(expired) => {
                self.on_expired(expired).await;
                None
            }
        }
    }

    async fn on_expired(&self, session_id: SessionId) {
        info!(session_id = %session_id, "active session expired");
        self.emit(SessionEvent::SessionExpired { session_id });
        self.clear_snapshot().await;
    }

    async fn handle_inbound(&self, raw: &str) {
        let message = match CrossDAppMessage::from_json(raw) {
            Ok(message) => message,
            Err(err) => {
                let (origin, message_type) = describe_raw(raw);
                warn!(error = %err, "dropping undecodable message");
                self.emit(SessionEvent::InvalidMessage {
                    origin,
                    message_type,
                });
                return;
            }
        };

        if !self.auth.authenticate(&message).await {
            warn!(
                origin = %message.origin,
                message_type = %message.message_type,
                "dropping unauthenticated message"
            );
            self.emit(SessionEvent::InvalidMessage {
                origin: Some(message.origin),
                message_type: Some(message.message_type.to_string()),
            });
            return;
        }

        self.dispatch(message).await;
    }

    async fn dispatch(&self, message: CrossDAppMessage) {
        let now = self.clock.now_ms();
        let CrossDAppMessage {
            message_type,
            session_id,
            origin,
            data,
            ..
        } = message;

        match message_type {
            MessageType::SessionUpdate => {
                let announced_expiry = data
                    .as_ref()
                    .and_then(|d| d.get("expiry"))
                    .and_then(Value::as_u64)
                    .map(|expiry| expiry.min(self.max_expiry_from(now)));
                let adopted = {
                    let mut store = self.store.lock();
                    let adopted = store.adopt_origin(&session_id, origin.clone(), now);
                    if let (true, Some(expiry)) = (adopted, announced_expiry) {
                        store.refresh_expiry(&session_id, expiry);
                    }
                    adopted
                };
                if adopted {
                    trace!(session_id = %session_id, origin = %origin, "remote update applied");
                    self.emit(SessionEvent::SessionUpdated { session_id, origin });
                    self.persist().await;
                }
            }
            MessageType::SessionTerminate => {
                let detached = {
                    let mut store = self.store.lock();
                    store.is_active(&session_id).then(|| store.detach(&origin))
                };
                let Some(detached) = detached else {
                    return;
                };
                trace!(session_id = %session_id, origin = %origin, "remote terminate applied");
                self.emit(SessionEvent::SessionTerminated { session_id, origin });
                match detached {
                    Detached::SessionCleared(_) => self.clear_snapshot().await,
                    Detached::Removed => self.persist().await,
                    Detached::NotAttached => {}
                }
            }
            MessageType::SessionValidate => {
                let active = {
                    let mut store = self.store.lock();
                    let active = store.is_active(&session_id);
                    if active {
                        store.touch(now);
                    }
                    active
                };
                if active {
                    self.emit(SessionEvent::SessionValidated { session_id, origin });
                }
            }
        }
    }

    async fn broadcast(&self, message: CrossDAppMessage) {
        let message_type = message.message_type;
        let result: FreobusResult<()> = async {
            let sealed = self.auth.seal(message).await?;
            self.transport.post(sealed.to_json()?).await
        }
        .await;

        if let Err(err) = result {
            warn!(
                origin = %self.origin,
                message_type = %message_type,
                error = %err,
                "broadcast failed"
            );
            self.emit(SessionEvent::Error {
                message: format!("failed to broadcast {message_type}: {err}"),
            });
        }
    }

    async fn check_inactivity(&self) {
        let now = self.clock.now_ms();
        let idle = Duration::from_millis(self.config.max_inactivity_time_ms);
        let stale = {
            let store = self.store.lock();
            store.active_session().and_then(|session| {
                if !session.is_live_at(now) {
                    Some((session.id.clone(), true))
                } else if self.clock.elapsed_since(store.last_activity()) > idle {
                    Some((session.id.clone(), false))
                } else {
                    None
                }
            })
        };

        match stale {
            Some((session_id, true)) => {
                self.emit(SessionEvent::SessionExpired {
                    session_id: session_id.clone(),
                });
                self.terminate_session(&session_id).await;
            }
            Some((session_id, false)) => {
                info!(session_id = %session_id, "session inactive, terminating");
                self.terminate_session(&session_id).await;
            }
            None => {}
        }
    }

    async fn refresh_if_active(&self) {
        let interval = self.config.refresh_interval();
        let due = {
            let store = self.store.lock();
            store
                .active_id()
                .filter(|_| self.clock.elapsed_since(store.last_activity()) <= interval)
                .cloned()
        };
        if let Some(session_id) = due {
            self.refresh_session(&session_id).await;
        }
    }

    async fn restore_snapshot(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshot = match snapshots.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "discarding unreadable session snapshot");
                self.clear_snapshot().await;
                return;
            }
        };

        let now = self.clock.now_ms();
        *self.wallet_state.lock() = snapshot.wallet_state;
        let restored = match snapshot.current_session {
            Some(session) if session.is_live_at(now) => {
                let session_id = session.id.clone();
                let restored = self
                    .store
                    .lock()
                    .restore(session, snapshot.connected_dapps, now);
                if restored {
                    info!(session_id = %session_id, "session restored from snapshot");
                }
                restored
            }
            _ => false,
        };
        if !restored {
            debug!("discarding stale session snapshot");
            self.clear_snapshot().await;
        }
    }

    async fn persist(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let snapshot = {
            let state = self.store.lock().snapshot();
            SessionSnapshot {
                current_session: state.active_session,
                connected_dapps: state.connected_dapps.into_iter().collect(),
                wallet_state: self.wallet_state.lock().clone(),
            }
        };
        if let Err(err) = snapshots.save(&snapshot).await {
            warn!(error = %err, "failed to persist session snapshot");
        }
    }

    async fn clear_snapshot(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let wallet_state = self.wallet_state.lock().clone();
        let result = match wallet_state {
            Some(wallet_state) => {
                snapshots
                    .save(&SessionSnapshot {
                        wallet_state: Some(wallet_state),
                        ..SessionSnapshot::default()
                    })
                    .await
            }
            None => snapshots.clear().await,
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to clear session snapshot");
        }
    }
}

fn spawn_listener(core: Arc<ManagerCore>, mut inbound: InboundReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(raw) = inbound.recv().await {
            core.handle_inbound(&raw).await;
        }
        debug!(origin = %core.origin, "inbound channel closed");
    })
}

fn spawn_inactivity_monitor(core: Arc<ManagerCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(core.config.activity_check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            core.check_inactivity().await;
        }
    })
}

fn spawn_refresher(core: Arc<ManagerCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = core.config.refresh_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            core.refresh_if_active().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalBroadcastHub;
    use assert_matches::assert_matches;
    use freobus_core::TokioClock;
    use freobus_testkit::{sample_session, sample_session_with_id, FailingTransport};

    async fn trusted(hub: &LocalBroadcastHub, origin: &str, clock: TokioClock) -> SessionManager {
        SessionManager::trusted(origin, Arc::new(hub.open("test")))
            .clock(Arc::new(clock))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn register_sets_state_and_emits() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = trusted(&hub, "https://host.app", clock).await;
        let mut events = manager.subscribe();

        let session = sample_session(clock.now_ms());
        manager
            .register_dapp("https://dapp.com", session.clone())
            .await
            .unwrap();

        assert_eq!(manager.get_active_session().await, Some(session.clone()));
        assert_eq!(manager.get_connected_dapps(), vec![Origin::from("https://dapp.com")]);
        assert_matches!(
            events.recv().await.unwrap(),
            SessionEvent::DAppRegistered { origin, .. } if origin.as_str() == "https://dapp.com"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_cannot_be_registered() {
        let clock = TokioClock::anchored_at(10_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = trusted(&hub, "https://host.app", clock).await;
        let mut session = sample_session(1_000);
        session.expiry = 2_000;

        assert_matches!(
            manager.register_dapp("https://dapp.com", session).await,
            Err(SessionError::SessionExpired { .. })
        );
        assert!(manager.get_state().active_session.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_clamped_to_max_duration() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = trusted(&hub, "https://host.app", clock).await;
        let mut session = sample_session(clock.now_ms());
        session.expiry = clock.now_ms() + 10 * 24 * 60 * 60 * 1000;

        manager.register_dapp("https://dapp.com", session).await.unwrap();
        let active = manager.get_active_session().await.unwrap();
        assert_eq!(
            active.expiry,
            clock.now_ms() + SessionConfig::default().max_session_duration_ms
        );
    }

    #[tokio::test(start_paused = true)]
    async fn trusted_variant_has_no_capacity_limit() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = SessionManager::trusted("https://host.app", Arc::new(hub.open("test")))
            .clock(Arc::new(clock))
            .config(SessionConfig {
                max_concurrent_sessions: 1,
                ..SessionConfig::default()
            })
            .build()
            .await
            .unwrap();

        for n in 0..3 {
            manager
                .register_dapp(format!("https://dapp{n}.com"), sample_session(clock.now_ms()))
                .await
                .unwrap();
        }
        assert_eq!(manager.get_connected_dapps().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_session_replaces_attachments() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = trusted(&hub, "https://host.app", clock).await;
        let now = clock.now_ms();

        manager
            .register_dapp("https://a.app", sample_session_with_id("one", now))
            .await
            .unwrap();
        manager
            .register_dapp("https://b.app", sample_session_with_id("two", now))
            .await
            .unwrap();

        let state = manager.get_state();
        assert_eq!(state.active_session.unwrap().id, SessionId::new("two"));
        assert_eq!(manager.get_connected_dapps(), vec![Origin::from("https://b.app")]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_other_session_is_noop() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = trusted(&hub, "https://host.app", clock).await;
        manager
            .register_dapp("https://a.app", sample_session(clock.now_ms()))
            .await
            .unwrap();

        manager.terminate_session(&SessionId::new("other")).await;
        assert!(manager.get_state().active_session.is_some());

        manager.terminate_session(&SessionId::new("test-session")).await;
        let state = manager.get_state();
        assert!(state.active_session.is_none());
        assert!(state.connected_dapps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_failure_becomes_error_event() {
        let clock = TokioClock::anchored_at(1_000_000);
        let transport = Arc::new(FailingTransport::new("channel closed"));
        let manager = SessionManager::trusted("https://host.app", transport.clone())
            .clock(Arc::new(clock))
            .build()
            .await
            .unwrap();
        let mut events = manager.subscribe();

        manager
            .register_dapp("https://a.app", sample_session(clock.now_ms()))
            .await
            .unwrap();

        assert_matches!(
            events.recv().await.unwrap(),
            SessionEvent::Error { message } if message.contains("channel closed")
        );
        assert_matches!(events.recv().await.unwrap(), SessionEvent::DAppRegistered { .. });
        assert_eq!(transport.attempts(), 1);
        assert_eq!(manager.get_connected_dapps().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_expiry() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = trusted(&hub, "https://host.app", clock).await;
        let session = sample_session(clock.now_ms());
        manager.register_dapp("https://a.app", session.clone()).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        let refreshed = manager.refresh_session(&session.id).await.unwrap();
        assert_eq!(
            refreshed.expiry,
            clock.now_ms() + SessionConfig::default().max_session_duration_ms
        );
        assert!(manager.refresh_session(&SessionId::new("other")).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_active_session_is_purged_on_read() {
        let clock = TokioClock::anchored_at(1_000_000);
        let hub = LocalBroadcastHub::new();
        let manager = SessionManager::trusted("https://host.app", Arc::new(hub.open("test")))
            .clock(Arc::new(clock))
            .config(SessionConfig {
                activity_check_interval_ms: 24 * 60 * 60 * 1000,
                max_inactivity_time_ms: 24 * 60 * 60 * 1000,
                ..SessionConfig::default()
            })
            .build()
            .await
            .unwrap();
        let mut events = manager.subscribe();
        let session = sample_session(clock.now_ms());
        manager.register_dapp("https://a.app", session.clone()).await.unwrap();
        let _ = events.recv().await;

        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(manager.get_active_session().await, None);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SessionExpired {
                session_id: session.id
            }
        );
        assert!(manager.get_connected_dapps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_periods_are_rejected_at_build() {
        let hub = LocalBroadcastHub::new();
        let zero_check = SessionManager::trusted("https://host.app", Arc::new(hub.open("test")))
            .config(SessionConfig {
                activity_check_interval_ms: 0,
                ..SessionConfig::default()
            })
            .build()
            .await;
        assert_matches!(zero_check, Err(SessionError::Core(FreobusError::Config { .. })));

        let validator = Arc::new(SessionValidator::new(
            &NonceConfig::default(),
            Arc::new(freobus_core::Ed25519MessageVerifier),
            Arc::new(SystemClock),
        ));
        let zero_sweep = SessionManager::authenticated(
            "https://host.app",
            Arc::new(hub.open("test")),
            Arc::new(freobus_testkit::test_signer(1)),
            validator,
        )
        .nonce_sweep_interval(Duration::ZERO)
        .build()
        .await;
        assert_matches!(zero_sweep, Err(SessionError::Core(FreobusError::Config { .. })));
        assert_eq!(hub.subscriber_count("test"), 0);
    }
}
