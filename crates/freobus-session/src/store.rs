//! Session Store
//!
//! The per-context record of the single active session, the origins attached
//! to it and the last validated activity. Only the owning session manager
//! writes to it; every mutation keeps two invariants:
//!
//! - no origins attached ⇒ no active session
//! - origins attached ⇒ an active session exists

use freobus_core::{Origin, SessionId, UnifiedSession};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Point-in-time copy of the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// The active session, if any
    pub active_session: Option<UnifiedSession>,
    /// Origins attached to the active session
    #[serde(rename = "connectedDApps")]
    pub connected_dapps: BTreeSet<Origin>,
    /// Most recent validated activity (epoch ms)
    pub last_activity: u64,
}

/// Outcome of detaching an origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detached {
    /// Origin was not attached
    NotAttached,
    /// Origin removed; other origins remain
    Removed,
    /// Last origin removed; the session was cleared
    SessionCleared(SessionId),
}

/// Mutable session state owned by one manager
#[derive(Debug)]
pub struct SessionStore {
    active_session: Option<UnifiedSession>,
    connected_dapps: BTreeSet<Origin>,
    last_activity: u64,
}

impl SessionStore {
    /// Empty store with activity stamped at `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self {
            active_session: None,
            connected_dapps: BTreeSet::new(),
            last_activity: now_ms,
        }
    }

    /// Id of the active session
    pub fn active_id(&self) -> Option<&SessionId> {
        self.active_session.as_ref().map(|s| &s.id)
    }

    /// True if `session_id` is the active session
    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active_id() == Some(session_id)
    }

    /// Active session without any expiry check
    pub fn active_session(&self) -> Option<&UnifiedSession> {
        self.active_session.as_ref()
    }

    /// Number of attached origins
    pub fn attached_count(&self) -> usize {
        self.connected_dapps.len()
    }

    /// True if `origin` is attached
    pub fn is_attached(&self, origin: &Origin) -> bool {
        self.connected_dapps.contains(origin)
    }

    /// Last activity stamp
    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    /// Attach `origin` to `session`, making it the active session.
    ///
    /// A different session replaces the current one together with its
    /// attachments; returns the replaced session's id.
    pub fn attach(
        &mut self,
        origin: Origin,
        session: UnifiedSession,
        now_ms: u64,
    ) -> Option<SessionId> {
        let replaced = match &self.active_session {
            Some(current) if current.id != session.id => {
                self.connected_dapps.clear();
                Some(current.id.clone())
            }
            _ => None,
        };
        self.connected_dapps.insert(origin);
        self.active_session = Some(session);
        self.last_activity = now_ms;
        replaced
    }

    /// Attach `origin` to the active session announced by another context.
    /// Returns false if `session_id` is not active.
    pub fn adopt_origin(&mut self, session_id: &SessionId, origin: Origin, now_ms: u64) -> bool {
        if !self.is_active(session_id) {
            return false;
        }
        self.connected_dapps.insert(origin);
        self.last_activity = now_ms;
        true
    }

    /// Remove `origin`, clearing the session if it was the last one
    pub fn detach(&mut self, origin: &Origin) -> Detached {
        if !self.connected_dapps.remove(origin) {
            return Detached::NotAttached;
        }
        if self.connected_dapps.is_empty() {
            if let Some(session) = self.active_session.take() {
                return Detached::SessionCleared(session.id);
            }
        }
        Detached::Removed
    }

    /// Drop the active session and all attachments
    pub fn clear(&mut self) -> Option<UnifiedSession> {
        self.connected_dapps.clear();
        self.active_session.take()
    }

    /// Record activity
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity = now_ms;
    }

    /// Move the active session's expiry. Returns the updated session.
    pub fn refresh_expiry(&mut self, session_id: &SessionId, expiry: u64) -> Option<UnifiedSession> {
        let session = self.active_session.as_mut().filter(|s| &s.id == session_id)?;
        session.expiry = expiry;
        Some(session.clone())
    }

    /// Reinstate a session and its attachments, e.g. from a snapshot.
    /// Ignored when no origins are given.
    pub fn restore(
        &mut self,
        session: UnifiedSession,
        origins: impl IntoIterator<Item = Origin>,
        now_ms: u64,
    ) -> bool {
        let origins: BTreeSet<Origin> = origins.into_iter().collect();
        if origins.is_empty() {
            return false;
        }
        self.active_session = Some(session);
        self.connected_dapps = origins;
        self.last_activity = now_ms;
        true
    }

    /// The active session if still live at `now_ms`; a dead one is purged
    /// and its id returned as the error.
    pub fn observe(&mut self, now_ms: u64) -> Result<Option<UnifiedSession>, SessionId> {
        match &self.active_session {
            Some(session) if !session.is_live_at(now_ms) => {
                let id = session.id.clone();
                self.clear();
                Err(id)
            }
            other => Ok(other.clone()),
        }
    }

    /// Snapshot of attached origins
    pub fn connected_dapps(&self) -> Vec<Origin> {
        self.connected_dapps.iter().cloned().collect()
    }

    /// Copy of the whole state
    pub fn snapshot(&self) -> SessionState {
        SessionState {
            active_session: self.active_session.clone(),
            connected_dapps: self.connected_dapps.clone(),
            last_activity: self.last_activity,
        }
    }

    #[cfg(test)]
    fn invariants_hold(&self) -> bool {
        self.connected_dapps.is_empty() == self.active_session.is_none()
    }
}
