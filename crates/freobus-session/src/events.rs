//! Observable session events.

use freobus_core::{Origin, SessionId, UnifiedSession};
use serde::Serialize;

/// Notification emitted by a session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    /// An origin was attached locally
    #[serde(rename = "dAppRegistered")]
    DAppRegistered {
        /// Attached origin
        origin: Origin,
        /// Session it was attached to
        session: UnifiedSession,
    },
    /// An origin was detached locally
    #[serde(rename = "dAppUnregistered")]
    DAppUnregistered {
        /// Detached origin
        origin: Origin,
    },
    /// Another context attached an origin to the active session, or the
    /// session was refreshed
    #[serde(rename_all = "camelCase")]
    SessionUpdated {
        /// Session affected
        session_id: SessionId,
        /// Origin named by the update
        origin: Origin,
    },
    /// The active session ended or lost an origin
    #[serde(rename_all = "camelCase")]
    SessionTerminated {
        /// Session affected
        session_id: SessionId,
        /// Origin that left or ended the session
        origin: Origin,
    },
    /// Another context re-validated the active session
    #[serde(rename_all = "camelCase")]
    SessionValidated {
        /// Session affected
        session_id: SessionId,
        /// Origin that validated
        origin: Origin,
    },
    /// The active session was found past its expiry and purged
    #[serde(rename_all = "camelCase")]
    SessionExpired {
        /// Session purged
        session_id: SessionId,
    },
    /// An inbound message was dropped
    #[serde(rename_all = "camelCase")]
    InvalidMessage {
        /// Origin claimed by the message, if readable
        origin: Option<Origin>,
        /// Type claimed by the message, if readable
        message_type: Option<String>,
    },
    /// A background or broadcast step failed
    Error {
        /// What went wrong
        message: String,
    },
}

impl SessionEvent {
    /// Event name as seen by listeners
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::DAppRegistered { .. } => "dAppRegistered",
            SessionEvent::DAppUnregistered { .. } => "dAppUnregistered",
            SessionEvent::SessionUpdated { .. } => "sessionUpdated",
            SessionEvent::SessionTerminated { .. } => "sessionTerminated",
            SessionEvent::SessionValidated { .. } => "sessionValidated",
            SessionEvent::SessionExpired { .. } => "sessionExpired",
            SessionEvent::InvalidMessage { .. } => "invalidMessage",
            SessionEvent::Error { .. } => "error",
        }
    }
}
