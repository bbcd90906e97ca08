//! Freobus Session
//!
//! Cross-dApp session coordination for one browser context:
//!
//! - [`NonceLedger`]: single-use tokens with a retention window
//! - [`SessionValidator`]: session liveness and signed-proof checks
//! - [`SessionStore`]: the active session and its attached origins
//! - [`SessionManager`]: orchestration plus authenticated broadcast to the
//!   other contexts sharing the channel
//! - [`WalletSessionRegistry`]: the wallet's per-origin grants that a unified
//!   session's `wallet_session_id` points at
//!
//! Contexts never share memory; each one is authoritative for its own view
//! and reconciles with the others through [`CrossDAppMessage`]s.

pub mod auth;
pub mod channel;
pub mod events;
pub mod manager;
pub mod message;
pub mod nonce;
pub mod snapshot;
pub mod store;
pub mod validator;
pub mod wallet_sessions;

pub use auth::{MessageAuthenticator, SignedMessages, TrustedMessages};
pub use channel::{LocalBroadcastChannel, LocalBroadcastHub};
pub use events::SessionEvent;
pub use manager::{SessionError, SessionManager, SessionManagerBuilder};
pub use message::{CrossDAppMessage, MessageType};
pub use nonce::NonceLedger;
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SessionSnapshot, SnapshotStore};
pub use store::{Detached, SessionState, SessionStore};
pub use validator::{MaintenanceHandle, SessionValidator};
pub use wallet_sessions::{
    Account, DAppPermissions, PermissionsUpdate, ShareError, ShareRequest, WalletSession,
    WalletSessionEvent, WalletSessionRegistry,
};
