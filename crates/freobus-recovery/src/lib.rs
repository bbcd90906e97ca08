//! Freobus Recovery
//!
//! Generic retry engine for failures reported by the session layer and the
//! wallet integration. What is retried is pluggable per category through
//! [`RecoveryAction`]; how often and with what backoff comes from
//! [`freobus_core::RecoveryStrategy`].

pub mod actions;
pub mod errors;
pub mod record;
pub mod service;

pub use actions::{
    ConnectivityProbe, NetworkRecovery, OnlineFlag, RecoveryAction, SessionRecovery,
    WalletRecovery, WalletReconnect,
};
pub use errors::RecoveryError;
pub use record::{ErrorContext, ErrorRecord};
pub use service::{ErrorRecoveryService, FailureReason, RecoveryEvent, RecoveryServiceBuilder};
