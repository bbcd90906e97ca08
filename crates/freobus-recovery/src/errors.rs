//! Recovery errors.

use freobus_core::FreobusError;
use thiserror::Error;

/// Why a single recovery attempt failed
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The error context lacks what the action needs
    #[error("error context has no {field}")]
    MissingContext {
        /// Missing context field
        field: &'static str,
    },
    /// No action is registered for the category
    #[error("no recovery action for {error_type}")]
    NoAction {
        /// Category without an action
        error_type: String,
    },
    /// The underlying capability failed
    #[error(transparent)]
    Core(#[from] FreobusError),
}
