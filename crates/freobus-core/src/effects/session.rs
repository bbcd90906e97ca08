//! Session revalidation effect, consumed by error recovery.

use crate::types::SessionId;
use async_trait::async_trait;

/// Something that can re-check whether a session is still valid
#[async_trait]
pub trait SessionRevalidator: Send + Sync {
    /// Re-validate `session_id`; true if it is still the live active session
    async fn revalidate(&self, session_id: &SessionId) -> bool;
}
