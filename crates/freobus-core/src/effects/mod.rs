//! Effect traits
//!
//! Capabilities the coordination layer consumes but does not implement
//! itself. Each trait is a seam: production handlers live in
//! [`crate::handlers`], deterministic ones in `freobus-testkit`.
//!
//! - [`PhysicalClock`]: wall-clock time for expiry, activity and nonce windows
//! - [`MessageSigner`] / [`SignatureVerifier`]: wallet signing capability and
//!   signer recovery
//! - [`BroadcastTransport`]: same-origin publish/subscribe between contexts
//! - [`SessionRevalidator`]: lets the recovery layer re-check a session

pub mod channel;
pub mod crypto;
pub mod session;
pub mod time;

pub use channel::{BroadcastTransport, InboundReceiver};
pub use crypto::{MessageSigner, SignatureVerifier};
pub use session::SessionRevalidator;
pub use time::PhysicalClock;
