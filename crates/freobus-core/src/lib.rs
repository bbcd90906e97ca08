//! Freobus Core
//!
//! Foundation crate for cross-dApp session coordination. Everything that more
//! than one Freobus crate needs lives here:
//!
//! - **Types**: [`SessionId`], [`Origin`], [`UnifiedSession`], [`SessionProof`]
//! - **Errors**: the unified [`FreobusError`]
//! - **Configuration**: [`FreobusConfig`] and its sections, loadable from TOML
//! - **Effects**: trait seams for the capabilities the coordination layer
//!   consumes but does not own (clock, message signing, signature
//!   verification, cross-context broadcast, session revalidation)
//! - **Handlers**: production implementations of those effects
//!
//! Higher crates depend on the effect traits only; concrete handlers are
//! injected by whoever owns the application root.

pub mod config;
pub mod effects;
pub mod errors;
pub mod handlers;
pub mod types;

pub use config::{
    ChannelConfig, FreobusConfig, NonceConfig, RecoveryConfig, RecoveryStrategy, SessionConfig,
};
pub use effects::{
    BroadcastTransport, InboundReceiver, MessageSigner, PhysicalClock, SessionRevalidator,
    SignatureVerifier,
};
pub use errors::{FreobusError, FreobusResult};
pub use handlers::{Ed25519MessageSigner, Ed25519MessageVerifier, SystemClock, TokioClock};
pub use types::{Origin, SessionId, SessionProof, SignerAddress, UnifiedSession, MAX_SAFE_NONCE};
