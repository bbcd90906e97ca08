//! Production effect handlers.

pub mod clock;
pub mod ed25519;

pub use clock::{SystemClock, TokioClock};
pub use ed25519::{Ed25519MessageSigner, Ed25519MessageVerifier};
