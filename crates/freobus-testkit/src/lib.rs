//! Freobus Testkit
//!
//! Deterministic fixtures shared by the Freobus test suites: a hand-driven
//! clock, transports and signers that fail on demand, a scripted session
//! revalidator and canned sessions.

#![allow(clippy::unwrap_used, clippy::expect_used)]

pub mod clock;
pub mod fixtures;
pub mod mocks;

pub use clock::ManualClock;
pub use fixtures::{sample_session, sample_session_with_id, test_signer};
pub use mocks::{FailingSigner, FailingTransport, ScriptedRevalidator};
