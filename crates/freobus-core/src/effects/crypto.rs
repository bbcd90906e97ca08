//! Message signing and verification effects.

use crate::errors::FreobusResult;
use crate::types::SignerAddress;
use async_trait::async_trait;
use std::sync::Arc;

/// Wallet signing capability used to authenticate outbound broadcasts
#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// Sign `payload`, returning an encoded signature
    async fn sign_message(&self, payload: &str) -> FreobusResult<String>;
}

/// Recovers the signer of a message.
///
/// Fails on malformed signatures or when the signature does not cover
/// `message`.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` over `message` and return the signing address
    async fn verify_message(&self, message: &str, signature: &str) -> FreobusResult<SignerAddress>;
}

#[async_trait]
impl<T: MessageSigner + ?Sized> MessageSigner for Arc<T> {
    async fn sign_message(&self, payload: &str) -> FreobusResult<String> {
        (**self).sign_message(payload).await
    }
}

#[async_trait]
impl<T: SignatureVerifier + ?Sized> SignatureVerifier for Arc<T> {
    async fn verify_message(&self, message: &str, signature: &str) -> FreobusResult<SignerAddress> {
        (**self).verify_message(message, signature).await
    }
}
