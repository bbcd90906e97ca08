//! Ed25519 message signing.
//!
//! Signatures are self-describing so the signer can be recovered without a
//! key registry, mirroring wallet `personal_sign` semantics:
//!
//! ```text
//! <hex verifying key (32 bytes)>.<hex signature (64 bytes)>
//! ```
//!
//! The signer address is `0x` followed by the first 20 bytes of
//! `blake3(verifying key)`, hex encoded.

use crate::effects::{MessageSigner, SignatureVerifier};
use crate::errors::{FreobusError, FreobusResult};
use crate::types::SignerAddress;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

const ADDRESS_LEN: usize = 20;

/// Derive the address of a verifying key
pub fn address_of(key: &VerifyingKey) -> SignerAddress {
    let digest = blake3::hash(key.as_bytes());
    SignerAddress::new(format!(
        "0x{}",
        hex::encode(&digest.as_bytes()[..ADDRESS_LEN])
    ))
}

/// Signs broadcast payloads with a local Ed25519 key
pub struct Ed25519MessageSigner {
    key: SigningKey,
}

impl Ed25519MessageSigner {
    /// Generate a fresh key from the OS RNG
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            key: SigningKey::generate(&mut rng),
        }
    }

    /// Use a fixed 32-byte secret
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Address other contexts will recover from this signer's signatures
    pub fn address(&self) -> SignerAddress {
        address_of(&self.key.verifying_key())
    }
}

impl std::fmt::Debug for Ed25519MessageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519MessageSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSigner for Ed25519MessageSigner {
    async fn sign_message(&self, payload: &str) -> FreobusResult<String> {
        let signature = self.key.sign(payload.as_bytes());
        Ok(format!(
            "{}.{}",
            hex::encode(self.key.verifying_key().as_bytes()),
            hex::encode(signature.to_bytes())
        ))
    }
}

/// Verifies self-describing Ed25519 signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519MessageVerifier;

impl Ed25519MessageVerifier {
    fn decode(signature: &str) -> FreobusResult<(VerifyingKey, Signature)> {
        let (key_hex, sig_hex) = signature
            .split_once('.')
            .ok_or_else(|| FreobusError::crypto("signature is missing the key separator"))?;

        let key_bytes: [u8; 32] = hex::decode(key_hex)
            .map_err(|e| FreobusError::crypto(format!("verifying key is not hex: {e}")))?
            .try_into()
            .map_err(|_| FreobusError::crypto("verifying key must be 32 bytes"))?;
        let sig_bytes: [u8; 64] = hex::decode(sig_hex)
            .map_err(|e| FreobusError::crypto(format!("signature is not hex: {e}")))?
            .try_into()
            .map_err(|_| FreobusError::crypto("signature must be 64 bytes"))?;

        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| FreobusError::crypto(format!("invalid verifying key: {e}")))?;
        Ok((key, Signature::from_bytes(&sig_bytes)))
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519MessageVerifier {
    async fn verify_message(&self, message: &str, signature: &str) -> FreobusResult<SignerAddress> {
        let (key, signature) = Self::decode(signature)?;
        key.verify_strict(message.as_bytes(), &signature)
            .map_err(|e| FreobusError::crypto(format!("signature mismatch: {e}")))?;
        Ok(address_of(&key))
    }
}
