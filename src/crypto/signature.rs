//! Ed25519 verification for the post-exchange authentication challenge.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::crypto::{CryptoError, CryptoResult};

/// Length of an Ed25519 public key.
pub const IDENTITY_KEY_LEN: usize = 32;

/// A device's long-term Ed25519 identity key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityKey(VerifyingKey);

impl IdentityKey {
    /// Parse a raw 32-byte Ed25519 public key.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let raw: [u8; IDENTITY_KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        VerifyingKey::from_bytes(&raw)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_KEY_LEN] {
        self.0.as_bytes()
    }

    /// Strict Ed25519 verification (rejects small-order keys and malleable signatures).
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        self.0
            .verify_strict(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}
