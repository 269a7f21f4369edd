//! Relay long-term identity.
//!
//! # Security
//! - The secret is loaded from an environment variable or generated per process
//! - Keys are never logged or serialized
//! - The signing key wipes itself on drop

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::crypto::{CryptoError, CryptoResult};

/// Environment variable holding the hex-encoded 32-byte Ed25519 seed.
pub const IDENTITY_KEY_ENV_VAR: &str = "RELAY_IDENTITY_KEY";

/// The relay's Ed25519 identity. Its public half is sent in every
/// key-exchange init and auth challenge so devices can pin it.
pub struct RelayIdentity {
    signing_key: SigningKey,
}

impl RelayIdentity {
    /// Load an identity from a hex seed (with or without `0x`).
    pub fn from_hex(seed_hex: &str) -> CryptoResult<Self> {
        let seed_hex = seed_hex.trim();
        let seed_hex = seed_hex.strip_prefix("0x").unwrap_or(seed_hex);

        let bytes = hex::decode(seed_hex)
            .map_err(|e| CryptoError::Identity(format!("Invalid identity key format: {}", e)))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::Identity(format!(
                "Invalid identity key length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;

        let identity = Self {
            signing_key: SigningKey::from_bytes(&seed),
        };
        tracing::info!(public_key = %identity.public_key_hex(), "Relay identity loaded");
        Ok(identity)
    }

    /// Load the identity from `RELAY_IDENTITY_KEY`.
    pub fn from_env() -> CryptoResult<Self> {
        let seed = std::env::var(IDENTITY_KEY_ENV_VAR).map_err(|_| {
            CryptoError::Identity(format!("Environment variable {} not set", IDENTITY_KEY_ENV_VAR))
        })?;
        Self::from_hex(&seed)
    }

    /// Generate a throwaway identity. Devices that pinned a previous
    /// identity will reject it, so this is for development only.
    pub fn generate() -> Self {
        let identity = Self {
            signing_key: SigningKey::generate(&mut OsRng),
        };
        tracing::warn!(
            public_key = %identity.public_key_hex(),
            "Generated ephemeral relay identity; set {} to keep it stable",
            IDENTITY_KEY_ENV_VAR
        );
        identity
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Hex public key for logs and the admin surface.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign a handshake transcript.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for RelayIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayIdentity")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signature::IdentityKey;

    const TEST_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn test_identity_from_hex() {
        let identity = RelayIdentity::from_hex(TEST_SEED).unwrap();
        // RFC 8032 test vector 1
        assert_eq!(
            identity.public_key_hex(),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
    }

    #[test]
    fn test_identity_with_0x_prefix() {
        let a = RelayIdentity::from_hex(TEST_SEED).unwrap();
        let b = RelayIdentity::from_hex(&format!("0x{}", TEST_SEED)).unwrap();
        assert_eq!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_invalid_identity_key() {
        let err = RelayIdentity::from_hex("not-hex").unwrap_err();
        assert!(err.to_string().contains("Invalid identity key format"));

        let err = RelayIdentity::from_hex("abcd").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn test_signature_verifies_with_public_key() {
        let identity = RelayIdentity::generate();
        let signature = identity.sign(b"transcript");
        let key = IdentityKey::from_bytes(&identity.public_key_bytes()).unwrap();
        assert!(key.verify(b"transcript", &signature).is_ok());
    }

    #[test]
    fn test_debug_hides_secret() {
        let identity = RelayIdentity::from_hex(TEST_SEED).unwrap();
        let debug = format!("{:?}", identity);
        assert!(!debug.contains(TEST_SEED));
        assert!(debug.contains("public_key"));
    }
}
