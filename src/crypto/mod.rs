//! Cryptographic primitives for the pairing protocol.
//!
//! # Data Flow
//! ```text
//! initiate:  keys.rs (ephemeral P-256 pair)
//! response:  keys.rs (peer key parse, ECDSA ownership proof)
//!     → keys.rs (ECDH shared secret)
//!     → kdf.rs (PBKDF2-HMAC-SHA256 → 256-bit session key)
//! traffic:   aead.rs (AES-256-GCM, random 96-bit nonce per message)
//! auth:      signature.rs (Ed25519 challenge verification)
//!            identity.rs (relay long-term Ed25519 key)
//! ```
//!
//! # Security Constraints
//! - Private scalars, shared secrets and session keys zeroize on drop
//! - Decryption failures never reveal whether the key or the data was wrong
//! - Key material is never logged

pub mod aead;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod signature;

use thiserror::Error;

pub use identity::RelayIdentity;
pub use kdf::SessionKey;
pub use keys::{EphemeralKeyPair, PeerPublicKey, SharedSecret};

/// Errors produced by the cryptographic primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// A public key could not be parsed or is not on the curve.
    #[error("invalid key")]
    InvalidKey,

    /// AEAD tag check failed (wrong key, tampered or truncated ciphertext).
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A signature was malformed or did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// The cipher refused to encrypt (payload beyond algorithm limits).
    #[error("encryption failed")]
    Encryption,

    /// The relay identity key could not be loaded.
    #[error("identity error: {0}")]
    Identity(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
