//! AES-256-GCM sealing for session traffic.
//!
//! Sealed layout: `nonce (12) || ciphertext || tag (16)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::kdf::SessionKey;
use crate::crypto::{CryptoError, CryptoResult};

/// AES-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-GCM tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed payload.
///
/// Every failure, including a payload too short to hold nonce and tag,
/// reports [`CryptoError::AuthenticationFailed`].
pub fn open(key: &SessionKey, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::derive_session_key;
    use crate::crypto::keys::{EphemeralKeyPair, PeerPublicKey};

    fn key(device: &str) -> SessionKey {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let peer = PeerPublicKey::from_sec1_bytes(&b.public_key_bytes()).unwrap();
        derive_session_key(&a.diffie_hellman(&peer), device, b"nonce", 10)
    }

    #[test]
    fn roundtrip_across_sizes() {
        let key = key("d");
        for size in [0usize, 1, 15, 16, 17, 1024, 64 * 1024] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let sealed = seal(&key, &plaintext).unwrap();
            assert_eq!(sealed.len(), NONCE_LEN + size + TAG_LEN);
            assert_eq!(open(&key, &sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonces_differ_per_message() {
        let key = key("d");
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn wrong_key_and_tamper_are_indistinguishable() {
        let key_a = key("a");
        let key_b = key("b");
        let sealed = seal(&key_a, b"payload").unwrap();

        assert_eq!(open(&key_b, &sealed), Err(CryptoError::AuthenticationFailed));

        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert_eq!(open(&key_a, &tampered), Err(CryptoError::AuthenticationFailed));

        assert_eq!(open(&key_a, &sealed[..10]), Err(CryptoError::AuthenticationFailed));
    }
}
