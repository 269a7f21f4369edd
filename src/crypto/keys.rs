//! Ephemeral P-256 key pairs and ECDH key agreement.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{CryptoError, CryptoResult};

/// Length of an uncompressed SEC1 P-256 public key.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Single-session P-256 key pair.
///
/// The secret scalar is wiped when the pair is dropped (`SecretKey` is
/// `ZeroizeOnDrop`). Not `Clone` and not `Debug`.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh key pair from OS entropy.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Uncompressed SEC1 encoding of the public half.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Compute the ECDH shared secret with a peer.
    pub fn diffie_hellman(&self, peer: &PeerPublicKey) -> SharedSecret {
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.key.as_affine());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(shared.raw_secret_bytes());
        SharedSecret(bytes)
    }

    /// ECDSA-sign `message` (SHA-256 digest) with this pair's secret.
    ///
    /// Returns the fixed 64-byte `r || s` encoding.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(message);
        signature.to_bytes().to_vec()
    }
}

/// A peer's P-256 public key, validated on construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerPublicKey {
    key: PublicKey,
    encoded: Vec<u8>,
}

impl PeerPublicKey {
    /// Parse a SEC1-encoded (compressed or uncompressed) point.
    pub fn from_sec1_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let key = PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            key,
            encoded: key.to_encoded_point(false).as_bytes().to_vec(),
        })
    }

    /// Uncompressed SEC1 encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Verify an ECDSA P-256 signature made by the holder of this key.
    ///
    /// Accepts both the fixed 64-byte and the ASN.1 DER encodings.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        let signature = Signature::from_slice(signature)
            .or_else(|_| Signature::from_der(signature))
            .map_err(|_| CryptoError::InvalidSignature)?;
        let verifying_key =
            VerifyingKey::from_sec1_bytes(&self.encoded).map_err(|_| CryptoError::InvalidKey)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Raw ECDH output. Only ever fed into the KDF.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Raw 32-byte x-coordinate of the shared point.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree_on_shared_secret() {
        let relay = EphemeralKeyPair::generate();
        let device = EphemeralKeyPair::generate();

        let relay_view = PeerPublicKey::from_sec1_bytes(&device.public_key_bytes()).unwrap();
        let device_view = PeerPublicKey::from_sec1_bytes(&relay.public_key_bytes()).unwrap();

        let a = relay.diffie_hellman(&relay_view);
        let b = device.diffie_hellman(&device_view);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn public_key_is_uncompressed_sec1() {
        let pair = EphemeralKeyPair::generate();
        let bytes = pair.public_key_bytes();
        assert_eq!(bytes.len(), PUBLIC_KEY_LEN);
        assert_eq!(bytes[0], 0x04);
    }

    #[test]
    fn malformed_peer_key_is_invalid() {
        assert_eq!(
            PeerPublicKey::from_sec1_bytes(&[0x04; 65]),
            Err(CryptoError::InvalidKey)
        );
        assert_eq!(PeerPublicKey::from_sec1_bytes(b""), Err(CryptoError::InvalidKey));
    }

    #[test]
    fn signature_roundtrip_and_tamper() {
        let pair = EphemeralKeyPair::generate();
        let peer = PeerPublicKey::from_sec1_bytes(&pair.public_key_bytes()).unwrap();
        let signature = pair.sign(b"transcript");

        assert!(peer.verify(b"transcript", &signature).is_ok());
        assert_eq!(
            peer.verify(b"other transcript", &signature),
            Err(CryptoError::InvalidSignature)
        );
        assert_eq!(peer.verify(b"transcript", &[0u8; 10]), Err(CryptoError::InvalidSignature));
    }

    #[test]
    fn signature_from_other_key_rejected() {
        let signer = EphemeralKeyPair::generate();
        let other = EphemeralKeyPair::generate();
        let peer = PeerPublicKey::from_sec1_bytes(&other.public_key_bytes()).unwrap();
        let signature = signer.sign(b"transcript");
        assert!(peer.verify(b"transcript", &signature).is_err());
    }
}
