//! Session key derivation.
//!
//! PBKDF2-HMAC-SHA256 over the ECDH shared secret, salted with
//! `device_id || nonce`. The iteration count is deliberately high, so the
//! async wrapper runs the derivation on the blocking pool.

use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::keys::SharedSecret;

/// Lowest iteration count accepted by configuration validation.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Length of a derived session key in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// 256-bit symmetric session key. Wiped on drop, never cloned.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Raw key bytes, for the AEAD only.
    pub(crate) fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Derive a session key synchronously.
pub fn derive_session_key(
    shared: &SharedSecret,
    device_id: &str,
    nonce: &[u8],
    iterations: u32,
) -> SessionKey {
    let mut salt = Vec::with_capacity(device_id.len() + nonce.len());
    salt.extend_from_slice(device_id.as_bytes());
    salt.extend_from_slice(nonce);

    let mut output = [0u8; SESSION_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(shared.as_bytes(), &salt, iterations.max(1), &mut output);

    let key = SessionKey(output);
    output.zeroize();
    key
}

/// Derive a session key on the blocking thread pool.
///
/// Consumes the shared secret so it is wiped as soon as derivation ends.
pub async fn derive_session_key_offloaded(
    shared: SharedSecret,
    device_id: String,
    nonce: Vec<u8>,
    iterations: u32,
) -> SessionKey {
    let task = tokio::task::spawn_blocking(move || {
        derive_session_key(&shared, &device_id, &nonce, iterations)
    });
    match task.await {
        Ok(key) => key,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}
