//! Handshake message bodies and the transcripts they sign.
//!
//! Binary fields travel as standard base64. Transcripts are
//! length-prefixed so no field can bleed into its neighbour.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::session::{SessionError, SessionResult};

const EXCHANGE_INIT_LABEL: &[u8] = b"wireless-relay/exchange-init/v1";
const EXCHANGE_RESPONSE_LABEL: &[u8] = b"wireless-relay/exchange-response/v1";
const AUTH_LABEL: &[u8] = b"wireless-relay/auth/v1";

/// Relay → device: start (or rotate) a key exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeInit {
    /// Relay ephemeral P-256 key, uncompressed SEC1.
    pub public_key: String,
    pub nonce: String,
    /// Relay long-term Ed25519 identity key.
    pub relay_public_key: String,
    /// Ed25519 signature by the relay identity over the init transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_signature: Option<String>,
}

/// Device → relay: its ephemeral key and proof of ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponse {
    pub public_key: String,
    /// ECDSA P-256 signature over the response transcript.
    pub signature: String,
}

pub type KeyRotationInit = KeyExchangeInit;
pub type KeyRotationResponse = KeyExchangeResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    pub challenge: String,
    pub relay_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Ed25519 signature over the auth transcript.
    pub signature: String,
    /// Device identity key. Required on first authentication, then pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(field: &'static str, value: &str) -> SessionResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| SessionError::Malformed(format!("{} is not valid base64", field)))
}

fn transcript(label: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(label.len() + parts.iter().map(|p| p.len() + 4).sum::<usize>());
    out.extend_from_slice(label);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Bytes the relay identity signs in an init.
pub fn init_transcript(device_id: &str, nonce: &[u8], relay_ephemeral: &[u8]) -> Vec<u8> {
    transcript(EXCHANGE_INIT_LABEL, &[device_id.as_bytes(), nonce, relay_ephemeral])
}

/// Bytes the device's ephemeral key signs in a response.
pub fn response_transcript(
    device_id: &str,
    nonce: &[u8],
    relay_ephemeral: &[u8],
    device_ephemeral: &[u8],
) -> Vec<u8> {
    transcript(
        EXCHANGE_RESPONSE_LABEL,
        &[device_id.as_bytes(), nonce, relay_ephemeral, device_ephemeral],
    )
}

/// Bytes the device identity signs to answer a challenge.
pub fn auth_transcript(device_id: &str, challenge: &[u8]) -> Vec<u8> {
    transcript(AUTH_LABEL, &[device_id.as_bytes(), challenge])
}
