//! Messages exchanged with a device over the link.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::messages::{
    AuthChallenge, AuthResponse, KeyExchangeInit, KeyExchangeResponse, KeyRotationInit,
    KeyRotationResponse,
};

/// One link message. Serialized as JSON with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    KeyExchangeInit(KeyExchangeInit),
    KeyExchangeResponse(KeyExchangeResponse),
    AuthChallenge(AuthChallenge),
    AuthResponse(AuthResponse),
    AuthResult {
        authenticated: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    KeyRotationInit(KeyRotationInit),
    KeyRotationResponse(KeyRotationResponse),
    Transaction {
        transaction_data: Value,
    },
    /// An intake outcome, flattened.
    TransactionStatus(Value),
    Error {
        message: String,
    },
}

impl Envelope {
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::KeyExchangeInit(_) => "key_exchange_init",
            Envelope::KeyExchangeResponse(_) => "key_exchange_response",
            Envelope::AuthChallenge(_) => "auth_challenge",
            Envelope::AuthResponse(_) => "auth_response",
            Envelope::AuthResult { .. } => "auth_result",
            Envelope::KeyRotationInit(_) => "key_rotation_init",
            Envelope::KeyRotationResponse(_) => "key_rotation_response",
            Envelope::Transaction { .. } => "transaction",
            Envelope::TransactionStatus(_) => "transaction_status",
            Envelope::Error { .. } => "error",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
