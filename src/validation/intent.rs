//! Transaction intent validation.

use alloy::primitives::utils::parse_units;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::session::device::is_valid_device_id;
use crate::validation::{ValidationError, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Sending,
    Completed,
    Failed,
}

impl IntentStatus {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sending" => Some(Self::Sending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    pub device_id: Option<String>,
    pub retry_count: Option<u64>,
}

/// Decimals of the native currency.
pub const NATIVE_DECIMALS: u8 = 18;

/// Largest decimals value a `U256` amount can be scaled by.
pub const MAX_TOKEN_DECIMALS: u8 = 77;

/// A validated intent. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    pub id: String,
    pub to: Address,
    /// Declared amount exactly as sent.
    pub amount: String,
    /// Declared amount in base units: 10^18 for native transfers,
    /// 10^`token_decimals` for tokens (18 when the intent omits them).
    pub amount_units: U256,
    pub chain_id: Option<u64>,
    pub token_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_decimals: Option<u8>,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub status: IntentStatus,
    pub metadata: Option<IntentMetadata>,
}

/// Intent validator bound to the configured chains.
#[derive(Debug, Clone)]
pub struct TransactionValidator {
    supported_chains: HashSet<u64>,
    freshness_window: Duration,
}

impl TransactionValidator {
    pub fn new(supported_chains: impl IntoIterator<Item = u64>, freshness_window: Duration) -> Self {
        Self {
            supported_chains: supported_chains.into_iter().collect(),
            freshness_window,
        }
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.supported_chains.contains(&chain_id)
    }

    /// Validate against the current wall clock.
    pub fn validate_transaction(&self, value: &Value) -> ValidationResult<TransactionIntent> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.validate_transaction_at(value, now_ms)
    }

    /// Validate with an explicit "now" in unix milliseconds.
    pub fn validate_transaction_at(&self, value: &Value, now_ms: u64) -> ValidationResult<TransactionIntent> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::format("transaction", "Transaction must be an object"))?;

        let id = match object.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Err(ValidationError::field("id", "Missing transaction id")),
        };

        let to = object
            .get("to")
            .and_then(Value::as_str)
            .and_then(parse_address)
            .ok_or_else(|| ValidationError::field("to", "Invalid recipient address"))?;

        let token_decimals = match object.get("tokenDecimals") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .filter(|d| *d <= u64::from(MAX_TOKEN_DECIMALS))
                    .map(|d| d as u8)
                    .ok_or_else(|| {
                        ValidationError::field(
                            "tokenDecimals",
                            format!("Token decimals must be an integer from 0 to {}", MAX_TOKEN_DECIMALS),
                        )
                    })?,
            ),
        };

        let (amount, amount_units) = object
            .get("amount")
            .and_then(|v| parse_amount(v, token_decimals.unwrap_or(NATIVE_DECIMALS)))
            .ok_or_else(|| ValidationError::field("amount", "Amount must be a positive decimal"))?;

        let chain_id = match object.get("chainId") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let chain_id = value
                    .as_u64()
                    .filter(|id| *id > 0)
                    .ok_or_else(|| ValidationError::field("chainId", "Chain id must be a positive integer"))?;
                if !self.is_supported(chain_id) {
                    return Err(ValidationError::field(
                        "chainId",
                        format!("Unsupported chain id {}", chain_id),
                    ));
                }
                Some(chain_id)
            }
        };

        let token_address = match object.get("tokenAddress") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_str()
                    .and_then(parse_address)
                    .ok_or_else(|| ValidationError::field("tokenAddress", "Invalid token address"))?,
            ),
        };
        if token_decimals.is_some() && token_address.is_none() {
            return Err(ValidationError::field(
                "tokenDecimals",
                "Token decimals require a token address",
            ));
        }

        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_u64)
            .filter(|ts| *ts > 0)
            .ok_or_else(|| ValidationError::field("timestamp", "Timestamp must be a positive integer"))?;
        let window_ms = self.freshness_window.as_millis() as u64;
        if now_ms.saturating_sub(timestamp) > window_ms {
            return Err(ValidationError::field(
                "timestamp",
                "Transaction is older than the freshness window",
            ));
        }

        let status = object
            .get("status")
            .and_then(Value::as_str)
            .and_then(IntentStatus::parse)
            .ok_or_else(|| ValidationError::field("status", "Invalid transaction status"))?;

        let metadata = match object.get("metadata") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(parse_metadata(map)?),
            Some(_) => return Err(ValidationError::field("metadata", "Metadata must be an object")),
        };

        Ok(TransactionIntent {
            id,
            to,
            amount,
            amount_units,
            chain_id,
            token_address,
            token_decimals,
            timestamp,
            status,
            metadata,
        })
    }
}

/// Accept all-lowercase or all-uppercase hex, or a valid EIP-55 checksum.
pub(crate) fn parse_address(value: &str) -> Option<Address> {
    let hex = value.strip_prefix("0x")?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let has_lower = hex.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(value, None).ok()
    } else {
        value.parse().ok()
    }
}

/// Parse a positive decimal amount and scale it by `10^decimals`.
///
/// Amounts with more fractional digits than `decimals` are refused rather
/// than truncated.
fn parse_amount(value: &Value, decimals: u8) -> Option<(String, U256)> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let mut parts = text.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction) {
        return None;
    }
    if fraction.len() > usize::from(decimals) {
        return None;
    }

    let whole = if whole.is_empty() { "0" } else { whole };
    let normalized = if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    };
    let units = parse_units(&normalized, decimals).ok()?.get_absolute();
    (units > U256::ZERO).then_some((text, units))
}

fn parse_metadata(map: &Map<String, Value>) -> ValidationResult<IntentMetadata> {
    let device_id = match map.get("deviceId") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) if is_valid_device_id(id) => Some(id.clone()),
        Some(_) => {
            return Err(ValidationError::field(
                "metadata.deviceId",
                "Invalid device id in metadata",
            ))
        }
    };

    let retry_count = match map.get("retryCount") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| {
            ValidationError::field(
                "metadata.retryCount",
                "Retry count must be a non-negative integer",
            )
        })?),
    };

    Ok(IntentMetadata {
        device_id,
        retry_count,
    })
}
