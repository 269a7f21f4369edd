//! Intake results as reported to the device.

use alloy::primitives::B256;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::blockchain::{BlockchainError, RelayReceipt, TxStatus};

/// Why a transaction was not relayed. Each maps to one flag in the
/// serialized outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RequiresAuth,
    DeviceBlocked,
    RateLimited,
    InvalidFormat,
    ValidationFailed,
    Duplicate,
    UnsupportedChain,
    RpcError,
    Reverted,
}

impl Rejection {
    pub fn flag(&self) -> &'static str {
        match self {
            Rejection::RequiresAuth => "requiresAuth",
            Rejection::DeviceBlocked => "deviceBlocked",
            Rejection::RateLimited => "rateLimited",
            Rejection::InvalidFormat => "invalidFormat",
            Rejection::ValidationFailed => "validationFailed",
            Rejection::Duplicate => "duplicate",
            Rejection::UnsupportedChain => "unsupportedChain",
            Rejection::RpcError => "rpcError",
            Rejection::Reverted => "reverted",
        }
    }

    /// Classify a relay failure.
    pub fn from_relay_error(error: &BlockchainError) -> Self {
        match error {
            BlockchainError::InvalidFormat(_) => Rejection::InvalidFormat,
            BlockchainError::UnsupportedChain(_) | BlockchainError::NoContractConfigured(_) => {
                Rejection::UnsupportedChain
            }
            BlockchainError::Rpc(_) | BlockchainError::Timeout(_) => Rejection::RpcError,
            _ => Rejection::ValidationFailed,
        }
    }
}

/// Result of one intake call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Broadcast and settled (or still pending at the deadline).
    Relayed { receipt: RelayReceipt, timestamp: u64 },
    Rejected {
        rejection: Rejection,
        error: String,
        hash: Option<B256>,
        timestamp: u64,
    },
}

impl IntakeOutcome {
    pub fn rejected(rejection: Rejection, error: impl Into<String>, timestamp: u64) -> Self {
        IntakeOutcome::Rejected {
            rejection,
            error: error.into(),
            hash: None,
            timestamp,
        }
    }

    /// A mined-but-reverted receipt is reported as a failure.
    pub fn from_receipt(receipt: RelayReceipt, timestamp: u64) -> Self {
        if receipt.status == TxStatus::Failed {
            return IntakeOutcome::Rejected {
                rejection: Rejection::Reverted,
                error: "Transaction reverted".to_string(),
                hash: Some(receipt.hash),
                timestamp,
            };
        }
        IntakeOutcome::Relayed { receipt, timestamp }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, IntakeOutcome::Relayed { .. })
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            IntakeOutcome::Relayed { .. } => None,
            IntakeOutcome::Rejected { rejection, .. } => Some(*rejection),
        }
    }

    /// `success` or the rejection flag.
    pub fn label(&self) -> &'static str {
        self.rejection().map_or("success", |r| r.flag())
    }

    pub fn hash(&self) -> Option<B256> {
        match self {
            IntakeOutcome::Relayed { receipt, .. } => Some(receipt.hash),
            IntakeOutcome::Rejected { hash, .. } => *hash,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            IntakeOutcome::Relayed { .. } => None,
            IntakeOutcome::Rejected { error, .. } => Some(error),
        }
    }
}

impl Serialize for IntakeOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            IntakeOutcome::Relayed { receipt, timestamp } => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("hash", &receipt.hash)?;
                map.serialize_entry("status", &receipt.status)?;
                map.serialize_entry("blockNumber", &receipt.block_number)?;
                map.serialize_entry("gasUsed", &receipt.gas_used)?;
                if !receipt.warnings.is_empty() {
                    map.serialize_entry("warnings", &receipt.warnings)?;
                }
                map.serialize_entry("timestamp", timestamp)?;
            }
            IntakeOutcome::Rejected {
                rejection,
                error,
                hash,
                timestamp,
            } => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry(rejection.flag(), &true)?;
                if let Some(hash) = hash {
                    map.serialize_entry("hash", hash)?;
                }
                map.serialize_entry("timestamp", timestamp)?;
            }
        }
        map.end()
    }
}
