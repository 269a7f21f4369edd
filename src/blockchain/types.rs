//! Chain-specific types and error definitions.

use alloy::primitives::B256;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during blockchain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed. Carries the upstream message.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("No contract configured for chain {0}")]
    NoContractConfigured(u64),

    /// Raw transaction missing or undecodable.
    #[error("Invalid transaction format: {0}")]
    InvalidFormat(String),

    /// A pre-broadcast check rejected the transaction.
    #[error("Validation failed: {0}")]
    ValidationFailed(Box<BlockchainError>),

    #[error("Transaction {0} already mined")]
    AlreadyMined(B256),

    #[error("Nonce too low: transaction nonce {tx_nonce}, account nonce {account_nonce}")]
    NonceTooLow { tx_nonce: u64, account_nonce: u64 },

    #[error("Gas price {offered} wei below network price {network} wei")]
    Underpriced { offered: u128, network: u128 },

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

impl BlockchainError {
    /// Upstream failures that must surface unchanged.
    pub fn is_rpc(&self) -> bool {
        matches!(self, BlockchainError::Rpc(_) | BlockchainError::Timeout(_))
    }
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// The parts of a receipt the relay reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Current network pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeData {
    pub gas_price: u128,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// On-chain state of a relayed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub hash: B256,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

impl TransactionStatus {
    pub fn from_receipt(hash: B256, receipt: Option<ReceiptSummary>) -> Self {
        match receipt {
            Some(r) => Self {
                hash,
                status: if r.success { TxStatus::Success } else { TxStatus::Failed },
                block_number: r.block_number,
                gas_used: Some(r.gas_used),
            },
            None => Self {
                hash,
                status: TxStatus::Pending,
                block_number: None,
                gas_used: None,
            },
        }
    }
}
