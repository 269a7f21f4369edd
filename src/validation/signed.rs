//! Raw signed transaction decoding.

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use serde_json::Value;

use crate::blockchain::token::IERC20;
use crate::validation::intent::TransactionIntent;
use crate::validation::{ValidationError, ValidationResult};

/// A decoded transaction with its sender recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// EIP-2718 bytes exactly as received.
    pub raw: Bytes,
    pub hash: B256,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    pub gas_limit: u64,
    /// Legacy gas price, or max fee per gas for dynamic-fee transactions.
    pub gas_price: u128,
    pub value: U256,
    pub input: Bytes,
}

/// Decode a `0x`-prefixed EIP-2718 (or legacy RLP) transaction.
///
/// Every failure is reported as `InvalidFormat`.
pub fn validate_signed_transaction(value: &Value) -> ValidationResult<SignedTransaction> {
    const FIELD: &str = "signedTransaction";

    let text = value
        .as_str()
        .ok_or_else(|| ValidationError::format(FIELD, "Signed transaction must be a string"))?;
    let hex_body = text
        .strip_prefix("0x")
        .ok_or_else(|| ValidationError::format(FIELD, "Signed transaction must start with 0x"))?;
    let raw = hex::decode(hex_body)
        .map_err(|_| ValidationError::format(FIELD, "Signed transaction is not valid hex"))?;

    let mut cursor = raw.as_slice();
    let envelope = TxEnvelope::decode_2718(&mut cursor)
        .map_err(|e| ValidationError::format(FIELD, format!("Failed to decode transaction: {}", e)))?;
    if !cursor.is_empty() {
        return Err(ValidationError::format(FIELD, "Trailing bytes after transaction"));
    }

    let from = envelope
        .recover_signer()
        .map_err(|_| ValidationError::format(FIELD, "Unable to recover transaction sender"))?;
    let to = envelope
        .to()
        .ok_or_else(|| ValidationError::format(FIELD, "Transaction has no recipient"))?;

    Ok(SignedTransaction {
        raw: Bytes::from(raw.clone()),
        hash: *envelope.tx_hash(),
        from,
        to,
        nonce: envelope.nonce(),
        chain_id: envelope.chain_id(),
        gas_limit: envelope.gas_limit(),
        gas_price: envelope.gas_price().unwrap_or_else(|| envelope.max_fee_per_gas()),
        value: envelope.value(),
        input: envelope.input().clone(),
    })
}

/// Ensure the declared intent describes the transaction that was signed.
pub fn check_consistency(intent: &TransactionIntent, signed: &SignedTransaction) -> ValidationResult<()> {
    if let (Some(declared), Some(signed_chain)) = (intent.chain_id, signed.chain_id) {
        if declared != signed_chain {
            return Err(ValidationError::field(
                "chainId",
                format!(
                    "Chain id {} does not match signed transaction chain id {}",
                    declared, signed_chain
                ),
            ));
        }
    }

    match intent.token_address {
        Some(token) => {
            if signed.to != token {
                return Err(ValidationError::field(
                    "tokenAddress",
                    "Token address does not match signed transaction target",
                ));
            }
            let call = IERC20::transferCall::abi_decode(&signed.input).map_err(|_| {
                ValidationError::field("tokenAddress", "Signed transaction is not a token transfer")
            })?;
            if call.to != intent.to {
                return Err(ValidationError::field(
                    "to",
                    "Recipient does not match signed transaction",
                ));
            }
            // Token amounts are only comparable when the intent declared the decimals.
            if intent.token_decimals.is_some() && call.amount != intent.amount_units {
                return Err(ValidationError::field(
                    "amount",
                    "Amount does not match signed transaction",
                ));
            }
        }
        None => {
            if signed.to != intent.to {
                return Err(ValidationError::field(
                    "to",
                    "Recipient does not match signed transaction",
                ));
            }
            if signed.value != intent.amount_units {
                return Err(ValidationError::field(
                    "amount",
                    "Amount does not match signed transaction",
                ));
            }
        }
    }

    Ok(())
}
