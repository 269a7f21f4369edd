//! Pre-broadcast checks, gas estimation and broadcast.
//!
//! # Data Flow
//! ```text
//! RelayRequest {signedTransaction, chainId}
//!     → decode (InvalidFormat)
//!     → registry.get_provider (UnsupportedChain)
//!     → validate_transaction_before_broadcast (ValidationFailed / RPC error)
//!     → send_raw_transaction (RPC error, never retried here)
//!     → wait_for_inclusion
//!     → RelayReceipt
//! ```
//!
//! # Design Decisions
//! - Gas estimation never fails the caller; it falls back to 21000
//! - Upstream RPC errors keep their original text

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::registry::ChainRegistry;
use crate::blockchain::rpc::ChainRpc;
use crate::blockchain::token::transfer_calldata;
use crate::blockchain::transaction::wait_for_inclusion;
use crate::blockchain::types::{BlockchainError, BlockchainResult, TransactionStatus, TxStatus};
use crate::config::BroadcastConfig;
use crate::observability::metrics;
use crate::validation::{validate_signed_transaction, SignedTransaction};

/// Gas limit used when estimation fails.
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;

/// What to do with a transaction priced below the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderpricedPolicy {
    Warn,
    Reject,
}

/// Input to [`RelayProcessor::process_transaction`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayRequest {
    pub signed_transaction: Option<String>,
    pub chain_id: Option<u64>,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReceipt {
    pub hash: B256,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// What to estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasEstimateRequest {
    Native {
        from: Option<Address>,
        to: Address,
        value: U256,
    },
    Token {
        from: Option<Address>,
        token: Address,
        to: Address,
        amount: U256,
    },
    /// Arbitrary call, as decoded from a signed transaction.
    Call {
        from: Option<Address>,
        to: Address,
        value: U256,
        input: Bytes,
    },
}

impl GasEstimateRequest {
    /// Estimate exactly what a decoded transaction will execute, calldata included.
    pub fn from_signed(signed: &SignedTransaction) -> Self {
        GasEstimateRequest::Call {
            from: Some(signed.from),
            to: signed.to,
            value: signed.value,
            input: signed.input.clone(),
        }
    }

    fn into_request(self) -> TransactionRequest {
        let (from, request) = match self {
            GasEstimateRequest::Native { from, to, value } => {
                (from, TransactionRequest::default().with_to(to).with_value(value))
            }
            GasEstimateRequest::Token {
                from,
                token,
                to,
                amount,
            } => (
                from,
                TransactionRequest::default()
                    .with_to(token)
                    .with_input(transfer_calldata(to, amount)),
            ),
            GasEstimateRequest::Call {
                from,
                to,
                value,
                input,
            } => {
                let request = TransactionRequest::default().with_to(to).with_value(value);
                if input.is_empty() {
                    (from, request)
                } else {
                    (from, request.with_input(input))
                }
            }
        };
        match from {
            Some(from) => request.with_from(from),
            None => request,
        }
    }
}

/// Result of a fail-soft estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub gas_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ask the provider for an estimate, falling back to [`DEFAULT_GAS_LIMIT`].
pub async fn estimate_gas(rpc: &dyn ChainRpc, request: GasEstimateRequest) -> GasEstimate {
    match rpc.estimate_gas(request.into_request()).await {
        Ok(gas_limit) => GasEstimate {
            gas_limit,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, fallback = DEFAULT_GAS_LIMIT, "Gas estimation failed, using default");
            metrics::record_gas_estimate_fallback();
            GasEstimate {
                gas_limit: DEFAULT_GAS_LIMIT,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Check a decoded transaction against current chain state.
///
/// Returns non-fatal warnings. RPC failures are returned unchanged.
pub async fn validate_transaction_before_broadcast(
    signed: &SignedTransaction,
    rpc: &dyn ChainRpc,
    policy: UnderpricedPolicy,
) -> BlockchainResult<Vec<String>> {
    if rpc.get_transaction_receipt(signed.hash).await?.is_some() {
        return Err(BlockchainError::AlreadyMined(signed.hash));
    }

    let account_nonce = rpc.get_transaction_count(signed.from).await?;
    if signed.nonce < account_nonce {
        return Err(BlockchainError::NonceTooLow {
            tx_nonce: signed.nonce,
            account_nonce,
        });
    }

    let mut warnings = Vec::new();
    let fees = rpc.get_fee_data().await?;
    if signed.gas_price < fees.gas_price {
        let underpriced = BlockchainError::Underpriced {
            offered: signed.gas_price,
            network: fees.gas_price,
        };
        metrics::record_underpriced();
        if policy == UnderpricedPolicy::Reject {
            return Err(underpriced);
        }
        tracing::warn!(
            tx_hash = %signed.hash,
            offered = signed.gas_price,
            network = fees.gas_price,
            "Transaction priced below network, broadcasting anyway"
        );
        warnings.push(underpriced.to_string());
    }

    Ok(warnings)
}

/// Relays signed transactions to their chains.
pub struct RelayProcessor {
    registry: Arc<ChainRegistry>,
    config: BroadcastConfig,
}

impl RelayProcessor {
    pub fn new(registry: Arc<ChainRegistry>, config: BroadcastConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    fn policy(&self) -> UnderpricedPolicy {
        if self.config.reject_underpriced {
            UnderpricedPolicy::Reject
        } else {
            UnderpricedPolicy::Warn
        }
    }

    /// Decode, check, broadcast and wait for a transaction.
    pub async fn process_transaction(&self, request: &RelayRequest) -> BlockchainResult<RelayReceipt> {
        let raw = request
            .signed_transaction
            .as_deref()
            .ok_or_else(|| BlockchainError::InvalidFormat("Missing signed transaction".to_string()))?;
        let chain_id = request
            .chain_id
            .ok_or_else(|| BlockchainError::InvalidFormat("Missing chain id".to_string()))?;

        let signed = validate_signed_transaction(&Value::String(raw.to_string()))
            .map_err(|e| BlockchainError::InvalidFormat(e.reason))?;

        self.process_signed(&signed, chain_id).await
    }

    /// Relay an already decoded transaction.
    pub async fn process_signed(
        &self,
        signed: &SignedTransaction,
        chain_id: u64,
    ) -> BlockchainResult<RelayReceipt> {
        let rpc = self.registry.get_provider(chain_id)?;

        if let Some(signed_chain) = signed.chain_id {
            if signed_chain != chain_id {
                return Err(BlockchainError::ValidationFailed(Box::new(
                    BlockchainError::ChainMismatch {
                        expected: chain_id,
                        actual: signed_chain,
                    },
                )));
            }
        }

        let mut warnings = validate_transaction_before_broadcast(signed, rpc.as_ref(), self.policy())
            .await
            .map_err(|e| {
                if e.is_rpc() {
                    e
                } else {
                    BlockchainError::ValidationFailed(Box::new(e))
                }
            })?;

        let estimate = estimate_gas(rpc.as_ref(), GasEstimateRequest::from_signed(signed)).await;
        if estimate.error.is_none() && estimate.gas_limit > signed.gas_limit {
            warnings.push(format!(
                "Gas limit {} below estimate {}",
                signed.gas_limit, estimate.gas_limit
            ));
        }

        let hash = rpc.send_raw_transaction(&signed.raw).await?;
        tracing::info!(chain_id, tx_hash = %hash, from = %signed.from, nonce = signed.nonce, "Transaction broadcast");

        let status = wait_for_inclusion(
            rpc.as_ref(),
            hash,
            Duration::from_secs(self.config.confirmation_timeout_secs),
            Duration::from_millis(self.config.poll_interval_ms),
        )
        .await;

        tracing::info!(
            chain_id,
            tx_hash = %hash,
            status = status.status.as_str(),
            block_number = ?status.block_number,
            "Transaction settled"
        );

        Ok(RelayReceipt {
            hash,
            status: status.status,
            block_number: status.block_number,
            gas_used: status.gas_used,
            warnings,
        })
    }

    /// Fail-soft estimate on a configured chain.
    pub async fn estimate_gas(&self, chain_id: u64, request: GasEstimateRequest) -> GasEstimate {
        match self.registry.get_provider(chain_id) {
            Ok(rpc) => estimate_gas(rpc.as_ref(), request).await,
            Err(e) => {
                metrics::record_gas_estimate_fallback();
                GasEstimate {
                    gas_limit: DEFAULT_GAS_LIMIT,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Current status of a transaction by hash.
    pub async fn get_transaction_status(
        &self,
        chain_id: u64,
        hash: B256,
    ) -> BlockchainResult<TransactionStatus> {
        let rpc = self.registry.get_provider(chain_id)?;
        let receipt = rpc.get_transaction_receipt(hash).await?;
        Ok(TransactionStatus::from_receipt(hash, receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockRpc;
    use crate::blockchain::rpc::RpcConnector;
    use crate::blockchain::types::ReceiptSummary;
    use crate::config::ChainConfig;
    use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
    use alloy::eips::eip2718::Encodable2718;
    use alloy::network::TxSignerSync;
    use alloy::primitives::{address, TxKind};
    use alloy::signers::local::PrivateKeySigner;
    use serde_json::json;

    const RECIPIENT: Address = address!("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

    fn signed_raw(signer: &PrivateKeySigner, nonce: u64, max_fee: u128) -> String {
        let mut tx = TxEip1559 {
            chain_id: 84532,
            nonce,
            gas_limit: 21_000,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: 1,
            to: TxKind::Call(RECIPIENT),
            value: U256::from(1u64),
            ..Default::default()
        };
        let signature = signer.sign_transaction_sync(&mut tx).unwrap();
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        format!("0x{}", hex::encode(envelope.encoded_2718()))
    }

    fn decode(raw: &str) -> SignedTransaction {
        validate_signed_transaction(&json!(raw)).unwrap()
    }

    struct Fixed(Arc<MockRpc>);

    impl RpcConnector for Fixed {
        fn connect(&self, _chain: &ChainConfig) -> BlockchainResult<Arc<dyn ChainRpc>> {
            Ok(self.0.clone())
        }
    }

    fn processor(rpc: Arc<MockRpc>, reject_underpriced: bool) -> RelayProcessor {
        let chain = ChainConfig {
            chain_id: 84532,
            name: "base-sepolia".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            failover_urls: Vec::new(),
            contract_address: None,
        };
        let registry = Arc::new(ChainRegistry::new(&[chain], Arc::new(Fixed(rpc))));
        RelayProcessor::new(
            registry,
            BroadcastConfig {
                confirmation_timeout_secs: 1,
                poll_interval_ms: 10,
                reject_underpriced,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_already_mined() {
        let rpc = MockRpc::new(84532);
        let signed = decode(&signed_raw(&PrivateKeySigner::random(), 0, 2_000_000_000));
        rpc.receipts.lock().unwrap().insert(
            signed.hash,
            ReceiptSummary {
                success: true,
                block_number: Some(1),
                gas_used: 21_000,
            },
        );

        let err = validate_transaction_before_broadcast(&signed, &rpc, UnderpricedPolicy::Warn)
            .await
            .unwrap_err();
        assert_eq!(err, BlockchainError::AlreadyMined(signed.hash));
    }

    #[tokio::test]
    async fn test_nonce_too_low() {
        let rpc = MockRpc::new(84532);
        let signer = PrivateKeySigner::random();
        rpc.nonces.lock().unwrap().insert(signer.address(), 5);
        let signed = decode(&signed_raw(&signer, 3, 2_000_000_000));

        let err = validate_transaction_before_broadcast(&signed, &rpc, UnderpricedPolicy::Warn)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BlockchainError::NonceTooLow {
                tx_nonce: 3,
                account_nonce: 5
            }
        );
    }

    #[tokio::test]
    async fn test_underpriced_policy() {
        let rpc = MockRpc::new(84532);
        let signed = decode(&signed_raw(&PrivateKeySigner::random(), 0, 10));

        let warnings = validate_transaction_before_broadcast(&signed, &rpc, UnderpricedPolicy::Warn)
            .await
            .unwrap();
        assert_eq!(warnings.len(), 1);

        let err = validate_transaction_before_broadcast(&signed, &rpc, UnderpricedPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, BlockchainError::Underpriced { offered: 10, .. }));
    }

    #[tokio::test]
    async fn test_estimate_fallback() {
        let rpc = MockRpc {
            estimate: None,
            ..MockRpc::new(1)
        };
        let estimate = estimate_gas(
            &rpc,
            GasEstimateRequest::Native {
                from: None,
                to: RECIPIENT,
                value: U256::from(1u64),
            },
        )
        .await;
        assert_eq!(estimate.gas_limit, DEFAULT_GAS_LIMIT);
        assert_eq!(estimate.error.as_deref(), Some("RPC error: execution reverted"));

        let json = serde_json::to_value(&estimate).unwrap();
        assert_eq!(json["gasLimit"], 21000);
    }

    #[tokio::test]
    async fn test_token_estimate_uses_provider() {
        let rpc = MockRpc::new(1);
        let estimate = estimate_gas(
            &rpc,
            GasEstimateRequest::Token {
                from: None,
                token: Address::repeat_byte(0x11),
                to: RECIPIENT,
                amount: U256::from(5u64),
            },
        )
        .await;
        assert_eq!(estimate.gas_limit, 50_000);
        assert!(estimate.error.is_none());
    }

    #[tokio::test]
    async fn test_process_transaction_success() {
        let rpc = Arc::new(MockRpc::new(84532));
        let processor = processor(rpc.clone(), false);
        let raw = signed_raw(&PrivateKeySigner::random(), 0, 2_000_000_000);

        let receipt = processor
            .process_transaction(&RelayRequest {
                signed_transaction: Some(raw),
                chain_id: Some(84532),
            })
            .await
            .unwrap();
        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(receipt.block_number, Some(100));
        assert_eq!(rpc.sent(), 1);

        let status = processor.get_transaction_status(84532, receipt.hash).await.unwrap();
        assert_eq!(status.status, TxStatus::Success);
    }

    #[tokio::test]
    async fn test_estimate_carries_calldata() {
        let rpc = Arc::new(MockRpc::new(84532));
        let processor = processor(rpc.clone(), false);
        let token = Address::repeat_byte(0x11);
        let calldata = transfer_calldata(RECIPIENT, U256::from(5u64));

        let signer = PrivateKeySigner::random();
        let mut tx = TxEip1559 {
            chain_id: 84532,
            gas_limit: 60_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1,
            to: TxKind::Call(token),
            input: calldata.clone(),
            ..Default::default()
        };
        let signature = signer.sign_transaction_sync(&mut tx).unwrap();
        let raw = format!(
            "0x{}",
            hex::encode(TxEnvelope::from(tx.into_signed(signature)).encoded_2718())
        );

        let receipt = processor
            .process_transaction(&RelayRequest {
                signed_transaction: Some(raw),
                chain_id: Some(84532),
            })
            .await
            .unwrap();
        assert!(receipt.warnings.is_empty());

        let request = rpc.estimated.lock().unwrap().clone().unwrap();
        assert_eq!(request.to, Some(TxKind::Call(token)));
        assert_eq!(request.from, Some(signer.address()));
        assert_eq!(request.input.input(), Some(&calldata));
    }

    #[tokio::test]
    async fn test_process_transaction_errors() {
        let rpc = Arc::new(MockRpc::new(84532));
        let processor = processor(rpc.clone(), true);

        let missing = processor.process_transaction(&RelayRequest::default()).await.unwrap_err();
        assert!(matches!(missing, BlockchainError::InvalidFormat(_)));

        let garbage = processor
            .process_transaction(&RelayRequest {
                signed_transaction: Some("0x1234".to_string()),
                chain_id: Some(84532),
            })
            .await
            .unwrap_err();
        assert!(matches!(garbage, BlockchainError::InvalidFormat(_)));

        let unsupported = processor
            .process_transaction(&RelayRequest {
                signed_transaction: Some(signed_raw(&PrivateKeySigner::random(), 0, 2_000_000_000)),
                chain_id: Some(1),
            })
            .await
            .unwrap_err();
        assert_eq!(unsupported, BlockchainError::UnsupportedChain(1));

        let underpriced = processor
            .process_transaction(&RelayRequest {
                signed_transaction: Some(signed_raw(&PrivateKeySigner::random(), 0, 10)),
                chain_id: Some(84532),
            })
            .await
            .unwrap_err();
        assert!(matches!(underpriced, BlockchainError::ValidationFailed(_)));
        assert_eq!(rpc.sent(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_error_keeps_upstream_text() {
        let rpc = Arc::new(MockRpc {
            send_error: Some("insufficient funds for gas * price + value".to_string()),
            ..MockRpc::new(84532)
        });
        let processor = processor(rpc, false);

        let err = processor
            .process_transaction(&RelayRequest {
                signed_transaction: Some(signed_raw(&PrivateKeySigner::random(), 0, 2_000_000_000)),
                chain_id: Some(84532),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BlockchainError::Rpc("insufficient funds for gas * price + value".to_string())
        );
    }
}
