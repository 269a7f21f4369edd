//! Chain RPC client with timeouts and read failover.
//!
//! # Responsibilities
//! - Connect to the primary and failover JSON-RPC endpoints of one chain
//! - Query chain state (receipts, nonces, fees, estimates)
//! - Broadcast raw transactions to the primary endpoint only
//! - Handle timeouts and network errors without losing upstream messages

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::TransportResult;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{BlockchainError, BlockchainResult, FeeData, ReceiptSummary};
use crate::config::ChainConfig;
use crate::observability::metrics;

/// The RPC surface the relay consumes.
pub trait ChainRpc: Send + Sync {
    /// Broadcast EIP-2718 bytes. Returns the transaction hash.
    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, BlockchainResult<B256>>;

    fn get_transaction_receipt(&self, hash: B256) -> BoxFuture<'_, BlockchainResult<Option<ReceiptSummary>>>;

    fn get_transaction_count(&self, address: Address) -> BoxFuture<'_, BlockchainResult<u64>>;

    fn get_fee_data(&self) -> BoxFuture<'_, BlockchainResult<FeeData>>;

    fn estimate_gas(&self, request: TransactionRequest) -> BoxFuture<'_, BlockchainResult<u64>>;

    fn get_chain_id(&self) -> BoxFuture<'_, BlockchainResult<u64>>;
}

/// Builds RPC clients for configured chains.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, chain: &ChainConfig) -> BlockchainResult<Arc<dyn ChainRpc>>;
}

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Alloy-backed client for one chain (primary + failovers).
#[derive(Clone)]
pub struct AlloyRpc {
    chain_id: u64,
    rpc_url: String,
    providers: Vec<DynProvider>,
    timeout_duration: Duration,
}

impl AlloyRpc {
    /// Create a client. No network traffic happens until the first call.
    pub fn new(chain: &ChainConfig, rpc_timeout: Duration) -> BlockchainResult<Self> {
        let mut providers = Vec::new();

        let primary_url: url::Url = chain.rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", chain.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        for url_str in &chain.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider);
            } else {
                tracing::warn!(chain_id = chain.chain_id, url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        tracing::info!(
            chain_id = chain.chain_id,
            rpc_url = %chain.rpc_url,
            failovers = providers.len() - 1,
            "RPC client created"
        );

        Ok(Self {
            chain_id: chain.chain_id,
            rpc_url: chain.rpc_url.clone(),
            providers,
            timeout_duration: rpc_timeout,
        })
    }

    /// Run a read against each provider in order until one answers.
    async fn read<T, F>(&self, op: &'static str, call: F) -> BlockchainResult<T>
    where
        F: Fn(DynProvider) -> BoxFuture<'static, TransportResult<T>>,
    {
        let mut last_error = None;
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => {
                    metrics::record_rpc_health(self.chain_id, true);
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    tracing::warn!(chain_id = self.chain_id, provider_idx = i, op, error = %e, "RPC error, trying next provider");
                    last_error = Some(BlockchainError::Rpc(e.to_string()));
                }
                Err(_) => {
                    tracing::warn!(chain_id = self.chain_id, provider_idx = i, op, "RPC timeout, trying next provider");
                    last_error = Some(BlockchainError::Timeout(self.timeout_duration.as_secs()));
                }
            }
        }
        metrics::record_rpc_health(self.chain_id, false);
        Err(last_error.unwrap_or_else(|| BlockchainError::Rpc("No RPC providers configured".to_string())))
    }
}

impl ChainRpc for AlloyRpc {
    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, BlockchainResult<B256>> {
        Box::pin(async move {
            let provider = &self.providers[0];
            match timeout(self.timeout_duration, provider.send_raw_transaction(raw)).await {
                Ok(Ok(pending)) => Ok(*pending.tx_hash()),
                Ok(Err(e)) => Err(BlockchainError::Rpc(e.to_string())),
                Err(_) => Err(BlockchainError::Timeout(self.timeout_duration.as_secs())),
            }
        })
    }

    fn get_transaction_receipt(&self, hash: B256) -> BoxFuture<'_, BlockchainResult<Option<ReceiptSummary>>> {
        Box::pin(async move {
            let receipt = self
                .read("get_transaction_receipt", move |p| {
                    Box::pin(async move { p.get_transaction_receipt(hash).await })
                })
                .await?;
            Ok(receipt.map(|r| ReceiptSummary {
                success: r.status(),
                block_number: r.block_number,
                gas_used: r.gas_used as u64,
            }))
        })
    }

    fn get_transaction_count(&self, address: Address) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(self.read("get_transaction_count", move |p| {
            Box::pin(async move { p.get_transaction_count(address).await })
        }))
    }

    fn get_fee_data(&self) -> BoxFuture<'_, BlockchainResult<FeeData>> {
        Box::pin(async move {
            let gas_price = self
                .read("get_gas_price", |p| Box::pin(async move { p.get_gas_price().await }))
                .await?;
            let max_priority_fee_per_gas = self
                .read("get_max_priority_fee_per_gas", |p| {
                    Box::pin(async move { p.get_max_priority_fee_per_gas().await })
                })
                .await
                .ok();
            Ok(FeeData {
                gas_price,
                max_priority_fee_per_gas,
            })
        })
    }

    fn estimate_gas(&self, request: TransactionRequest) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(self.read("estimate_gas", move |p| {
            let request = request.clone();
            Box::pin(async move { p.estimate_gas(request).await })
        }))
    }

    fn get_chain_id(&self) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(self.read("get_chain_id", |p| Box::pin(async move { p.get_chain_id().await })))
    }
}

impl std::fmt::Debug for AlloyRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyRpc")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("providers", &self.providers.len())
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}

/// Connector that builds [`AlloyRpc`] clients.
#[derive(Debug, Clone)]
pub struct AlloyConnector {
    pub rpc_timeout: Duration,
}

impl RpcConnector for AlloyConnector {
    fn connect(&self, chain: &ChainConfig) -> BlockchainResult<Arc<dyn ChainRpc>> {
        Ok(Arc::new(AlloyRpc::new(chain, self.rpc_timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(rpc_url: &str, failovers: &[&str]) -> ChainConfig {
        ChainConfig {
            chain_id: 31337,
            name: "anvil".to_string(),
            rpc_url: rpc_url.to_string(),
            failover_urls: failovers.iter().map(|s| s.to_string()).collect(),
            contract_address: None,
        }
    }

    #[test]
    fn test_invalid_primary_url() {
        let err = AlloyRpc::new(&chain("not a url", &[]), Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("Invalid RPC URL"));
    }

    #[test]
    fn test_invalid_failover_is_skipped() {
        let rpc = AlloyRpc::new(
            &chain("http://127.0.0.1:1", &["::bad::", "http://127.0.0.1:2"]),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(rpc.providers.len(), 2);
    }

    #[tokio::test]
    async fn test_rpc_failover_reports_last_error() {
        // Nothing listens on these ports; every provider fails.
        let rpc = AlloyRpc::new(
            &chain("http://127.0.0.1:1", &["http://127.0.0.1:2"]),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = rpc.get_chain_id().await.unwrap_err();
        assert!(err.is_rpc());
    }
}
