//! Per-chain client cache.
//!
//! # Responsibilities
//! - Map configured chain ids to RPC clients and optional contract handles
//! - Build each client lazily on first use and reuse it afterwards
//! - Guarantee a single client per chain even under concurrent first access
//!
//! # Design Decisions
//! - Construction happens inside the map entry, while its shard lock is
//!   held. Connecting is synchronous and does no network I/O, so the lock
//!   is held only briefly.

use alloy::primitives::Address;
use dashmap::DashMap;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::blockchain::rpc::{ChainRpc, RpcConnector};
use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::config::ChainConfig;

/// A connected chain.
#[derive(Clone)]
pub struct ChainEndpoint {
    pub chain_id: u64,
    pub name: String,
    pub rpc: Arc<dyn ChainRpc>,
    pub contract: Option<ContractHandle>,
}

/// A contract address bound to the chain client that reaches it.
#[derive(Clone)]
pub struct ContractHandle {
    pub address: Address,
    pub rpc: Arc<dyn ChainRpc>,
}

impl std::fmt::Debug for ChainEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEndpoint")
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .field("contract", &self.contract.as_ref().map(|c| c.address))
            .finish()
    }
}

pub struct ChainRegistry {
    chains: HashMap<u64, ChainConfig>,
    cache: DashMap<u64, Arc<ChainEndpoint>>,
    connector: Arc<dyn RpcConnector>,
}

impl ChainRegistry {
    pub fn new(chains: &[ChainConfig], connector: Arc<dyn RpcConnector>) -> Self {
        Self {
            chains: chains.iter().map(|c| (c.chain_id, c.clone())).collect(),
            cache: DashMap::new(),
            connector,
        }
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// Configured chain ids, ascending.
    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn chain_config(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.get(&chain_id)
    }

    /// Number of chains with a live client.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, chain_id: u64) -> bool {
        self.cache.contains_key(&chain_id)
    }

    /// Get or create the endpoint for `chain_id`.
    pub fn get_endpoint(&self, chain_id: u64) -> BlockchainResult<Arc<ChainEndpoint>> {
        if let Some(endpoint) = self.cache.get(&chain_id) {
            return Ok(endpoint.clone());
        }

        let chain = self
            .chains
            .get(&chain_id)
            .ok_or(BlockchainError::UnsupportedChain(chain_id))?;

        let entry = self
            .cache
            .entry(chain_id)
            .or_try_insert_with(|| self.build(chain).map(Arc::new))?;
        Ok(entry.value().clone())
    }

    pub fn get_provider(&self, chain_id: u64) -> BlockchainResult<Arc<dyn ChainRpc>> {
        Ok(self.get_endpoint(chain_id)?.rpc.clone())
    }

    pub fn get_contract(&self, chain_id: u64) -> BlockchainResult<ContractHandle> {
        self.get_endpoint(chain_id)?
            .contract
            .clone()
            .ok_or(BlockchainError::NoContractConfigured(chain_id))
    }

    /// Drop every cached client. The next access reconnects.
    pub fn clear(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        tracing::info!(dropped, "Chain client cache cleared");
    }

    /// Ask the chain for its id and compare with the configured one.
    pub async fn verify_chain(&self, chain_id: u64) -> BlockchainResult<()> {
        let rpc = self.get_provider(chain_id)?;
        let actual = rpc.get_chain_id().await?;
        if actual != chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: chain_id,
                actual,
            });
        }
        tracing::info!(chain_id, "Chain ID verified");
        Ok(())
    }

    fn build(&self, chain: &ChainConfig) -> BlockchainResult<ChainEndpoint> {
        let rpc = self.connector.connect(chain)?;
        let contract = parse_contract(chain.contract_address.as_deref())
            .map(|address| ContractHandle { address, rpc: rpc.clone() });

        tracing::debug!(chain_id = chain.chain_id, name = %chain.name, "Chain endpoint created");

        Ok(ChainEndpoint {
            chain_id: chain.chain_id,
            name: chain.name.clone(),
            rpc,
            contract,
        })
    }
}

/// Absent, empty, unparsable and zero addresses all mean "no contract".
fn parse_contract(address: Option<&str>) -> Option<Address> {
    let address = Address::from_str(address?.trim()).ok()?;
    (!address.is_zero()).then_some(address)
}
