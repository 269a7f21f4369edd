//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Static chain configuration (chain id → RPC URLs, contract address)
//!     → registry.rs (lazy per-chain client cache)
//!     → rpc.rs (RPC calls with timeouts and read failover)
//!     → relay.rs (pre-broadcast checks, gas estimate, broadcast)
//!     → transaction.rs (inclusion polling)
//! ```
//!
//! # Security Constraints
//! - The relay never holds wallet keys; it only forwards signed bytes
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when a chain is unreachable

pub mod registry;
pub mod relay;
pub mod rpc;
pub mod token;
pub mod transaction;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use registry::{ChainEndpoint, ChainRegistry, ContractHandle};
pub use relay::{
    estimate_gas, validate_transaction_before_broadcast, GasEstimate, GasEstimateRequest,
    RelayProcessor, RelayReceipt, RelayRequest, UnderpricedPolicy, DEFAULT_GAS_LIMIT,
};
pub use rpc::{AlloyConnector, AlloyRpc, ChainRpc, RpcConnector};
pub use types::{
    BlockchainError, BlockchainResult, FeeData, ReceiptSummary, TransactionStatus, TxStatus,
};
