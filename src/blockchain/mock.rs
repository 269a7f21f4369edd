//! Scriptable in-memory chain used by unit tests.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::TransactionRequest;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::blockchain::rpc::ChainRpc;
use crate::blockchain::types::{BlockchainError, BlockchainResult, FeeData, ReceiptSummary};

#[derive(Default)]
pub(crate) struct MockRpc {
    pub chain_id: u64,
    pub receipts: Mutex<HashMap<B256, ReceiptSummary>>,
    pub nonces: Mutex<HashMap<Address, u64>>,
    pub gas_price: u128,
    pub estimate: Option<u64>,
    pub send_error: Option<String>,
    /// Receipt handed out once a broadcast lands.
    pub mine_as: Option<ReceiptSummary>,
    pub sent: AtomicUsize,
    /// Last request passed to `estimate_gas`.
    pub estimated: Mutex<Option<TransactionRequest>>,
}

impl MockRpc {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            gas_price: 1_000_000_000,
            estimate: Some(50_000),
            mine_as: Some(ReceiptSummary {
                success: true,
                block_number: Some(100),
                gas_used: 21_000,
            }),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl ChainRpc for MockRpc {
    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, BlockchainResult<B256>> {
        Box::pin(async move {
            if let Some(message) = &self.send_error {
                return Err(BlockchainError::Rpc(message.clone()));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            let hash = alloy::primitives::keccak256(raw);
            if let Some(receipt) = self.mine_as {
                self.receipts.lock().expect("mock lock").insert(hash, receipt);
            }
            Ok(hash)
        })
    }

    fn get_transaction_receipt(&self, hash: B256) -> BoxFuture<'_, BlockchainResult<Option<ReceiptSummary>>> {
        Box::pin(async move { Ok(self.receipts.lock().expect("mock lock").get(&hash).copied()) })
    }

    fn get_transaction_count(&self, address: Address) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(async move {
            Ok(self.nonces.lock().expect("mock lock").get(&address).copied().unwrap_or(0))
        })
    }

    fn get_fee_data(&self) -> BoxFuture<'_, BlockchainResult<FeeData>> {
        Box::pin(async move {
            Ok(FeeData {
                gas_price: self.gas_price,
                max_priority_fee_per_gas: None,
            })
        })
    }

    fn estimate_gas(&self, request: TransactionRequest) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(async move {
            *self.estimated.lock().expect("mock lock") = Some(request);
            self.estimate
                .ok_or_else(|| BlockchainError::Rpc("execution reverted".to_string()))
        })
    }

    fn get_chain_id(&self) -> BoxFuture<'_, BlockchainResult<u64>> {
        Box::pin(async move { Ok(self.chain_id) })
    }
}
