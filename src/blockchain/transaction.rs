//! Inclusion monitoring for broadcast transactions.

use alloy::primitives::TxHash;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::blockchain::rpc::ChainRpc;
use crate::blockchain::types::{TransactionStatus, TxStatus};

/// Poll for a receipt until the transaction is mined or `deadline` elapses.
///
/// RPC errors while polling are logged and polling continues. On timeout the
/// transaction is reported as `pending`; it was broadcast and may still land.
pub async fn wait_for_inclusion(
    rpc: &dyn ChainRpc,
    tx_hash: TxHash,
    deadline: Duration,
    poll_interval: Duration,
) -> TransactionStatus {
    let result = timeout(deadline, async {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match rpc.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return TransactionStatus::from_receipt(tx_hash, Some(receipt)),
                Ok(None) => {
                    tracing::debug!(tx_hash = %tx_hash, "Transaction pending");
                }
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed");
                }
            }
        }
    })
    .await;

    match result {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(
                tx_hash = %tx_hash,
                timeout_secs = deadline.as_secs(),
                "Transaction not mined before deadline"
            );
            TransactionStatus {
                hash: tx_hash,
                status: TxStatus::Pending,
                block_number: None,
                gas_used: None,
            }
        }
    }
}
