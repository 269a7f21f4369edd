//! Audit trail for intake decisions.
//!
//! # Responsibilities
//! - Define the audit record emitted for every intake outcome
//! - Provide reporters: one that logs, one that forwards to a [`Store`]
//!
//! # Design Decisions
//! - `report` is synchronous and never waits on storage
//! - The store reporter uses a bounded queue; when it is full the newest
//!   record is dropped and counted

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::store::{Store, StoreError};

/// One intake decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// `success`, or the rejection flag name.
    pub outcome: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// Sink for audit events.
pub trait AuditReporter: Send + Sync {
    fn report(&self, event: AuditEvent);
}

/// Writes audit events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl AuditReporter for TracingReporter {
    fn report(&self, event: AuditEvent) {
        if event.success {
            tracing::info!(
                target: "audit",
                device = %event.device_id,
                tx_id = ?event.transaction_id,
                hash = ?event.hash,
                outcome = %event.outcome,
                "Transaction relayed"
            );
        } else {
            tracing::warn!(
                target: "audit",
                device = %event.device_id,
                tx_id = ?event.transaction_id,
                outcome = %event.outcome,
                error = ?event.error,
                "Transaction rejected"
            );
        }
    }
}

/// Forwards audit events to a store through a bounded queue.
#[derive(Debug, Clone)]
pub struct StoreReporter {
    sender: mpsc::Sender<AuditEvent>,
}

impl StoreReporter {
    /// Start the writer task. It exits once every reporter clone is dropped.
    pub fn spawn(store: Arc<dyn Store>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let result = match serde_json::to_value(&event) {
                    Ok(record) => store.append(record).await,
                    Err(e) => Err(StoreError::Serialization(e.to_string())),
                };
                if let Err(e) = result {
                    tracing::warn!(device = %event.device_id, error = %e, "Failed to persist audit event");
                }
            }
            tracing::debug!("Audit writer stopped");
        });

        (Self { sender }, handle)
    }
}

impl AuditReporter for StoreReporter {
    fn report(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            metrics::record_audit_dropped();
            tracing::warn!(error = %e, "Audit queue full, dropping event");
        }
    }
}

/// Reports to several sinks.
pub struct FanoutReporter(pub Vec<Arc<dyn AuditReporter>>);

impl AuditReporter for FanoutReporter {
    fn report(&self, event: AuditEvent) {
        for reporter in &self.0 {
            reporter.report(event.clone());
        }
    }
}
