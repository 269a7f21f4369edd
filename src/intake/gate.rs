//! The single entry point for transactions arriving from devices.

use alloy::primitives::B256;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::blockchain::RelayProcessor;
use crate::intake::outcome::{IntakeOutcome, Rejection};
use crate::observability::metrics;
use crate::observability::{AuditEvent, AuditReporter};
use crate::session::SessionManager;
use crate::validation::{check_consistency, validate_signed_transaction, TransactionValidator};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Releases an in-flight hash when the relay call ends or is cancelled.
struct InFlight<'a> {
    map: &'a DashMap<B256, String>,
    hash: B256,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.hash);
    }
}

/// Composes session checks, validation and relay.
pub struct IntakeGate {
    sessions: Arc<SessionManager>,
    validator: TransactionValidator,
    relay: Arc<RelayProcessor>,
    reporter: Arc<dyn AuditReporter>,
    in_flight: DashMap<B256, String>,
}

impl IntakeGate {
    pub fn new(
        sessions: Arc<SessionManager>,
        validator: TransactionValidator,
        relay: Arc<RelayProcessor>,
        reporter: Arc<dyn AuditReporter>,
    ) -> Self {
        Self {
            sessions,
            validator,
            relay,
            reporter,
            in_flight: DashMap::new(),
        }
    }

    pub fn relay(&self) -> &Arc<RelayProcessor> {
        &self.relay
    }

    /// Run one transaction through every check and, if it passes, relay it.
    ///
    /// Never fails: every rejection is an [`IntakeOutcome`] with one flag.
    pub async fn submit(&self, device_id: &str, transaction_data: &Value) -> IntakeOutcome {
        let chain_id = transaction_data.get("chainId").and_then(Value::as_u64);
        let transaction_id = transaction_data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let outcome = self.evaluate(device_id, transaction_data).await;

        metrics::record_intake(outcome.label());
        self.reporter.report(AuditEvent {
            device_id: device_id.to_string(),
            transaction_id,
            chain_id,
            outcome: outcome.label().to_string(),
            success: outcome.is_success(),
            hash: outcome.hash().map(|h| h.to_string()),
            error: outcome.error().map(str::to_string),
            timestamp: now_ms(),
        });
        outcome
    }

    async fn evaluate(&self, device_id: &str, data: &Value) -> IntakeOutcome {
        if !self.sessions.is_authenticated(device_id).await {
            return IntakeOutcome::rejected(Rejection::RequiresAuth, "Device is not authenticated", now_ms());
        }
        if self.sessions.is_blocked(device_id).await {
            return IntakeOutcome::rejected(Rejection::DeviceBlocked, "Device is blocked", now_ms());
        }
        if !self.sessions.admit_transaction(device_id).await {
            return IntakeOutcome::rejected(Rejection::RateLimited, "Transaction rate limit exceeded", now_ms());
        }

        let Some(raw) = data.get("signedTransaction") else {
            return IntakeOutcome::rejected(Rejection::InvalidFormat, "Missing signedTransaction", now_ms());
        };
        let Some(chain_id) = data.get("chainId").filter(|v| !v.is_null()) else {
            return IntakeOutcome::rejected(Rejection::InvalidFormat, "Missing chainId", now_ms());
        };
        if chain_id.as_u64().filter(|id| *id > 0).is_none() {
            return IntakeOutcome::rejected(
                Rejection::InvalidFormat,
                "Chain id must be a positive integer",
                now_ms(),
            );
        }

        let signed = match validate_signed_transaction(raw) {
            Ok(signed) => signed,
            Err(e) => return IntakeOutcome::rejected(Rejection::InvalidFormat, e.reason, now_ms()),
        };

        let intent = match self
            .validator
            .validate_transaction(data)
            .and_then(|intent| check_consistency(&intent, &signed).map(|()| intent))
        {
            Ok(intent) => intent,
            Err(e) => return IntakeOutcome::rejected(Rejection::ValidationFailed, e.reason, now_ms()),
        };

        let declared_device = intent.metadata.as_ref().and_then(|m| m.device_id.as_deref());
        if declared_device.is_some_and(|declared| declared != device_id) {
            return IntakeOutcome::rejected(
                Rejection::ValidationFailed,
                "Metadata device id does not match the sending device",
                now_ms(),
            );
        }

        let Some(chain_id) = intent.chain_id else {
            return IntakeOutcome::rejected(Rejection::InvalidFormat, "Missing chainId", now_ms());
        };

        let _guard = self.sessions.broadcast_guard(device_id).await;

        let _in_flight = match self.in_flight.entry(signed.hash) {
            Entry::Occupied(owner) => {
                tracing::warn!(device = %device_id, owner = %owner.get(), tx_hash = %signed.hash, "Duplicate transaction in flight");
                return IntakeOutcome::Rejected {
                    rejection: Rejection::Duplicate,
                    error: "Transaction is already being relayed".to_string(),
                    hash: Some(signed.hash),
                    timestamp: now_ms(),
                };
            }
            Entry::Vacant(slot) => {
                slot.insert(device_id.to_string());
                InFlight {
                    map: &self.in_flight,
                    hash: signed.hash,
                }
            }
        };

        tracing::info!(device = %device_id, tx_id = %intent.id, chain_id, tx_hash = %signed.hash, "Relaying transaction");
        let result = self.relay.process_signed(&signed, chain_id).await;

        match result {
            Ok(receipt) => IntakeOutcome::from_receipt(receipt, now_ms()),
            Err(e) => {
                tracing::warn!(device = %device_id, tx_hash = %signed.hash, error = %e, "Relay failed");
                IntakeOutcome::Rejected {
                    rejection: Rejection::from_relay_error(&e),
                    error: e.to_string(),
                    hash: Some(signed.hash),
                    timestamp: now_ms(),
                }
            }
        }
    }
}
