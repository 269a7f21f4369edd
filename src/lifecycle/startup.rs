//! Startup orchestration.
//!
//! # Responsibilities
//! - Wire every subsystem from one validated configuration
//! - Check each configured chain once, without failing startup
//!
//! # Design Decisions
//! - Subsystems are built in dependency order and passed explicitly;
//!   nothing is reached through globals
//! - An unreachable chain is logged, not fatal

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::blockchain::{ChainRegistry, RelayProcessor, RpcConnector};
use crate::config::RelayConfig;
use crate::crypto::RelayIdentity;
use crate::intake::IntakeGate;
use crate::net::LinkContext;
use crate::observability::{AuditReporter, FanoutReporter, StoreReporter, TracingReporter};
use crate::session::{EventBus, SessionManager};
use crate::store::Store;
use crate::validation::TransactionValidator;

/// The assembled relay. Cheap handles only; clone the `Arc`s you need.
pub struct RelayContext {
    pub config: Arc<RelayConfig>,
    pub identity: Arc<RelayIdentity>,
    pub events: EventBus,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<ChainRegistry>,
    pub relay: Arc<RelayProcessor>,
    pub gate: Arc<IntakeGate>,
    pub store: Arc<dyn Store>,
    pub started_at: Instant,
    audit_writer: JoinHandle<()>,
}

impl RelayContext {
    /// Build every subsystem. Must run inside a Tokio runtime.
    pub fn build(
        config: RelayConfig,
        identity: RelayIdentity,
        connector: Arc<dyn RpcConnector>,
        store: Arc<dyn Store>,
    ) -> Self {
        let config = Arc::new(config);
        let identity = Arc::new(identity);

        let events = EventBus::new(config.events.channel_capacity);
        let sessions = Arc::new(SessionManager::new(
            config.session.clone(),
            config.intake.transactions_per_minute,
            identity.clone(),
            events.clone(),
        ));

        let registry = Arc::new(ChainRegistry::new(&config.chains, connector));
        let relay = Arc::new(RelayProcessor::new(registry.clone(), config.relay.clone()));

        let validator = TransactionValidator::new(
            config.supported_chain_ids(),
            Duration::from_secs(config.intake.freshness_window_secs),
        );
        let (store_reporter, audit_writer) =
            StoreReporter::spawn(store.clone(), config.events.audit_queue_capacity);
        let reporters: Vec<Arc<dyn AuditReporter>> =
            vec![Arc::new(TracingReporter), Arc::new(store_reporter)];
        let reporter: Arc<dyn AuditReporter> = Arc::new(FanoutReporter(reporters));
        let gate = Arc::new(IntakeGate::new(sessions.clone(), validator, relay.clone(), reporter));

        tracing::info!(
            chains = ?registry.chain_ids(),
            max_sessions = config.session.max_sessions,
            relay_public_key = %identity.public_key_hex(),
            "Relay context ready"
        );

        Self {
            config,
            identity,
            events,
            sessions,
            registry,
            relay,
            gate,
            store,
            started_at: Instant::now(),
            audit_writer,
        }
    }

    pub fn link_context(&self) -> LinkContext {
        LinkContext::new(
            self.sessions.clone(),
            self.gate.clone(),
            self.config.transport.clone(),
        )
    }

    /// Ask every configured chain for its id. Returns the chains that answered
    /// correctly.
    pub async fn verify_chains(&self) -> Vec<u64> {
        let mut verified = Vec::new();
        for chain_id in self.registry.chain_ids() {
            match self.registry.verify_chain(chain_id).await {
                Ok(()) => verified.push(chain_id),
                Err(e) => tracing::warn!(chain_id, error = %e, "Chain check failed, continuing"),
            }
        }
        verified
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop accepting audit records once every gate handle is gone and wait
    /// for the writer to drain.
    pub async fn finish(self) {
        let RelayContext {
            gate, audit_writer, ..
        } = self;
        drop(gate);
        if tokio::time::timeout(Duration::from_secs(5), audit_writer).await.is_err() {
            tracing::warn!("Audit writer did not drain in time");
        }
    }
}
