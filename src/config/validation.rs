//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, iteration floor, chunk alignment)
//! - Check chain entries (unique ids, parseable URLs and addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<FieldError>>
//! - Runs before config is accepted into the system

use alloy::primitives::Address;
use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::RelayConfig;
use crate::crypto::kdf::MIN_ITERATIONS;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if config.listener.enabled && config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(FieldError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.max_connections == 0 {
        errors.push(FieldError::new("listener.max_connections", "must be > 0"));
    }

    let session = &config.session;
    if session.max_sessions == 0 {
        errors.push(FieldError::new("session.max_sessions", "must be > 0"));
    }
    if session.kdf_iterations < MIN_ITERATIONS {
        errors.push(FieldError::new(
            "session.kdf_iterations",
            format!("must be >= {}", MIN_ITERATIONS),
        ));
    }
    if session.max_failed_attempts == 0 {
        errors.push(FieldError::new("session.max_failed_attempts", "must be > 0"));
    }
    for (field, value) in [
        ("session.exchange_timeout_secs", session.exchange_timeout_secs),
        ("session.block_duration_secs", session.block_duration_secs),
        ("session.auth_timeout_secs", session.auth_timeout_secs),
        ("session.sweep_interval_secs", session.sweep_interval_secs),
    ] {
        if value == 0 {
            errors.push(FieldError::new(field, "must be > 0"));
        }
    }

    let transport = &config.transport;
    if transport.chunk_size == 0 || transport.chunk_size % 4 != 0 {
        errors.push(FieldError::new(
            "transport.chunk_size",
            "must be a positive multiple of 4",
        ));
    }
    if transport.write_timeout_ms == 0 {
        errors.push(FieldError::new("transport.write_timeout_ms", "must be > 0"));
    }
    if transport.retry_base_delay_ms > transport.retry_max_delay_ms {
        errors.push(FieldError::new(
            "transport.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }
    if transport.reassembly_timeout_secs == 0 {
        errors.push(FieldError::new("transport.reassembly_timeout_secs", "must be > 0"));
    }

    if config.intake.transactions_per_minute == 0 {
        errors.push(FieldError::new("intake.transactions_per_minute", "must be > 0"));
    }

    if config.relay.rpc_timeout_secs == 0 {
        errors.push(FieldError::new("relay.rpc_timeout_secs", "must be > 0"));
    }
    if config.relay.poll_interval_ms == 0 {
        errors.push(FieldError::new("relay.poll_interval_ms", "must be > 0"));
    }

    if config.chains.is_empty() {
        errors.push(FieldError::new("chains", "at least one chain must be configured"));
    }
    let mut seen = HashSet::new();
    for (i, chain) in config.chains.iter().enumerate() {
        let prefix = format!("chains[{}]", i);
        if chain.chain_id == 0 {
            errors.push(FieldError::new(format!("{}.chain_id", prefix), "must be > 0"));
        }
        if !seen.insert(chain.chain_id) {
            errors.push(FieldError::new(
                format!("{}.chain_id", prefix),
                format!("duplicate chain id {}", chain.chain_id),
            ));
        }
        for (j, url) in std::iter::once(&chain.rpc_url)
            .chain(chain.failover_urls.iter())
            .enumerate()
        {
            if url::Url::parse(url).is_err() {
                let field = if j == 0 {
                    format!("{}.rpc_url", prefix)
                } else {
                    format!("{}.failover_urls[{}]", prefix, j - 1)
                };
                errors.push(FieldError::new(field, format!("invalid URL '{}'", url)));
            }
        }
        if let Some(address) = &chain.contract_address {
            if !address.is_empty() && address.parse::<Address>().is_err() {
                errors.push(FieldError::new(
                    format!("{}.contract_address", prefix),
                    "not a valid address",
                ));
            }
        }
    }

    if config.events.channel_capacity == 0 {
        errors.push(FieldError::new("events.channel_capacity", "must be > 0"));
    }
    if config.events.audit_queue_capacity == 0 {
        errors.push(FieldError::new("events.audit_queue_capacity", "must be > 0"));
    }
    if config.events.store_capacity == 0 {
        errors.push(FieldError::new("events.store_capacity", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
