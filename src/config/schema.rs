//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Frame bridge listener (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Key exchange, authentication and device lifecycle.
    pub session: SessionConfig,

    /// Chunked framing over the wireless link.
    pub transport: TransportConfig,

    /// Intake gate policy.
    pub intake: IntakeConfig,

    /// Broadcast and inclusion settings shared by every chain.
    pub relay: BroadcastConfig,

    /// Supported chains.
    pub chains: Vec<ChainConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub events: EventsConfig,
}

impl RelayConfig {
    /// Look up a configured chain by id.
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Ids of every configured chain.
    pub fn supported_chain_ids(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.chain_id).collect()
    }
}

/// Listener configuration for the frame bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Enable the TCP frame bridge.
    pub enabled: bool,

    /// Bind address (e.g., "127.0.0.1:7400").
    pub bind_address: String,

    /// Maximum concurrent adapter connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:7400".to_string(),
            max_connections: 256,
        }
    }
}

/// Session manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cap on concurrent key-exchange sessions across all devices.
    pub max_sessions: usize,

    /// Deadline for a pending key exchange or rotation, in seconds.
    pub exchange_timeout_secs: u64,

    /// Consecutive failures before a device is blocked.
    pub max_failed_attempts: u32,

    /// Block duration in seconds.
    pub block_duration_secs: u64,

    /// PBKDF2 iterations for session key derivation.
    pub kdf_iterations: u32,

    /// Deadline for answering an authentication challenge, in seconds.
    pub auth_timeout_secs: u64,

    /// Devices idle for longer than this are purged by the sweep.
    pub inactivity_timeout_secs: u64,

    /// Interval of the maintenance sweep, in seconds.
    pub sweep_interval_secs: u64,

    /// Rotate the session key after this many seconds (0 disables).
    pub rotation_interval_secs: u64,
}

impl SessionConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            exchange_timeout_secs: 60,
            max_failed_attempts: 3,
            block_duration_secs: 300,
            kdf_iterations: 100_000,
            auth_timeout_secs: 60,
            inactivity_timeout_secs: 1800,
            sweep_interval_secs: 30,
            rotation_interval_secs: 0,
        }
    }
}

/// Framed transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Encoded (base64) characters per chunk frame. Multiple of 4.
    pub chunk_size: usize,

    /// Per-frame write timeout in milliseconds.
    pub write_timeout_ms: u64,

    /// Retries after the first failed write.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Partial messages older than this are discarded, in seconds.
    pub reassembly_timeout_secs: u64,

    /// Largest accepted message after reassembly, in bytes.
    pub max_message_bytes: usize,

    /// Concurrent partial messages per link.
    pub max_pending_messages: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 160,
            write_timeout_ms: 5000,
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 800,
            reassembly_timeout_secs: 30,
            max_message_bytes: 256 * 1024,
            max_pending_messages: 16,
        }
    }
}

/// Intake gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Transactions accepted per device per minute.
    pub transactions_per_minute: u32,

    /// Maximum age of an intent timestamp, in seconds.
    pub freshness_window_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            transactions_per_minute: 10,
            freshness_window_secs: 24 * 60 * 60,
        }
    }
}

/// Broadcast settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// How long to wait for a receipt after broadcast, in seconds.
    pub confirmation_timeout_secs: u64,

    /// Receipt polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Reject transactions priced below the network gas price instead of
    /// warning.
    pub reject_underpriced: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: 10,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 2000,
            reject_underpriced: false,
        }
    }
}

/// One supported chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// Chain ID (e.g., 84532 for Base Sepolia, 31337 for local Anvil).
    pub chain_id: u64,

    /// Display name for logs and the admin surface.
    #[serde(default)]
    pub name: String,

    /// Primary JSON-RPC endpoint URL. Broadcasts only go here.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs for reads.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Optional relay contract address.
    #[serde(default)]
    pub contract_address: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Event and audit channel sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Device event broadcast capacity. Lagging subscribers lose the oldest events.
    pub channel_capacity: usize,

    /// Audit records buffered for the store. Records beyond this are dropped.
    pub audit_queue_capacity: usize,

    /// Audit records retained by the in-memory store. The oldest are evicted first.
    pub store_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            audit_queue_capacity: 1024,
            store_capacity: 10_000,
        }
    }
}
