//! Wireless transaction relay.
//!
//! ```text
//!     Device ── wireless adapter ──▶ ┌──────────┐   ┌───────────┐   ┌──────────┐
//!                                    │   net    │──▶│  session  │──▶│  intake  │
//!                                    │  bridge  │   │ + crypto  │   │   gate   │
//!                                    └──────────┘   └───────────┘   └────┬─────┘
//!                                                                        ▼
//!                                                  ┌───────────┐   ┌──────────┐
//!                                      EVM RPC ◀───│ registry  │◀──│  relay   │
//!                                                  └───────────┘   └──────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use wireless_relay::admin::{serve_admin, AdminState};
use wireless_relay::blockchain::AlloyConnector;
use wireless_relay::config::{load_config, RelayConfig};
use wireless_relay::crypto::identity::IDENTITY_KEY_ENV_VAR;
use wireless_relay::crypto::RelayIdentity;
use wireless_relay::lifecycle::{maintenance, signals, RelayContext, Shutdown};
use wireless_relay::net::FrameBridge;
use wireless_relay::observability::{logging, metrics};
use wireless_relay::store::MemoryStore;

#[derive(Parser)]
#[command(name = "wireless-relay")]
#[command(about = "Relay signed transactions from wireless devices to EVM chains", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "wireless-relay starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let identity = if std::env::var_os(IDENTITY_KEY_ENV_VAR).is_some() {
        RelayIdentity::from_env()?
    } else {
        tracing::warn!(
            env_var = IDENTITY_KEY_ENV_VAR,
            "No relay identity configured, generated an ephemeral one"
        );
        RelayIdentity::generate()
    };

    let connector = Arc::new(AlloyConnector {
        rpc_timeout: Duration::from_secs(config.relay.rpc_timeout_secs),
    });
    let store = Arc::new(MemoryStore::with_capacity(config.events.store_capacity));
    let ctx = Arc::new(RelayContext::build(config, identity, connector, store));
    ctx.verify_chains().await;

    let shutdown = Arc::new(Shutdown::new());
    signals::install(shutdown.clone());

    let sweeper = tokio::spawn(maintenance::run_sweeper(
        ctx.sessions.clone(),
        ctx.store.clone(),
        Duration::from_secs(ctx.config.session.sweep_interval_secs),
        shutdown.clone(),
    ));

    let admin = if ctx.config.admin.enabled {
        let listener = TcpListener::bind(&ctx.config.admin.bind_address).await?;
        let state = AdminState::new(ctx.clone());
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    if ctx.config.listener.enabled {
        let bridge = FrameBridge::bind(&ctx.config.listener).await?;
        if let Err(e) = bridge.serve(ctx.link_context(), shutdown.clone()).await {
            tracing::error!(error = %e, "Frame bridge failed");
            shutdown.trigger();
        }
    }
    shutdown.wait().await;

    let _ = sweeper.await;
    if let Some(admin) = admin {
        let _ = admin.await;
    }
    // Give links a moment to disconnect their devices.
    tokio::time::sleep(Duration::from_millis(200)).await;

    match Arc::try_unwrap(ctx) {
        Ok(ctx) => ctx.finish().await,
        Err(_) => tracing::warn!("Relay context still shared, skipping audit drain"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
