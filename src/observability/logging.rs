//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binaries
//! - Take the default filter from configuration, letting `RUST_LOG` win
//!
//! # Design Decisions
//! - Key material is never passed to a log macro; types holding secrets
//!   redact themselves in `Debug`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "wireless_relay=info,tower_http=info";

/// Build the filter directive for a configured level.
pub fn filter_directive(log_level: &str) -> String {
    let level = log_level.trim();
    if level.is_empty() {
        DEFAULT_FILTER.to_string()
    } else {
        format!("wireless_relay={level},tower_http={level}")
    }
}

/// Install the global subscriber. Call once from `main`.
pub fn init_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_directive(log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
