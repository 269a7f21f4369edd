//! Wireless transaction relay.
//!
//! Accepts pre-signed EVM transactions from devices over a short-range
//! wireless link, through an authenticated encrypted session, and forwards
//! them to the right chain.

pub mod admin;
pub mod blockchain;
pub mod config;
pub mod crypto;
pub mod intake;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod session;
pub mod store;
pub mod transport;
pub mod validation;

pub use config::RelayConfig;
pub use lifecycle::{RelayContext, Shutdown};
