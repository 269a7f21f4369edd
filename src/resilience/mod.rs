//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Frame write to the link:
//!     → tokio::time::timeout (per-write deadline)
//!     → On failure: backoff.rs (exponential delay + jitter, bounded retries)
//! RPC call to a chain:
//!     → tokio::time::timeout (per-call deadline)
//!     → On failure: next failover endpoint (reads only)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Broadcasts are never retried here; retry policy belongs to the caller
//! - Jittered backoff prevents retry storms against a congested link

pub mod backoff;

pub use backoff::{calculate_backoff, RetryPolicy};
