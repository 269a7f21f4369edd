//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Intake gate produces:
//!     → audit.rs (one audit event per decision)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Store (audit records)
//! ```

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEvent, AuditReporter, FanoutReporter, StoreReporter, TracingReporter};
