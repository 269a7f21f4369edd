//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build RelayContext → Check chains → Start listeners
//!
//! Background (maintenance.rs):
//!     Sweep sessions on an interval → save summary
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Links disconnect devices → Drain audit → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::RelayContext;
