//! Transaction intake.
//!
//! # Data Flow
//! ```text
//! {deviceId, transactionData}
//!     → authenticated?          (requiresAuth)
//!     → blocked?                (deviceBlocked)
//!     → under per-minute cap?   (rateLimited)
//!     → signedTransaction + chainId present and decodable (invalidFormat)
//!     → intent valid and consistent with the signed bytes (validationFailed)
//!     → one broadcast per device at a time
//!     → RelayProcessor
//!     → IntakeOutcome + AuditEvent
//! ```

pub mod gate;
pub mod outcome;

pub use gate::IntakeGate;
pub use outcome::{IntakeOutcome, Rejection};
