//! Transaction validation.
//!
//! # Responsibilities
//! - Check the shape of a transaction intent (ids, addresses, amount,
//!   chain, freshness, status, metadata) in a fixed order
//! - Decode and recover the raw signed transaction
//! - Cross-check the intent against what was actually signed
//!
//! # Design Decisions
//! - Validators are pure and return the first failure with one readable
//!   reason; they never panic on bad input
//! - A successful validation yields a typed value, so later stages never
//!   re-parse JSON

pub mod intent;
pub mod signed;

use thiserror::Error;

pub use intent::{IntentMetadata, IntentStatus, TransactionIntent, TransactionValidator};
pub use signed::{check_consistency, validate_signed_transaction, SignedTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Payload is not decodable at all (wrong type, bad hex, bad RLP).
    InvalidFormat,
    /// Payload decodes but a field breaks a rule.
    InvalidField,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn format(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind: ValidationErrorKind::InvalidFormat,
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind: ValidationErrorKind::InvalidField,
            field,
            reason: reason.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
