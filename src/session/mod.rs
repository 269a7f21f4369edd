//! Device sessions: pairing, authentication and abuse limits.
//!
//! # Data Flow
//! ```text
//! link connects → manager.connect
//!     → initiate (PENDING, init message out)
//!     → complete_exchange (ECDSA proof, ECDH, PBKDF2 → COMPLETED)
//!     → issue_challenge / verify_auth_response (Ed25519, identity pinned)
//!     → encrypt_for / decrypt_from for all later traffic
//!     → begin_rotation / complete_rotation (fresh keys, old key wiped)
//! ```
//!
//! # State Machine
//! ```text
//! NONE ──initiate──▶ PENDING ──valid response──▶ COMPLETED ──rotate──▶ COMPLETED
//!                      │
//!                      ├─timeout──▶ EXPIRED (counts as a failure)
//!                      └─invalid──▶ NONE    (counts as a failure)
//! failures ≥ limit ──▶ BLOCKED ──block elapses──▶ NONE
//! ```
//!
//! # Design Decisions
//! - Session keys never leave the manager; callers get encrypt/decrypt only
//! - A capacity permit is owned by the pending or completed session state
//! - Deadlines are applied lazily on every access and by the periodic sweep
//! - Authentication failure keeps the key and clears the authenticated flag

pub mod device;
pub mod events;
pub mod manager;
pub mod messages;
pub mod state;

use thiserror::Error;

use crate::crypto::CryptoError;

pub use device::DeviceId;
pub use events::{DeviceEvent, EventBus};
pub use manager::{DeviceStatus, SessionManager, SessionSummary, SweepReport};
pub use state::ExchangeStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Encryption, decryption or rotation without a completed exchange.
    #[error("no completed session")]
    NoSession,

    #[error("session capacity exceeded")]
    CapacityExceeded,

    #[error("device blocked for {remaining_secs}s")]
    DeviceBlocked { remaining_secs: u64 },

    #[error("no pending key exchange")]
    NoPendingExchange,

    #[error("no pending authentication challenge")]
    NoPendingChallenge,

    #[error("key exchange expired")]
    ExchangeExpired,

    #[error("invalid key exchange response: {0}")]
    InvalidResponse(CryptoError),

    #[error("authentication failed")]
    AuthenticationFailed,

    /// Presented identity key differs from the one pinned earlier.
    #[error("identity key does not match pinned key")]
    IdentityMismatch,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type SessionResult<T> = Result<T, SessionError>;
