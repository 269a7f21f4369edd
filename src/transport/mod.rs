//! Framed transport over a lossy, small-MTU link.
//!
//! # Data Flow
//! ```text
//! send:    sealed payload → frame.rs (base64 chunks + end frame)
//!              → sender.rs (per-frame timeout, backoff retries) → FrameSink
//! receive: frame bytes → frame.rs (parse)
//!              → assembler.rs (per-id buffer, deadline, size caps)
//!              → complete payload → session manager (decrypt)
//! ```

pub mod assembler;
pub mod frame;
pub mod sender;

use thiserror::Error;

pub use assembler::{ReassemblyLimits, Reassembler};
pub use frame::{split_message, Frame};
pub use sender::{FrameSink, FramedSender};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("frame write failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("too many partial messages")]
    TooManyPending,

    #[error("end frame for unknown message {0}")]
    UnknownMessage(String),

    #[error("link closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;
