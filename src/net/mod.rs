//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Wireless adapter (TCP, one connection per device)
//!     → bridge.rs (accept loop, connection limits, hello, line framing)
//!     → link.rs (per-device driver: handshake, auth, transactions)
//!     → envelope.rs (typed messages inside reassembled payloads)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each link subscribes to shutdown and disconnects its device on exit
//! - A device id may hold only one live link

pub mod bridge;
pub mod envelope;
pub mod link;

pub use bridge::{BridgeError, FrameBridge, LineSink, LinkContext};
pub use envelope::Envelope;
pub use link::{DeviceLink, LinkEnd};
