//! Key-exchange session state.

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use crate::crypto::{EphemeralKeyPair, PeerPublicKey, SessionKey};

/// Externally visible key-exchange status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    None,
    Pending,
    Completed,
    Expired,
    Blocked,
}

/// Waiting for the device's response to an init.
pub(crate) struct PendingExchange {
    pub ephemeral: EphemeralKeyPair,
    pub deadline: Instant,
    pub permit: OwnedSemaphorePermit,
}

/// A relay-initiated rotation awaiting the device's fresh key.
pub(crate) struct PendingRotation {
    pub ephemeral: EphemeralKeyPair,
    pub nonce: Vec<u8>,
    pub deadline: Instant,
}

/// An established session. The only place a session key lives.
pub(crate) struct CompletedSession {
    pub key: SessionKey,
    pub peer_public_key: PeerPublicKey,
    pub rotation: Option<PendingRotation>,
    pub keyed_at: Instant,
    pub permit: OwnedSemaphorePermit,
}

pub(crate) enum Phase {
    Pending(PendingExchange),
    Completed(CompletedSession),
    Expired,
    Blocked { until: Instant },
}

pub(crate) struct KeyExchangeSession {
    pub phase: Phase,
    pub nonce: Vec<u8>,
    pub created_at: Instant,
    pub rotation_count: u32,
}

impl KeyExchangeSession {
    pub fn status(&self) -> ExchangeStatus {
        match self.phase {
            Phase::Pending(_) => ExchangeStatus::Pending,
            Phase::Completed(_) => ExchangeStatus::Completed,
            Phase::Expired => ExchangeStatus::Expired,
            Phase::Blocked { .. } => ExchangeStatus::Blocked,
        }
    }

    pub fn completed(&self) -> Option<&CompletedSession> {
        match &self.phase {
            Phase::Completed(session) => Some(session),
            _ => None,
        }
    }

    pub fn completed_mut(&mut self) -> Option<&mut CompletedSession> {
        match &mut self.phase {
            Phase::Completed(session) => Some(session),
            _ => None,
        }
    }

    /// Move the capacity permit out, leaving the phase `Expired`.
    pub fn take_permit(&mut self) -> Option<OwnedSemaphorePermit> {
        match std::mem::replace(&mut self.phase, Phase::Expired) {
            Phase::Pending(pending) => Some(pending.permit),
            Phase::Completed(session) => Some(session.permit),
            other => {
                self.phase = other;
                None
            }
        }
    }
}

/// Outstanding authentication challenge.
pub(crate) struct PendingChallenge {
    pub challenge: [u8; 32],
    pub deadline: Instant,
}
