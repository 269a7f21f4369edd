//! One connected device: handshake, authentication and transactions.
//!
//! # Responsibilities
//! - Drive the key exchange as soon as the device connects
//! - Reassemble inbound frames and decrypt them once a session exists
//! - Route each message to the session manager or the intake gate
//! - Rotate the session key on schedule
//!
//! # Design Decisions
//! - Messages of one device are handled strictly one at a time, in order
//! - Only `key_exchange_response` is accepted in plaintext; everything
//!   after the exchange is sealed under the session key
//! - A device that gets blocked is disconnected

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::TransportConfig;
use crate::intake::IntakeGate;
use crate::net::envelope::Envelope;
use crate::session::{ExchangeStatus, SessionError, SessionManager};
use crate::transport::{Frame, FrameSink, FramedSender, Reassembler, ReassemblyLimits, TransportError};

const MAINTENANCE_TICK: Duration = Duration::from_secs(1);

/// Why a link stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEnd {
    /// The inbound frame stream ended.
    Closed,
    Shutdown,
    /// The device was refused a session (blocked or no capacity).
    Refused(SessionError),
    /// Frames could not be written.
    Transport(TransportError),
}

pub struct DeviceLink<S> {
    device_id: String,
    sessions: Arc<SessionManager>,
    gate: Arc<IntakeGate>,
    sender: FramedSender<S>,
    reassembler: Reassembler,
}

enum Step {
    Continue,
    Stop(LinkEnd),
}

impl<S: FrameSink> DeviceLink<S> {
    pub fn new(
        device_id: impl Into<String>,
        sessions: Arc<SessionManager>,
        gate: Arc<IntakeGate>,
        sink: S,
        transport: &TransportConfig,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            sessions,
            gate,
            sender: FramedSender::new(sink, transport),
            reassembler: Reassembler::new(ReassemblyLimits::from(transport)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Serve the device until its frame stream ends or shutdown fires.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<Vec<u8>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> LinkEnd {
        self.sessions.connect(&self.device_id).await;
        tracing::info!(device = %self.device_id, "Device link up");

        let end = match self.start_exchange().await {
            Step::Stop(end) => end,
            Step::Continue => self.serve(&mut frames, &mut shutdown).await,
        };

        self.sessions.disconnect(&self.device_id).await;
        tracing::info!(device = %self.device_id, reason = ?end, "Device link down");
        end
    }

    async fn serve(
        &mut self,
        frames: &mut mpsc::Receiver<Vec<u8>>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> LinkEnd {
        let mut ticker = interval(MAINTENANCE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                _ = shutdown.recv() => Step::Stop(LinkEnd::Shutdown),
                frame = frames.recv() => match frame {
                    Some(bytes) => self.on_frame(&bytes).await,
                    None => Step::Stop(LinkEnd::Closed),
                },
                _ = ticker.tick() => self.on_tick().await,
            };
            if let Step::Stop(end) = step {
                return end;
            }
        }
    }

    async fn start_exchange(&mut self) -> Step {
        match self.sessions.initiate(&self.device_id).await {
            Ok(init) => self.send_plain(&Envelope::KeyExchangeInit(init)).await,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Key exchange refused");
                match self.send_plain(&Envelope::error(e.to_string())).await {
                    Step::Continue => Step::Stop(LinkEnd::Refused(e)),
                    stop => stop,
                }
            }
        }
    }

    async fn on_tick(&mut self) -> Step {
        let purged = self.reassembler.purge_expired(Instant::now());
        if purged > 0 {
            tracing::debug!(device = %self.device_id, purged, "Dropped stale partial messages");
        }

        let status = self
            .sessions
            .device_status(&self.device_id)
            .await
            .map(|s| s.exchange_status);
        match status {
            Some(ExchangeStatus::Expired) | Some(ExchangeStatus::None) | None => self.start_exchange().await,
            Some(ExchangeStatus::Blocked) => Step::Stop(LinkEnd::Refused(self.blocked_error().await)),
            Some(ExchangeStatus::Completed) => {
                if self.sessions.needs_challenge(&self.device_id).await {
                    return self.rechallenge().await;
                }
                if !self.sessions.rotation_due(&self.device_id).await {
                    return Step::Continue;
                }
                match self.sessions.begin_rotation(&self.device_id).await {
                    Ok(init) => self.send_sealed(&Envelope::KeyRotationInit(init)).await,
                    Err(e) => {
                        tracing::warn!(device = %self.device_id, error = %e, "Could not start key rotation");
                        Step::Continue
                    }
                }
            }
            Some(ExchangeStatus::Pending) => Step::Continue,
        }
    }

    async fn on_frame(&mut self, bytes: &[u8]) -> Step {
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Dropping unparsable frame");
                return Step::Continue;
            }
        };

        let payload = match self.reassembler.accept(frame, Instant::now()) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Step::Continue,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Dropping frame");
                return Step::Continue;
            }
        };

        if self.sessions.is_completed(&self.device_id).await {
            match self.sessions.decrypt_from(&self.device_id, &payload).await {
                Ok(plaintext) => self.on_sealed_message(&plaintext).await,
                Err(e) => {
                    tracing::warn!(device = %self.device_id, error = %e, "Dropping undecryptable message");
                    Step::Continue
                }
            }
        } else {
            self.on_plain_message(&payload).await
        }
    }

    async fn on_plain_message(&mut self, payload: &[u8]) -> Step {
        let response = match Envelope::parse(payload) {
            Ok(Envelope::KeyExchangeResponse(response)) => response,
            Ok(other) => {
                tracing::warn!(device = %self.device_id, kind = other.kind(), "Message before key exchange");
                return self.send_plain(&Envelope::error("Key exchange required")).await;
            }
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Malformed handshake message");
                return self.send_plain(&Envelope::error("Malformed message")).await;
            }
        };

        match self.sessions.complete_exchange(&self.device_id, &response).await {
            Ok(()) => match self.sessions.issue_challenge(&self.device_id).await {
                Ok(challenge) => self.send_sealed(&Envelope::AuthChallenge(challenge)).await,
                Err(e) => self.send_plain(&Envelope::error(e.to_string())).await,
            },
            Err(e) => {
                if let Step::Stop(end) = self.send_plain(&Envelope::error(e.to_string())).await {
                    return Step::Stop(end);
                }
                if self.sessions.is_blocked(&self.device_id).await {
                    return Step::Stop(LinkEnd::Refused(self.blocked_error().await));
                }
                self.start_exchange().await
            }
        }
    }

    async fn on_sealed_message(&mut self, plaintext: &[u8]) -> Step {
        let envelope = match Envelope::parse(plaintext) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Malformed message");
                return self.send_sealed(&Envelope::error("Malformed message")).await;
            }
        };

        match envelope {
            Envelope::AuthResponse(response) => {
                match self.sessions.verify_auth_response(&self.device_id, &response).await {
                    Ok(()) => {
                        self.send_sealed(&Envelope::AuthResult {
                            authenticated: true,
                            error: None,
                        })
                        .await
                    }
                    Err(e) => {
                        let reply = Envelope::AuthResult {
                            authenticated: false,
                            error: Some(e.to_string()),
                        };
                        if let Step::Stop(end) = self.send_sealed(&reply).await {
                            return Step::Stop(end);
                        }
                        // The session key survives a failed answer; ask again.
                        self.rechallenge().await
                    }
                }
            }
            Envelope::KeyRotationResponse(response) => {
                // The response is sealed under the old key; later traffic uses the new one.
                match self.sessions.complete_rotation(&self.device_id, &response).await {
                    Ok(rotation_count) => {
                        tracing::debug!(device = %self.device_id, rotation_count, "Session key rotated");
                        Step::Continue
                    }
                    Err(e) => self.send_sealed(&Envelope::error(e.to_string())).await,
                }
            }
            Envelope::Transaction { transaction_data } => {
                let outcome = self.gate.submit(&self.device_id, &transaction_data).await;
                let status = serde_json::to_value(&outcome).unwrap_or_default();
                self.send_sealed(&Envelope::TransactionStatus(status)).await
            }
            other => {
                tracing::warn!(device = %self.device_id, kind = other.kind(), "Unexpected message");
                self.send_sealed(&Envelope::error(format!("Unexpected message {}", other.kind())))
                    .await
            }
        }
    }

    /// Issue a fresh challenge to a keyed but unauthenticated device.
    async fn rechallenge(&mut self) -> Step {
        match self.sessions.issue_challenge(&self.device_id).await {
            Ok(challenge) => self.send_sealed(&Envelope::AuthChallenge(challenge)).await,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Could not issue auth challenge");
                Step::Continue
            }
        }
    }

    async fn blocked_error(&self) -> SessionError {
        match self.sessions.check_not_blocked(&self.device_id).await {
            Err(e) => e,
            Ok(()) => SessionError::DeviceBlocked { remaining_secs: 0 },
        }
    }

    fn encode(&self, envelope: &Envelope) -> Option<Vec<u8>> {
        match envelope.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(device = %self.device_id, error = %e, kind = envelope.kind(), "Cannot encode message");
                None
            }
        }
    }

    async fn send_plain(&self, envelope: &Envelope) -> Step {
        match self.encode(envelope) {
            Some(bytes) => self.write(&bytes).await,
            None => Step::Continue,
        }
    }

    async fn send_sealed(&self, envelope: &Envelope) -> Step {
        let Some(bytes) = self.encode(envelope) else {
            return Step::Continue;
        };
        match self.sessions.encrypt_for(&self.device_id, &bytes).await {
            Ok(sealed) => self.write(&sealed).await,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, kind = envelope.kind(), "Cannot seal message");
                Step::Continue
            }
        }
    }

    async fn write(&self, payload: &[u8]) -> Step {
        match self.sender.send(payload).await {
            Ok(_) => Step::Continue,
            Err(e) => {
                tracing::warn!(device = %self.device_id, error = %e, "Link write failed");
                Step::Stop(LinkEnd::Transport(e))
            }
        }
    }
}
