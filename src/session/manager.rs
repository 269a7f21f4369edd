//! Session manager: per-device key exchange, authentication and limits.
//!
//! Each device lives in its own slot behind an async mutex. The map lock is
//! never held across an await, so distinct devices never wait on each other
//! while one device's operations run strictly in order.

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::crypto::kdf::derive_session_key_offloaded;
use crate::crypto::signature::IdentityKey;
use crate::crypto::{aead, EphemeralKeyPair, PeerPublicKey, RelayIdentity};
use crate::observability::metrics;
use crate::session::device::{Device, DeviceId};
use crate::session::events::{DeviceEvent, EventBus};
use crate::session::messages::{self, AuthChallenge, AuthResponse, KeyExchangeInit, KeyExchangeResponse};
use crate::session::state::{
    CompletedSession, ExchangeStatus, KeyExchangeSession, PendingChallenge, PendingExchange,
    PendingRotation, Phase,
};
use crate::session::{SessionError, SessionResult};

const NONCE_LEN: usize = 32;
const CHALLENGE_LEN: usize = 32;

struct DeviceEntry {
    device: Device,
    session: Option<KeyExchangeSession>,
    challenge: Option<PendingChallenge>,
    /// Set once the slot has left the map. A retired entry is never revived.
    retired: bool,
}

struct DeviceSlot {
    state: Arc<Mutex<DeviceEntry>>,
    broadcast: Arc<Mutex<()>>,
}

/// Snapshot of one device for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub connected: bool,
    pub authenticated: bool,
    /// Unix milliseconds when the current block lifts.
    pub blocked_until: Option<u64>,
    pub failed_attempts: u32,
    pub exchange_status: ExchangeStatus,
    pub rotation_count: u32,
    pub session_age_secs: Option<u64>,
    pub transactions_this_window: u32,
    pub idle_secs: u64,
}

/// Aggregate counts across all devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub devices: usize,
    pub completed: usize,
    pub pending: usize,
    pub blocked: usize,
    pub authenticated: usize,
    pub available_slots: usize,
}

/// What a sweep pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub unblocked: usize,
    pub purged: usize,
}

pub struct SessionManager {
    devices: DashMap<DeviceId, Arc<DeviceSlot>>,
    capacity: Arc<Semaphore>,
    identity: Arc<RelayIdentity>,
    config: SessionConfig,
    transactions_per_minute: u32,
    events: EventBus,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        transactions_per_minute: u32,
        identity: Arc<RelayIdentity>,
        events: EventBus,
    ) -> Self {
        Self {
            devices: DashMap::new(),
            capacity: Arc::new(Semaphore::new(config.max_sessions)),
            identity,
            config,
            transactions_per_minute,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn identity(&self) -> &RelayIdentity {
        &self.identity
    }

    fn slot(&self, device_id: &str) -> Option<Arc<DeviceSlot>> {
        self.devices.get(device_id).map(|s| s.value().clone())
    }

    fn slot_or_create(&self, device_id: &str) -> Arc<DeviceSlot> {
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                Arc::new(DeviceSlot {
                    state: Arc::new(Mutex::new(DeviceEntry {
                        device: Device::new(device_id.to_string(), Instant::now()),
                        session: None,
                        challenge: None,
                        retired: false,
                    })),
                    broadcast: Arc::new(Mutex::new(())),
                })
            })
            .clone()
    }

    /// Lock the live entry for `device_id`, creating it if needed.
    ///
    /// Skips over a slot that was retired between lookup and lock.
    async fn lock_or_create(&self, device_id: &str) -> OwnedMutexGuard<DeviceEntry> {
        loop {
            let entry = self.slot_or_create(device_id).state.clone().lock_owned().await;
            if !entry.retired {
                return entry;
            }
        }
    }

    /// Retire `slot` and drop it from the map. Must be called with its entry locked.
    fn retire(&self, device_id: &str, slot: &Arc<DeviceSlot>, entry: &mut DeviceEntry) {
        entry.retired = true;
        self.devices.remove_if(device_id, |_, current| Arc::ptr_eq(current, slot));
    }

    fn update_session_gauge(&self) {
        metrics::set_active_sessions(self.config.max_sessions - self.capacity.available_permits());
    }

    /// Register a link to `device_id`.
    pub async fn connect(&self, device_id: &str) {
        let mut entry = self.lock_or_create(device_id).await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.connected = true;
        entry.device.touch(now);
        tracing::info!(device = %device_id, "Device connected");
        self.events.publish(DeviceEvent::Connected {
            device_id: device_id.to_string(),
        });
    }

    /// Drop the link. Keys are destroyed; a block survives the disconnect.
    pub async fn disconnect(&self, device_id: &str) {
        let Some(slot) = self.slot(device_id) else {
            return;
        };
        let mut entry = slot.state.lock().await;
        if entry.retired {
            return;
        }
        let now = Instant::now();
        self.refresh(&mut entry, now);

        entry.device.connected = false;
        entry.device.authenticated = false;
        entry.challenge = None;
        let blocked = entry.device.is_blocked_at(now);
        if !blocked {
            entry.session = None;
            self.retire(device_id, &slot, &mut entry);
        }
        drop(entry);

        self.update_session_gauge();
        tracing::info!(device = %device_id, kept_block = blocked, "Device disconnected");
        self.events.publish(DeviceEvent::Disconnected {
            device_id: device_id.to_string(),
        });
    }

    /// Start a key exchange. Replaces any existing session for the device.
    pub async fn initiate(&self, device_id: &str) -> SessionResult<KeyExchangeInit> {
        let mut entry = self.lock_or_create(device_id).await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.touch(now);
        self.ensure_not_blocked(&entry, now)?;

        let reused = entry.session.as_mut().and_then(|s| s.take_permit());
        let permit = match reused {
            Some(permit) => permit,
            None => self.capacity.clone().try_acquire_owned().map_err(|_| {
                tracing::warn!(device = %device_id, "Session capacity exceeded");
                SessionError::CapacityExceeded
            })?,
        };

        let ephemeral = EphemeralKeyPair::generate();
        let relay_ephemeral = ephemeral.public_key_bytes();
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let signature = self
            .identity
            .sign(&messages::init_transcript(device_id, &nonce, &relay_ephemeral));
        let init = KeyExchangeInit {
            public_key: messages::encode(&relay_ephemeral),
            nonce: messages::encode(&nonce),
            relay_public_key: messages::encode(&self.identity.public_key_bytes()),
            relay_signature: Some(messages::encode(&signature)),
        };

        entry.device.authenticated = false;
        entry.challenge = None;
        entry.session = Some(KeyExchangeSession {
            phase: Phase::Pending(PendingExchange {
                ephemeral,
                deadline: now + self.config.exchange_timeout(),
                permit,
            }),
            nonce,
            created_at: now,
            rotation_count: 0,
        });
        drop(entry);

        self.update_session_gauge();
        tracing::debug!(device = %device_id, "Key exchange initiated");
        Ok(init)
    }

    /// Finish a pending exchange with the device's response.
    pub async fn complete_exchange(
        &self,
        device_id: &str,
        response: &KeyExchangeResponse,
    ) -> SessionResult<()> {
        let slot = self.slot(device_id).ok_or(SessionError::NoPendingExchange)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.touch(now);
        self.ensure_not_blocked(&entry, now)?;

        let Some(session) = entry.session.as_mut() else {
            return Err(SessionError::NoPendingExchange);
        };
        let pending = match std::mem::replace(&mut session.phase, Phase::Expired) {
            Phase::Pending(pending) => pending,
            other => {
                session.phase = other;
                return Err(SessionError::NoPendingExchange);
            }
        };
        let nonce = session.nonce.clone();

        let PendingExchange {
            ephemeral, permit, ..
        } = pending;

        let peer = match verify_response(device_id, &nonce, &ephemeral, response) {
            Ok(peer) => peer,
            Err(e) => {
                drop(ephemeral);
                drop(permit);
                let err = self.record_failure(&mut entry, now, e);
                if !entry.device.is_blocked_at(now) {
                    entry.session = None;
                }
                return Err(err);
            }
        };

        let shared = ephemeral.diffie_hellman(&peer);
        drop(ephemeral);
        let key = derive_session_key_offloaded(
            shared,
            device_id.to_string(),
            nonce,
            self.config.kdf_iterations,
        )
        .await;

        let completed_at = Instant::now();
        if let Some(session) = entry.session.as_mut() {
            session.phase = Phase::Completed(CompletedSession {
                key,
                peer_public_key: peer,
                rotation: None,
                keyed_at: completed_at,
                permit,
            });
        }
        entry.device.failed_attempts = 0;
        drop(entry);

        metrics::record_key_exchange("completed");
        tracing::info!(device = %device_id, "Key exchange completed");
        self.events.publish(DeviceEvent::KeyExchangeCompleted {
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    /// Start a rotation of an established session key.
    pub async fn begin_rotation(&self, device_id: &str) -> SessionResult<KeyExchangeInit> {
        let slot = self.slot(device_id).ok_or(SessionError::NoSession)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);

        let deadline = now + self.config.exchange_timeout();
        let session = entry.session.as_mut().ok_or(SessionError::NoSession)?;
        let completed = session.completed_mut().ok_or(SessionError::NoSession)?;

        let ephemeral = EphemeralKeyPair::generate();
        let relay_ephemeral = ephemeral.public_key_bytes();
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let signature = self
            .identity
            .sign(&messages::init_transcript(device_id, &nonce, &relay_ephemeral));
        let init = KeyExchangeInit {
            public_key: messages::encode(&relay_ephemeral),
            nonce: messages::encode(&nonce),
            relay_public_key: messages::encode(&self.identity.public_key_bytes()),
            relay_signature: Some(messages::encode(&signature)),
        };

        completed.rotation = Some(PendingRotation {
            ephemeral,
            nonce,
            deadline,
        });
        tracing::debug!(device = %device_id, "Key rotation initiated");
        Ok(init)
    }

    /// Swap in the rotated key. The previous key is wiped when replaced.
    pub async fn complete_rotation(
        &self,
        device_id: &str,
        response: &KeyExchangeResponse,
    ) -> SessionResult<u32> {
        let slot = self.slot(device_id).ok_or(SessionError::NoSession)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.touch(now);

        let session = entry.session.as_mut().ok_or(SessionError::NoSession)?;
        let completed = session.completed_mut().ok_or(SessionError::NoSession)?;
        let rotation = completed.rotation.take().ok_or(SessionError::NoPendingExchange)?;

        let peer = match verify_response(device_id, &rotation.nonce, &rotation.ephemeral, response) {
            Ok(peer) => peer,
            Err(e) => {
                drop(rotation);
                return Err(self.record_failure(&mut entry, now, e));
            }
        };

        let shared = rotation.ephemeral.diffie_hellman(&peer);
        let key = derive_session_key_offloaded(
            shared,
            device_id.to_string(),
            rotation.nonce.clone(),
            self.config.kdf_iterations,
        )
        .await;

        let rotated_at = Instant::now();
        let session = entry.session.as_mut().ok_or(SessionError::NoSession)?;
        session.nonce = rotation.nonce;
        session.rotation_count += 1;
        let rotation_count = session.rotation_count;
        let completed = session.completed_mut().ok_or(SessionError::NoSession)?;
        completed.key = key;
        completed.peer_public_key = peer;
        completed.keyed_at = rotated_at;
        drop(entry);

        metrics::record_key_exchange("rotated");
        tracing::info!(device = %device_id, rotation_count, "Session key rotated");
        self.events.publish(DeviceEvent::KeyRotated {
            device_id: device_id.to_string(),
            rotation_count,
        });
        Ok(rotation_count)
    }

    /// Whether the current key is older than the configured rotation interval.
    pub async fn rotation_due(&self, device_id: &str) -> bool {
        if self.config.rotation_interval_secs == 0 {
            return false;
        }
        let Some(slot) = self.slot(device_id) else {
            return false;
        };
        let entry = slot.state.lock().await;
        entry
            .session
            .as_ref()
            .and_then(|s| s.completed())
            .is_some_and(|c| {
                c.rotation.is_none()
                    && c.keyed_at.elapsed() >= Duration::from_secs(self.config.rotation_interval_secs)
            })
    }

    /// Issue an authentication challenge over an established session.
    pub async fn issue_challenge(&self, device_id: &str) -> SessionResult<AuthChallenge> {
        let slot = self.slot(device_id).ok_or(SessionError::NoSession)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);

        if entry.session.as_ref().and_then(|s| s.completed()).is_none() {
            return Err(SessionError::NoSession);
        }

        let mut challenge = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut challenge);
        entry.challenge = Some(PendingChallenge {
            challenge,
            deadline: now + self.config.auth_timeout(),
        });

        Ok(AuthChallenge {
            challenge: messages::encode(&challenge),
            relay_public_key: messages::encode(&self.identity.public_key_bytes()),
        })
    }

    /// Check a challenge response. On failure the session key is kept and
    /// the device is marked unauthenticated.
    pub async fn verify_auth_response(
        &self,
        device_id: &str,
        response: &AuthResponse,
    ) -> SessionResult<()> {
        let slot = self.slot(device_id).ok_or(SessionError::NoSession)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.touch(now);

        if entry.session.as_ref().and_then(|s| s.completed()).is_none() {
            return Err(SessionError::NoSession);
        }
        let pending = entry.challenge.take().ok_or(SessionError::NoPendingChallenge)?;

        let result = self.check_auth(&entry.device, device_id, &pending.challenge, response);
        match result {
            Ok(key) => {
                entry.device.authenticated = true;
                entry.device.identity_key = Some(key);
                drop(entry);
                tracing::info!(device = %device_id, "Device authenticated");
                self.events.publish(DeviceEvent::Authenticated {
                    device_id: device_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                entry.device.authenticated = false;
                drop(entry);
                tracing::warn!(device = %device_id, error = %e, "Device authentication failed");
                self.events.publish(DeviceEvent::AuthenticationFailed {
                    device_id: device_id.to_string(),
                });
                Err(e)
            }
        }
    }

    fn check_auth(
        &self,
        device: &Device,
        device_id: &str,
        challenge: &[u8],
        response: &AuthResponse,
    ) -> SessionResult<IdentityKey> {
        let presented = response
            .public_key
            .as_deref()
            .map(|k| messages::decode("publicKey", k).and_then(|b| Ok(IdentityKey::from_bytes(&b)?)))
            .transpose()?;

        let key = match (device.identity_key, presented) {
            (Some(pinned), Some(presented)) if pinned != presented => {
                return Err(SessionError::IdentityMismatch)
            }
            (Some(pinned), _) => pinned,
            (None, Some(presented)) => presented,
            (None, None) => {
                return Err(SessionError::Malformed(
                    "publicKey is required on first authentication".to_string(),
                ))
            }
        };

        let signature = messages::decode("signature", &response.signature)?;
        key.verify(&messages::auth_transcript(device_id, challenge), &signature)
            .map_err(|_| SessionError::AuthenticationFailed)?;
        Ok(key)
    }

    pub async fn is_completed(&self, device_id: &str) -> bool {
        self.status_of(device_id).await == Some(ExchangeStatus::Completed)
    }

    pub async fn is_blocked(&self, device_id: &str) -> bool {
        let Some(slot) = self.slot(device_id) else {
            return false;
        };
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.is_blocked_at(now)
    }

    /// `DeviceBlocked` with the remaining block time, if any.
    pub async fn check_not_blocked(&self, device_id: &str) -> SessionResult<()> {
        let Some(slot) = self.slot(device_id) else {
            return Ok(());
        };
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        self.ensure_not_blocked(&entry, now)
    }

    /// Keyed, not authenticated, and no challenge outstanding.
    pub async fn needs_challenge(&self, device_id: &str) -> bool {
        let Some(slot) = self.slot(device_id) else {
            return false;
        };
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        !entry.device.authenticated
            && entry.challenge.is_none()
            && !entry.device.is_blocked_at(now)
            && entry.session.as_ref().and_then(|s| s.completed()).is_some()
    }

    pub async fn is_authenticated(&self, device_id: &str) -> bool {
        let Some(slot) = self.slot(device_id) else {
            return false;
        };
        let mut entry = slot.state.lock().await;
        self.refresh(&mut entry, Instant::now());
        entry.device.authenticated && entry.session.as_ref().and_then(|s| s.completed()).is_some()
    }

    async fn status_of(&self, device_id: &str) -> Option<ExchangeStatus> {
        let slot = self.slot(device_id)?;
        let mut entry = slot.state.lock().await;
        self.refresh(&mut entry, Instant::now());
        entry.session.as_ref().map(|s| s.status())
    }

    /// Seal `plaintext` under the device's session key.
    pub async fn encrypt_for(&self, device_id: &str, plaintext: &[u8]) -> SessionResult<Vec<u8>> {
        let slot = self.slot(device_id).ok_or(SessionError::NoSession)?;
        let mut entry = slot.state.lock().await;
        self.refresh(&mut entry, Instant::now());
        let completed = entry
            .session
            .as_ref()
            .and_then(|s| s.completed())
            .ok_or(SessionError::NoSession)?;
        Ok(aead::seal(&completed.key, plaintext)?)
    }

    /// Open a payload sealed by the device.
    pub async fn decrypt_from(&self, device_id: &str, sealed: &[u8]) -> SessionResult<Vec<u8>> {
        let slot = self.slot(device_id).ok_or(SessionError::NoSession)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        entry.device.touch(now);
        let completed = entry
            .session
            .as_ref()
            .and_then(|s| s.completed())
            .ok_or(SessionError::NoSession)?;
        Ok(aead::open(&completed.key, sealed)?)
    }

    /// Count one transaction against the device's per-minute budget.
    pub async fn admit_transaction(&self, device_id: &str) -> bool {
        let mut entry = self.lock_or_create(device_id).await;
        let now = Instant::now();
        entry.device.touch(now);
        let admitted = entry
            .device
            .rate_window
            .try_acquire(self.transactions_per_minute, now);
        if !admitted {
            metrics::record_rate_limited();
            tracing::warn!(device = %device_id, limit = self.transactions_per_minute, "Transaction rate limit exceeded");
        }
        admitted
    }

    /// Serialize broadcasts for one device. Held for the whole relay call.
    pub async fn broadcast_guard(&self, device_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.slot_or_create(device_id).broadcast.clone();
        lock.lock_owned().await
    }

    /// Expire stale state and purge idle devices.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = Instant::now();
        let slots: Vec<(DeviceId, Arc<DeviceSlot>)> = self
            .devices
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (device_id, slot) in slots {
            let Ok(mut entry) = slot.state.try_lock() else {
                continue;
            };
            if entry.retired {
                continue;
            }
            let was_expired = entry.session.as_ref().map(|s| s.status()) == Some(ExchangeStatus::Expired);
            let was_blocked = entry.device.blocked_until.is_some();
            self.refresh(&mut entry, now);

            if !was_expired
                && entry.session.as_ref().map(|s| s.status()) == Some(ExchangeStatus::Expired)
            {
                report.expired += 1;
            }
            if was_blocked && entry.device.blocked_until.is_none() {
                report.unblocked += 1;
            }

            let idle = now.duration_since(entry.device.last_seen);
            if idle >= self.config.inactivity_timeout() && !entry.device.is_blocked_at(now) {
                entry.session = None;
                entry.challenge = None;
                self.retire(&device_id, &slot, &mut entry);
                drop(entry);
                report.purged += 1;
                tracing::info!(device = %device_id, idle_secs = idle.as_secs(), "Purged idle device");
                self.events.publish(DeviceEvent::Purged { device_id });
            }
        }

        self.update_session_gauge();
        report
    }

    pub async fn device_status(&self, device_id: &str) -> Option<DeviceStatus> {
        let slot = self.slot(device_id)?;
        let mut entry = slot.state.lock().await;
        let now = Instant::now();
        self.refresh(&mut entry, now);
        Some(snapshot(&entry, now))
    }

    pub async fn list_devices(&self) -> Vec<DeviceStatus> {
        let slots: Vec<Arc<DeviceSlot>> = self.devices.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let mut entry = slot.state.lock().await;
            let now = Instant::now();
            self.refresh(&mut entry, now);
            out.push(snapshot(&entry, now));
        }
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }

    pub async fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary {
            available_slots: self.capacity.available_permits(),
            ..Default::default()
        };
        for status in self.list_devices().await {
            summary.devices += 1;
            match status.exchange_status {
                ExchangeStatus::Completed => summary.completed += 1,
                ExchangeStatus::Pending => summary.pending += 1,
                _ => {}
            }
            if status.blocked_until.is_some() {
                summary.blocked += 1;
            }
            if status.authenticated {
                summary.authenticated += 1;
            }
        }
        summary
    }

    fn ensure_not_blocked(&self, entry: &DeviceEntry, now: Instant) -> SessionResult<()> {
        match entry.device.blocked_until {
            Some(until) if now < until => Err(SessionError::DeviceBlocked {
                remaining_secs: until.duration_since(now).as_secs().max(1),
            }),
            _ => Ok(()),
        }
    }

    /// Count a failed exchange. Blocks the device once the limit is reached,
    /// otherwise returns `cause`.
    fn record_failure(&self, entry: &mut DeviceEntry, now: Instant, cause: SessionError) -> SessionError {
        entry.device.failed_attempts += 1;
        let attempts = entry.device.failed_attempts;
        metrics::record_key_exchange("failed");

        if attempts >= self.config.max_failed_attempts {
            let until = now + self.config.block_duration();
            entry.device.blocked_until = Some(until);
            entry.device.authenticated = false;
            entry.challenge = None;
            if let Some(session) = entry.session.as_mut() {
                session.phase = Phase::Blocked { until };
            }
            self.update_session_gauge();
            metrics::record_device_blocked();
            tracing::warn!(
                device = %entry.device.id,
                attempts,
                block_secs = self.config.block_duration_secs,
                "Device blocked after repeated key exchange failures"
            );
            self.events.publish(DeviceEvent::Blocked {
                device_id: entry.device.id.clone(),
                duration_secs: self.config.block_duration_secs,
            });
            return SessionError::DeviceBlocked {
                remaining_secs: self.config.block_duration_secs,
            };
        }

        tracing::warn!(device = %entry.device.id, attempts, error = %cause, "Key exchange failed");
        self.update_session_gauge();
        cause
    }

    /// Apply every deadline that has passed.
    fn refresh(&self, entry: &mut DeviceEntry, now: Instant) {
        if let Some(until) = entry.device.blocked_until {
            if now >= until {
                entry.device.blocked_until = None;
                entry.device.failed_attempts = 0;
                entry.session = None;
                tracing::info!(device = %entry.device.id, "Device block lifted");
                self.events.publish(DeviceEvent::Unblocked {
                    device_id: entry.device.id.clone(),
                });
            }
        }

        let pending_expired = matches!(
            entry.session.as_ref().map(|s| &s.phase),
            Some(Phase::Pending(p)) if now >= p.deadline
        );
        if pending_expired {
            if let Some(session) = entry.session.as_mut() {
                // Drops the ephemeral key and releases the capacity permit.
                session.phase = Phase::Expired;
            }
            tracing::debug!(device = %entry.device.id, "Key exchange expired");
            self.events.publish(DeviceEvent::KeyExchangeExpired {
                device_id: entry.device.id.clone(),
            });
            self.record_failure(entry, now, SessionError::ExchangeExpired);
        }

        if let Some(completed) = entry.session.as_mut().and_then(|s| s.completed_mut()) {
            if completed.rotation.as_ref().is_some_and(|r| now >= r.deadline) {
                completed.rotation = None;
                tracing::debug!(device = %entry.device.id, "Pending key rotation discarded");
            }
        }

        if entry.challenge.as_ref().is_some_and(|c| now >= c.deadline) {
            entry.challenge = None;
        }
    }
}

fn verify_response(
    device_id: &str,
    nonce: &[u8],
    ephemeral: &EphemeralKeyPair,
    response: &KeyExchangeResponse,
) -> SessionResult<PeerPublicKey> {
    let device_key = messages::decode("publicKey", &response.public_key)?;
    let signature = messages::decode("signature", &response.signature)?;
    let peer = PeerPublicKey::from_sec1_bytes(&device_key).map_err(SessionError::InvalidResponse)?;

    let transcript =
        messages::response_transcript(device_id, nonce, &ephemeral.public_key_bytes(), peer.as_bytes());
    peer.verify(&transcript, &signature)
        .map_err(SessionError::InvalidResponse)?;
    Ok(peer)
}

fn snapshot(entry: &DeviceEntry, now: Instant) -> DeviceStatus {
    let blocked_until = entry.device.blocked_until.filter(|u| now < *u).map(|until| {
        let remaining = until.duration_since(now);
        SystemTime::now()
            .checked_add(remaining)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(u64::MAX)
    });
    DeviceStatus {
        device_id: entry.device.id.clone(),
        connected: entry.device.connected,
        authenticated: entry.device.authenticated,
        blocked_until,
        failed_attempts: entry.device.failed_attempts,
        exchange_status: if blocked_until.is_some() {
            ExchangeStatus::Blocked
        } else {
            entry.session.as_ref().map_or(ExchangeStatus::None, |s| s.status())
        },
        rotation_count: entry.session.as_ref().map_or(0, |s| s.rotation_count),
        session_age_secs: entry
            .session
            .as_ref()
            .map(|s| now.duration_since(s.created_at).as_secs()),
        transactions_this_window: entry.device.rate_window.used(now),
        idle_secs: now.duration_since(entry.device.last_seen).as_secs(),
    }
}
