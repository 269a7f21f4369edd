//! Per-device bookkeeping.

use std::time::Duration;
use tokio::time::Instant;

use crate::crypto::signature::IdentityKey;

/// Device identifier as announced by the link.
pub type DeviceId = String;

/// Longest accepted device id.
pub const MAX_DEVICE_ID_LEN: usize = 100;

/// Non-empty, at most [`MAX_DEVICE_ID_LEN`] chars of `[A-Za-z0-9_-:.]`.
pub fn is_valid_device_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_DEVICE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
}

/// Length of the fixed transaction rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window transaction counter.
///
/// Mutated only while the device entry lock is held, so concurrent
/// submissions from one device are counted atomically.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Count one transaction if the window still has room.
    pub fn try_acquire(&mut self, limit: u32, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= RATE_WINDOW {
            self.window_start = now;
            self.count = 0;
        }

        if self.count < limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Transactions counted in the current window.
    pub fn used(&self, now: Instant) -> u32 {
        if now.duration_since(self.window_start) >= RATE_WINDOW {
            0
        } else {
            self.count
        }
    }
}

/// A device known to the relay.
#[derive(Debug)]
pub struct Device {
    pub id: DeviceId,
    pub connected: bool,
    pub authenticated: bool,
    pub blocked_until: Option<Instant>,
    pub failed_attempts: u32,
    pub rate_window: RateWindow,
    pub last_seen: Instant,
    /// Ed25519 identity pinned on first successful authentication.
    pub identity_key: Option<IdentityKey>,
}

impl Device {
    pub fn new(id: DeviceId, now: Instant) -> Self {
        Self {
            id,
            connected: false,
            authenticated: false,
            blocked_until: None,
            failed_attempts: 0,
            rate_window: RateWindow::new(now),
            last_seen: now,
            identity_key: None,
        }
    }

    pub fn is_blocked_at(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }
}
