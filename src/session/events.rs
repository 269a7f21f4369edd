//! Device lifecycle events.
//!
//! Published on a bounded broadcast channel. Subscribers that fall behind
//! lose the oldest events and observe `RecvError::Lagged`.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::device::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    Connected { device_id: DeviceId },
    Disconnected { device_id: DeviceId },
    KeyExchangeCompleted { device_id: DeviceId },
    KeyExchangeExpired { device_id: DeviceId },
    KeyRotated { device_id: DeviceId, rotation_count: u32 },
    Authenticated { device_id: DeviceId },
    AuthenticationFailed { device_id: DeviceId },
    Blocked { device_id: DeviceId, duration_secs: u64 },
    Unblocked { device_id: DeviceId },
    Purged { device_id: DeviceId },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. No subscribers is not an error.
    pub fn publish(&self, event: DeviceEvent) {
        tracing::trace!(?event, "device event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_lagging_subscriber_loses_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..3 {
            bus.publish(DeviceEvent::Connected {
                device_id: format!("d{}", i),
            });
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::Connected { device_id: "d1".into() }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventBus::new(1).publish(DeviceEvent::Purged { device_id: "x".into() });
    }
}
