//! Periodic session sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::session::SessionManager;
use crate::store::Store;

/// Store key for the latest aggregate session counts.
pub const SUMMARY_KEY: &str = "relay/session-summary";

/// Sweep sessions every `every` until shutdown, saving a summary each pass.
pub async fn run_sweeper(
    sessions: Arc<SessionManager>,
    store: Arc<dyn Store>,
    every: Duration,
    shutdown: Arc<Shutdown>,
) {
    let mut stop = shutdown.subscribe();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = ticker.tick() => {}
        }

        let report = sessions.sweep().await;
        if report.expired + report.unblocked + report.purged > 0 {
            tracing::info!(
                expired = report.expired,
                unblocked = report.unblocked,
                purged = report.purged,
                "Session sweep"
            );
        }

        let summary = sessions.summary().await;
        if let Ok(value) = serde_json::to_value(&summary) {
            let store = store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save(SUMMARY_KEY, value).await {
                    tracing::warn!(error = %e, "Failed to save session summary");
                }
            });
        }
    }

    tracing::debug!("Session sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::crypto::RelayIdentity;
    use crate::session::EventBus;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_sweeper_saves_summary_and_stops() {
        let sessions = Arc::new(SessionManager::new(
            SessionConfig::default(),
            10,
            Arc::new(RelayIdentity::generate()),
            EventBus::default(),
        ));
        let store = Arc::new(MemoryStore::new());
        let shutdown = Arc::new(Shutdown::new());

        let task = tokio::spawn(run_sweeper(
            sessions,
            store.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        let summary = store.get(SUMMARY_KEY).await.unwrap().unwrap();
        assert_eq!(summary["devices"], 0);
        assert_eq!(summary["availableSlots"], 100);
    }
}
