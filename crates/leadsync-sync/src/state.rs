use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::SyncState;
use tokio::sync::Mutex;

/// Accessor for sync bookkeeping, so a shared backend can replace process memory.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn snapshot(&self) -> SyncState;

    /// Marks a run as started and clears the last error. False if one is already running.
    async fn try_begin(&self) -> bool;

    async fn record_success(&self, imported: usize, at: DateTime<Utc>);

    async fn record_failure(&self, error: String);

    /// Returns to idle. Called on every exit path of a started run.
    async fn finish(&self);
}

#[derive(Debug, Default)]
pub struct InProcessSyncState {
    inner: Mutex<SyncState>,
}

#[async_trait]
impl SyncStateStore for InProcessSyncState {
    async fn snapshot(&self) -> SyncState {
        self.inner.lock().await.clone()
    }

    async fn try_begin(&self) -> bool {
        let mut state = self.inner.lock().await;
        if state.is_running {
            return false;
        }
        state.is_running = true;
        state.last_error = None;
        true
    }

    async fn record_success(&self, imported: usize, at: DateTime<Utc>) {
        let mut state = self.inner.lock().await;
        state.last_sync = Some(at);
        state.last_sync_leads_imported = imported;
        state.total_imported += imported;
    }

    async fn record_failure(&self, error: String) {
        self.inner.lock().await.last_error = Some(error);
    }

    async fn finish(&self) {
        self.inner.lock().await.is_running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_is_exclusive_and_clears_previous_error() {
        let state = InProcessSyncState::default();
        state.record_failure("boom".into()).await;

        assert!(state.try_begin().await);
        assert!(!state.try_begin().await);
        assert_eq!(state.snapshot().await.last_error, None);

        state.finish().await;
        assert!(state.try_begin().await);
    }

    #[tokio::test]
    async fn successes_accumulate_totals() {
        let state = InProcessSyncState::default();
        state.record_success(3, Utc::now()).await;
        state.record_success(0, Utc::now()).await;
        let snap = state.snapshot().await;
        assert_eq!(snap.last_sync_leads_imported, 0);
        assert_eq!(snap.total_imported, 3);
        assert!(snap.last_sync.is_some());
    }
}
