//! The Save Barrier: tracks outstanding player-data writes by id and blocks shutdown until
//! they drain or a timeout elapses (`SPEC_FULL.md` §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::warn;
use uuid::Uuid;

use control_plane_common::now_unix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PendingSave {
    pub user_id: u64,
    pub operation: String,
    pub start_time: u64,
    pub status: SaveStatus,
}

struct Inner {
    saves: HashMap<String, PendingSave>,
}

/// Guards every durable player-data write with a `start`/`complete` pair so shutdown can wait
/// for them to drain instead of truncating an in-flight write.
pub struct SaveBarrier {
    inner: RwLock<Inner>,
    stale_after: Duration,
}

impl SaveBarrier {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner { saves: HashMap::new() }),
            stale_after,
        }
    }

    pub async fn start(&self, user_id: u64, operation: &str) -> String {
        let save_id = format!("{}_{}_{}", user_id, operation, &Uuid::new_v4().simple().to_string()[..8]);
        let mut inner = self.inner.write().await;
        inner.saves.insert(
            save_id.clone(),
            PendingSave {
                user_id,
                operation: operation.to_string(),
                start_time: now_unix(),
                status: SaveStatus::Pending,
            },
        );
        save_id
    }

    pub async fn complete(&self, save_id: &str, success: bool) {
        let mut inner = self.inner.write().await;
        if let Some(save) = inner.saves.get_mut(save_id) {
            save.status = if success { SaveStatus::Completed } else { SaveStatus::Failed };
        }
        inner.saves.remove(save_id);
    }

    pub async fn pending(&self) -> Vec<String> {
        self.inner.read().await.saves.keys().cloned().collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.read().await.saves.len()
    }

    /// Polls every 200ms until the pending set drains or `timeout` elapses.
    /// Returns `true` if it drained, `false` on timeout.
    pub async fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending_count().await == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pending = self.pending_count().await,
                    "save barrier drain timed out, proceeding with shutdown anyway"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Background janitor: drops save records older than `stale_after` with a warning. Run this
    /// in a loop on a fixed cadence from the owning process's startup task.
    pub async fn cleanup_stale(&self) {
        let now = now_unix();
        let stale_secs = self.stale_after.as_secs();
        let mut inner = self.inner.write().await;
        let stale_ids: Vec<String> = inner
            .saves
            .iter()
            .filter(|(_, save)| now.saturating_sub(save.start_time) > stale_secs)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale_ids {
            warn!(save_id = %id, "dropping stale pending save");
            inner.saves.remove(&id);
        }
    }
}

pub type SharedSaveBarrier = Arc<SaveBarrier>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_complete_round_trip() {
        let barrier = SaveBarrier::new(Duration::from_secs(30));
        let id = barrier.start(1, "update").await;
        assert_eq!(barrier.pending_count().await, 1);
        barrier.complete(&id, true).await;
        assert_eq!(barrier.pending_count().await, 0);
    }

    #[tokio::test]
    async fn wait_all_returns_true_once_drained() {
        let barrier = Arc::new(SaveBarrier::new(Duration::from_secs(30)));
        let id = barrier.start(1, "update").await;
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_all(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        barrier.complete(&id, true).await;
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_all_times_out_with_saves_still_pending() {
        let barrier = SaveBarrier::new(Duration::from_secs(30));
        let _id = barrier.start(1, "update").await;
        let drained = barrier.wait_all(Duration::from_millis(100)).await;
        assert!(!drained);
        assert_eq!(barrier.pending_count().await, 1);
    }

    #[tokio::test]
    async fn janitor_drops_only_stale_saves() {
        let barrier = SaveBarrier::new(Duration::from_millis(50));
        let id = barrier.start(1, "update").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        barrier.cleanup_stale().await;
        assert_eq!(barrier.pending_count().await, 0);
        assert!(!barrier.pending().await.contains(&id));
    }
}
