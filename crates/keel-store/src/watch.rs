//! Watch subscriptions over a kind's change feed
//!
//! A subscription merges the replay log with the live broadcast channel.
//! Delivery is at-least-once: resuming from a cursor never loses a change,
//! duplicates are filtered by cursor, and a receiver that lags past the
//! broadcast buffer re-syncs through the log. Cancellation is dropping the
//! subscription.

use crate::error::StoreResult;
use crate::traits::ResourceStore;
use keel_types::{ChangeEvent, ResourceKind};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, warn};

/// An infinite, cancellable stream of [`ChangeEvent`]s for one kind.
pub struct WatchSubscription {
    store: Arc<dyn ResourceStore>,
    kind: ResourceKind,
    /// Next cursor this subscription expects.
    cursor: u64,
    rx: broadcast::Receiver<ChangeEvent>,
    backlog: VecDeque<ChangeEvent>,
}

/// Open a subscription. `from_cursor` of `None` starts at the feed head
/// (only new changes); `Some(c)` replays everything at or after `c`.
pub async fn watch(
    store: Arc<dyn ResourceStore>,
    kind: ResourceKind,
    from_cursor: Option<u64>,
) -> StoreResult<WatchSubscription> {
    // Subscribe before reading the log so nothing falls in between.
    let rx = store.subscribe(kind);
    let cursor = match from_cursor {
        Some(cursor) => cursor,
        None => store.next_cursor(kind).await?,
    };
    let backlog = store.changes_since(kind, cursor).await?.into();
    Ok(WatchSubscription {
        store,
        kind,
        cursor,
        rx,
        backlog,
    })
}

impl WatchSubscription {
    /// Cursor to resume from after the last returned event.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Next change, in cursor order. `None` when the store is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if event.cursor < self.cursor {
                    continue;
                }
                self.cursor = event.cursor + 1;
                return Some(event);
            }

            match self.rx.recv().await {
                Ok(event) => {
                    if event.cursor < self.cursor {
                        // Already delivered through the backlog.
                        continue;
                    }
                    if event.cursor > self.cursor {
                        // Gap; refill from the log, which also contains
                        // this event.
                        if !self.resync().await {
                            return None;
                        }
                        continue;
                    }
                    self.cursor = event.cursor + 1;
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(kind = %self.kind, missed, "watch lagged; re-syncing from log");
                    if !self.resync().await {
                        return None;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn resync(&mut self) -> bool {
        match self.store.changes_since(self.kind, self.cursor).await {
            Ok(events) => {
                self.backlog = events.into();
                true
            }
            Err(err) => {
                error!(kind = %self.kind, %err, "watch re-sync failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryResourceStore;
    use keel_types::{ChangeKind, ConfigMapSpec, ResourceSpec};
    use std::collections::BTreeMap;

    fn config(value: &str) -> ResourceSpec {
        ResourceSpec::ConfigMap(ConfigMapSpec {
            data: BTreeMap::from([("key".to_string(), value.to_string())]),
        })
    }

    #[tokio::test]
    async fn test_replays_changes_before_subscription() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        store.put("a", config("1")).await.unwrap();
        store.put("b", config("1")).await.unwrap();

        let mut sub = watch(store.clone(), ResourceKind::ConfigMap, Some(1))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().key.name, "a");
        assert_eq!(sub.next().await.unwrap().key.name, "b");

        // Live tail continues after the replay.
        store.put("c", config("1")).await.unwrap();
        let event = sub.next().await.unwrap();
        assert_eq!(event.key.name, "c");
        assert_eq!(event.change, ChangeKind::Created);
    }

    #[tokio::test]
    async fn test_resume_from_cursor_without_loss() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        store.put("a", config("1")).await.unwrap();
        store.put("b", config("1")).await.unwrap();
        store.put("c", config("1")).await.unwrap();

        let mut sub = watch(store.clone(), ResourceKind::ConfigMap, Some(1))
            .await
            .unwrap();
        sub.next().await.unwrap();
        sub.next().await.unwrap();
        let resume_at = sub.cursor();
        drop(sub);

        // A new subscription picks up exactly where the old one stopped.
        let mut resumed = watch(store.clone(), ResourceKind::ConfigMap, Some(resume_at))
            .await
            .unwrap();
        assert_eq!(resumed.next().await.unwrap().key.name, "c");

        store.put("d", config("1")).await.unwrap();
        assert_eq!(resumed.next().await.unwrap().key.name, "d");
    }

    #[tokio::test]
    async fn test_head_subscription_skips_history() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        store.put("a", config("1")).await.unwrap();

        let mut sub = watch(store.clone(), ResourceKind::ConfigMap, None)
            .await
            .unwrap();
        store.put("b", config("1")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().key.name, "b");
    }
}
