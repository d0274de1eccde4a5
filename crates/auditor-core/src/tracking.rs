//! Bulk position tracking
//!
//! Periodically re-fetches the position of every tracked (query, resource)
//! pair through the [`WorkerPool`], appends the observation to history and
//! raises an [`Alert`] when the position moved by at least the configured
//! threshold.

use crate::config::AuditConfig;
use crate::error::StoreError;
use crate::pool::{BulkOutcome, WorkerPool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A (query, resource) pair whose position is tracked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    /// Caller-chosen identifier
    pub id: String,
    /// Search query to rank for
    pub query: String,
    /// Resource (URL or domain) being ranked
    pub resource: String,
    /// Position at the last successful check; `None` when unranked or never
    /// checked
    pub last_position: Option<u32>,
}

impl TrackedItem {
    #[must_use]
    pub fn new(id: impl Into<String>, query: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            resource: resource.into(),
            last_position: None,
        }
    }
}

/// One observation, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Tracked item this observation belongs to
    pub item_id: String,
    /// Observed position; `None` when unranked
    pub position: Option<u32>,
    /// Observation time
    pub fetched_at: DateTime<Utc>,
}

/// Significant position move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Store-assigned id, 0 until stored
    pub id: u64,
    /// Item that moved
    pub item_id: String,
    /// Position before the move
    pub old_position: u32,
    /// Position after the move
    pub new_position: u32,
    /// `old - new`; positive means the resource moved up
    pub delta: i64,
    pub seen: bool,
    /// Time the move was observed
    pub created_at: DateTime<Utc>,
}

/// Alert for a move of at least `threshold` places
///
/// Both positions must be known.
#[must_use]
pub fn evaluate_alert(
    item_id: &str,
    old_position: Option<u32>,
    new_position: Option<u32>,
    threshold: u32,
) -> Option<Alert> {
    let (old, new) = (old_position?, new_position?);
    let delta = i64::from(old) - i64::from(new);
    if delta.unsigned_abs() < u64::from(threshold) {
        return None;
    }
    Some(Alert {
        id: 0,
        item_id: item_id.to_string(),
        old_position: old,
        new_position: new,
        delta,
        seen: false,
        created_at: Utc::now(),
    })
}

/// Looks up the current position of `resource` for `query`
#[async_trait]
pub trait PositionFetcher: Send + Sync {
    /// `Ok(None)` when the resource is not ranked
    async fn fetch(&self, query: &str, resource: &str) -> anyhow::Result<Option<u32>>;
}

/// Tracking state port
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn add_item(&self, item: TrackedItem) -> Result<(), StoreError>;
    async fn items(&self) -> Result<Vec<TrackedItem>, StoreError>;
    async fn set_last_position(&self, item_id: &str, position: Option<u32>) -> Result<(), StoreError>;
    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError>;
    async fn history(&self, item_id: &str) -> Result<Vec<HistoryEntry>, StoreError>;
    /// Store an alert, returning it with its assigned id
    async fn insert_alert(&self, alert: Alert) -> Result<Alert, StoreError>;
    async fn unseen_alerts(&self) -> Result<Vec<Alert>, StoreError>;
    /// Returns `false` if the alert was already seen
    async fn mark_alert_seen(&self, alert_id: u64) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct TrackingState {
    items: IndexMap<String, TrackedItem>,
    history: Vec<HistoryEntry>,
    alerts: Vec<Alert>,
    next_alert_id: u64,
}

/// In-process tracking store
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    state: RwLock<TrackingState>,
}

impl MemoryTrackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn add_item(&self, item: TrackedItem) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("tracked item {}", item.id)));
        }
        state.items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn items(&self) -> Result<Vec<TrackedItem>, StoreError> {
        Ok(self.state.read().items.values().cloned().collect())
    }

    async fn set_last_position(&self, item_id: &str, position: Option<u32>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| StoreError::NotFound(format!("tracked item {item_id}")))?;
        item.last_position = position;
        Ok(())
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.state.write().history.push(entry);
        Ok(())
    }

    async fn history(&self, item_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .history
            .iter()
            .filter(|e| e.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn insert_alert(&self, mut alert: Alert) -> Result<Alert, StoreError> {
        let mut state = self.state.write();
        state.next_alert_id += 1;
        alert.id = state.next_alert_id;
        state.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn unseen_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .state
            .read()
            .alerts
            .iter()
            .filter(|a| !a.seen)
            .cloned()
            .collect())
    }

    async fn mark_alert_seen(&self, alert_id: u64) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {alert_id}")))?;
        Ok(!std::mem::replace(&mut alert.seen, true))
    }
}

/// Summary of one tracking pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingRun {
    /// Items whose position was fetched
    pub checked: usize,
    /// Items whose fetch or bookkeeping failed
    pub failed: Vec<(String, String)>,
    /// Alerts raised during this pass
    pub alerts: Vec<Alert>,
}

/// Re-checks every tracked item through the worker pool
pub struct PositionTracker {
    fetcher: Arc<dyn PositionFetcher>,
    store: Arc<dyn TrackingStore>,
    pool: WorkerPool,
    threshold: u32,
}

impl PositionTracker {
    /// Alerts fire for moves of at least `threshold` places
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PositionFetcher>,
        store: Arc<dyn TrackingStore>,
        pool: WorkerPool,
        threshold: u32,
    ) -> Self {
        Self {
            fetcher,
            store,
            pool,
            threshold,
        }
    }

    /// Pool and threshold taken from `config`
    #[must_use]
    pub fn from_config(
        config: &AuditConfig,
        fetcher: Arc<dyn PositionFetcher>,
        store: Arc<dyn TrackingStore>,
    ) -> Self {
        Self::new(fetcher, store, WorkerPool::new(config.pool), config.alert_threshold)
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// Check every tracked item once
    ///
    /// Per-item failures are collected in [`TrackingRun::failed`]; the item
    /// keeps its previous position.
    ///
    /// # Errors
    /// Store failure while listing items.
    pub async fn run(&self, concurrency: usize) -> Result<TrackingRun, StoreError> {
        let items = self.store.items().await?;
        tracing::info!(items = items.len(), concurrency, "tracking pass started");

        let outcomes = self
            .pool
            .run_bulk(items, |item| self.check(item), concurrency)
            .await;

        let mut run = TrackingRun::default();
        for outcome in outcomes {
            match outcome {
                BulkOutcome::Done { value, .. } => {
                    run.checked += 1;
                    run.alerts.extend(value);
                }
                BulkOutcome::Failed { item, error } => run.failed.push((item.id, error)),
            }
        }
        tracing::info!(
            checked = run.checked,
            failed = run.failed.len(),
            alerts = run.alerts.len(),
            "tracking pass finished"
        );
        Ok(run)
    }

    async fn check(&self, item: TrackedItem) -> anyhow::Result<Option<Alert>> {
        let position = self.fetcher.fetch(&item.query, &item.resource).await?;
        self.store
            .append_history(HistoryEntry {
                item_id: item.id.clone(),
                position,
                fetched_at: Utc::now(),
            })
            .await?;

        let alert = match evaluate_alert(&item.id, item.last_position, position, self.threshold) {
            Some(alert) => {
                let alert = self.store.insert_alert(alert).await?;
                tracing::info!(item = %item.id, old = alert.old_position, new = alert.new_position, delta = alert.delta, "position alert");
                Some(alert)
            }
            None => None,
        };
        self.store.set_last_position(&item.id, position).await?;
        Ok(alert)
    }
}

impl std::fmt::Debug for PositionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionTracker")
            .field("pool", &self.pool)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::collections::HashMap;

    #[test]
    fn alert_on_large_move() {
        let alert = evaluate_alert("kw-1", Some(20), Some(10), 5).unwrap();
        assert_eq!(alert.delta, 10);
        assert!(!alert.seen);

        let drop = evaluate_alert("kw-1", Some(3), Some(9), 5).unwrap();
        assert_eq!(drop.delta, -6);
    }

    #[test]
    fn no_alert_on_small_move_or_unknown_position() {
        assert!(evaluate_alert("kw-1", Some(20), Some(18), 5).is_none());
        assert!(evaluate_alert("kw-1", None, Some(1), 5).is_none());
        assert!(evaluate_alert("kw-1", Some(1), None, 5).is_none());
        assert!(evaluate_alert("kw-1", Some(10), Some(5), 5).is_some());
    }

    struct Table(HashMap<String, Option<u32>>);

    #[async_trait]
    impl PositionFetcher for Table {
        async fn fetch(&self, query: &str, _resource: &str) -> anyhow::Result<Option<u32>> {
            self.0
                .get(query)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no results for {query}"))
        }
    }

    #[tokio::test]
    async fn tracking_pass_updates_positions_and_raises_alerts() {
        let store = Arc::new(MemoryTrackingStore::new());
        let mut moved = TrackedItem::new("a", "rust orm", "example.com");
        moved.last_position = Some(20);
        let mut steady = TrackedItem::new("b", "rust web", "example.com");
        steady.last_position = Some(4);
        store.add_item(moved).await.unwrap();
        store.add_item(steady).await.unwrap();
        store
            .add_item(TrackedItem::new("c", "missing", "example.com"))
            .await
            .unwrap();

        let fetcher = Arc::new(Table(HashMap::from([
            ("rust orm".to_string(), Some(10)),
            ("rust web".to_string(), Some(5)),
        ])));
        let tracker = PositionTracker::new(
            fetcher,
            store.clone(),
            WorkerPool::new(PoolConfig::unthrottled(3)),
            5,
        );

        let run = tracker.run(3).await.unwrap();
        assert_eq!(run.checked, 2);
        assert_eq!(run.failed.len(), 1);
        assert_eq!(run.failed[0].0, "c");
        assert_eq!(run.alerts.len(), 1);
        assert_eq!(run.alerts[0].item_id, "a");

        let items = store.items().await.unwrap();
        assert_eq!(items[0].last_position, Some(10));
        assert_eq!(items[1].last_position, Some(5));
        assert_eq!(items[2].last_position, None);
        assert_eq!(store.history("a").await.unwrap().len(), 1);
        assert!(store.history("c").await.unwrap().is_empty());
    }

    struct Explodes;

    #[async_trait]
    impl PositionFetcher for Explodes {
        async fn fetch(&self, query: &str, _resource: &str) -> anyhow::Result<Option<u32>> {
            if query == "bad" {
                panic!("scraper crashed on {query}");
            }
            Ok(Some(7))
        }
    }

    #[tokio::test]
    async fn panicking_fetch_fails_only_its_item() {
        let store = Arc::new(MemoryTrackingStore::new());
        for (id, query) in [("a", "good"), ("b", "bad"), ("c", "good")] {
            store
                .add_item(TrackedItem::new(id, query, "example.com"))
                .await
                .unwrap();
        }
        let tracker = PositionTracker::new(
            Arc::new(Explodes),
            store.clone(),
            WorkerPool::new(PoolConfig::unthrottled(2)),
            5,
        );

        let run = tracker.run(2).await.unwrap();
        assert_eq!(run.checked, 2);
        assert_eq!(run.failed.len(), 1);
        assert_eq!(run.failed[0].0, "b");
        assert!(run.failed[0].1.contains("scraper crashed on bad"));
        assert!(store.history("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn alerts_can_be_marked_seen() {
        let store = MemoryTrackingStore::new();
        let stored = store
            .insert_alert(evaluate_alert("a", Some(30), Some(2), 5).unwrap())
            .await
            .unwrap();
        assert_eq!(store.unseen_alerts().await.unwrap().len(), 1);

        assert!(store.mark_alert_seen(stored.id).await.unwrap());
        assert!(!store.mark_alert_seen(stored.id).await.unwrap());
        assert!(store.unseen_alerts().await.unwrap().is_empty());
        assert!(store.mark_alert_seen(999).await.is_err());
    }
}
