//! Seeded bulk-tracking run
//!
//! Tracks synthetic (query, resource) pairs against a fetcher that draws
//! positions from a seeded RNG. The first pass sets the baseline; later
//! passes raise alerts for large moves.

use async_trait::async_trait;
use auditor_core::{
    Alert, AuditConfig, MemoryTrackingStore, PoolConfig, PositionFetcher, PositionTracker,
    TrackedItem, TrackingRun, TrackingStore, WorkerPool,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

/// Tracking run configuration
#[derive(Debug, Clone, Serialize)]
pub struct TrackConfig {
    pub seed: u64,
    pub items: usize,
    pub passes: u32,
    pub concurrency: usize,
    /// Overrides the configured pool pauses when set
    pub pool: Option<PoolConfig>,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            items: 10,
            passes: 2,
            concurrency: 3,
            pool: Some(PoolConfig::unthrottled(5)),
        }
    }
}

/// Positions 1..=50, or unranked one time in ten
#[derive(Debug)]
struct SyntheticFetcher {
    rng: Mutex<StdRng>,
}

#[async_trait]
impl PositionFetcher for SyntheticFetcher {
    async fn fetch(&self, query: &str, _resource: &str) -> anyhow::Result<Option<u32>> {
        let mut rng = self.rng.lock();
        if rng.gen_bool(0.05) {
            anyhow::bail!("rate limited while fetching '{query}'");
        }
        Ok(if rng.gen_bool(0.1) {
            None
        } else {
            Some(rng.gen_range(1..=50))
        })
    }
}

/// Summary of all passes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackReport {
    pub passes: Vec<PassSummary>,
    pub unseen_alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub checked: usize,
    pub failed: usize,
    pub alerts: usize,
}

impl From<&TrackingRun> for PassSummary {
    fn from(run: &TrackingRun) -> Self {
        Self {
            checked: run.checked,
            failed: run.failed.len(),
            alerts: run.alerts.len(),
        }
    }
}

impl TrackReport {
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::from("=== Position Tracking Report ===\n\n");
        for (i, pass) in self.passes.iter().enumerate() {
            report.push_str(&format!(
                "Pass {}: checked={} failed={} alerts={}\n",
                i + 1,
                pass.checked,
                pass.failed,
                pass.alerts
            ));
        }
        report.push_str(&format!("\n=== Unseen Alerts ({}) ===\n", self.unseen_alerts.len()));
        for alert in &self.unseen_alerts {
            let direction = if alert.delta > 0 { "up" } else { "down" };
            report.push_str(&format!(
                "#{} {}: {} -> {} ({direction} {})\n",
                alert.id,
                alert.item_id,
                alert.old_position,
                alert.new_position,
                alert.delta.unsigned_abs()
            ));
        }
        report
    }
}

/// Run `config.passes` tracking passes over synthetic items
///
/// # Errors
/// Tracking store failures.
pub async fn run_tracking(config: &TrackConfig, audit: &AuditConfig) -> anyhow::Result<TrackReport> {
    let store = Arc::new(MemoryTrackingStore::new());
    for i in 0..config.items {
        store
            .add_item(TrackedItem::new(
                format!("item-{i:03}"),
                format!("keyword {i}"),
                "https://example.com",
            ))
            .await?;
    }

    let fetcher = Arc::new(SyntheticFetcher {
        rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
    });
    let pool = WorkerPool::new(config.pool.unwrap_or(audit.pool));
    let tracker = PositionTracker::new(fetcher, store.clone(), pool, audit.alert_threshold);

    let mut passes = Vec::with_capacity(config.passes as usize);
    for _ in 0..config.passes {
        let run = tracker.run(config.concurrency).await?;
        passes.push(PassSummary::from(&run));
    }

    Ok(TrackReport {
        passes,
        unseen_alerts: store.unseen_alerts().await?,
    })
}
