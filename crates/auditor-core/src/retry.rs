//! Retry coordinator
//!
//! Picks retry-eligible services, resets them through the lifecycle and
//! announces each reset. Rerunning the reset services is the caller's job
//! (see `ScanService::retry_scan`).

use crate::error::LifecycleError;
use crate::events::{EventEmitter, ScanEvent};
use crate::lifecycle::{RetryPlan, ScanLifecycle};
use crate::types::ScanId;
use std::sync::Arc;

/// Resets failed services for another attempt
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    lifecycle: Arc<ScanLifecycle>,
    events: EventEmitter,
}

impl RetryCoordinator {
    /// Create new coordinator
    #[must_use]
    pub fn new(lifecycle: Arc<ScanLifecycle>) -> Self {
        Self {
            lifecycle,
            events: EventEmitter::new(),
        }
    }

    /// With event emitter
    #[must_use]
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Names of services that may be retried right now
    ///
    /// # Errors
    /// `ScanNotFound` or store failures.
    pub async fn retryable(&self, scan_id: ScanId) -> Result<Vec<String>, LifecycleError> {
        let report = self.lifecycle.get_status(scan_id).await?;
        Ok(report.retryable().into_iter().map(str::to_string).collect())
    }

    /// Reset `task_names` (or every eligible service) and move the scan back
    /// to running
    ///
    /// # Errors
    /// As [`ScanLifecycle::prepare_for_retry`]; nothing is written on error.
    pub async fn retry(
        &self,
        scan_id: ScanId,
        task_names: Option<&[String]>,
    ) -> Result<RetryPlan, LifecycleError> {
        let plan = self.lifecycle.prepare_for_retry(scan_id, task_names).await?;
        for record in &plan.records {
            self.events.emit(ScanEvent::TaskRetried {
                scan_id,
                task_name: record.task_name.clone(),
                attempt: record.retry_attempts,
            });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryScanStore;
    use crate::types::{ScanStatus, ServiceStatus};

    async fn settled(lc: &ScanLifecycle, outcomes: &[(&str, ServiceStatus)]) -> ScanId {
        let tasks: Vec<String> = outcomes.iter().map(|(n, _)| (*n).to_string()).collect();
        let scan = lc.initialize("https://example.com", &tasks, None).await.unwrap();
        lc.start(scan.id).await.unwrap();
        for (name, status) in outcomes {
            lc.update_service_status(scan.id, name, *status, None)
                .await
                .unwrap();
        }
        scan.id
    }

    #[tokio::test]
    async fn budget_limits_eligibility() {
        let lc = Arc::new(ScanLifecycle::new(Arc::new(MemoryScanStore::new()), 2));
        let coordinator = RetryCoordinator::new(Arc::clone(&lc));
        let id = settled(
            &lc,
            &[("serp", ServiceStatus::Failed), ("a11y", ServiceStatus::Failed)],
        )
        .await;

        // Spend serp's whole budget.
        for _ in 0..2 {
            let plan = coordinator
                .retry(id, Some(&["serp".to_string()]))
                .await
                .unwrap();
            assert_eq!(plan.services, vec!["serp"]);
            lc.update_service_status(id, "serp", ServiceStatus::Failed, None)
                .await
                .unwrap();
        }

        assert_eq!(coordinator.retryable(id).await.unwrap(), vec!["a11y"]);

        let before = lc.get_status(id).await.unwrap();
        let err = coordinator
            .retry(id, Some(&["serp".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidService { .. }));
        assert_eq!(lc.get_status(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn retried_event_carries_new_attempt() {
        use crate::events::EventSink;
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Collect(Mutex<Vec<ScanEvent>>);

        #[async_trait::async_trait]
        impl EventSink for Collect {
            async fn record(&self, event: &ScanEvent) -> anyhow::Result<()> {
                self.0.lock().push(event.clone());
                Ok(())
            }
        }

        let lc = Arc::new(ScanLifecycle::new(Arc::new(MemoryScanStore::new()), 3));
        let sink = Arc::new(Collect::default());
        let coordinator = RetryCoordinator::new(Arc::clone(&lc))
            .with_events(EventEmitter::new().with_sink(sink.clone()));
        let id = settled(&lc, &[("serp", ServiceStatus::Failed)]).await;

        coordinator.retry(id, None).await.unwrap();
        for _ in 0..50 {
            if !sink.0.lock().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let events = sink.0.lock().clone();
        assert_eq!(
            events,
            vec![ScanEvent::TaskRetried {
                scan_id: id,
                task_name: "serp".to_string(),
                attempt: 1,
            }]
        );
    }

    #[tokio::test]
    async fn retry_all_moves_scan_to_running() {
        let lc = Arc::new(ScanLifecycle::new(Arc::new(MemoryScanStore::new()), 3));
        let coordinator = RetryCoordinator::new(Arc::clone(&lc));
        let id = settled(
            &lc,
            &[("serp", ServiceStatus::Success), ("a11y", ServiceStatus::Failed)],
        )
        .await;
        assert_eq!(lc.get_status(id).await.unwrap().status, ScanStatus::Partial);

        let plan = coordinator.retry(id, Some(&[])).await.unwrap();
        assert_eq!(plan.services, vec!["a11y"]);
        assert_eq!(plan.scan.status, ScanStatus::Running);
        assert_eq!(plan.scan.progress.completed, 1);
    }
}
