//! Scan service
//!
//! Wires the lifecycle, orchestrator and retry coordinator together so that a
//! scan's progress is persisted task by task: each service is marked running,
//! executed, then has its outcome recorded before the next one starts.

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::events::{EventEmitter, ScanEvent};
use crate::lifecycle::ScanLifecycle;
use crate::orchestrator::ScanOrchestrator;
use crate::report::ScanReport;
use crate::retry::RetryCoordinator;
use crate::store::ScanStore;
use crate::task::TaskRegistry;
use crate::types::{Scan, ScanId, ServiceStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Persisted scan runner
#[derive(Debug)]
pub struct ScanService {
    lifecycle: Arc<ScanLifecycle>,
    orchestrator: ScanOrchestrator,
    retry: RetryCoordinator,
    events: EventEmitter,
    history_limit: usize,
}

impl ScanService {
    /// Create new service over `store` with the tasks in `registry`
    #[must_use]
    pub fn new(
        config: &AuditConfig,
        store: Arc<dyn ScanStore>,
        registry: TaskRegistry,
        events: EventEmitter,
    ) -> Self {
        let lifecycle = Arc::new(ScanLifecycle::from_config(store, config));
        Self {
            orchestrator: ScanOrchestrator::from_config(config, registry).with_events(events.clone()),
            retry: RetryCoordinator::new(Arc::clone(&lifecycle)).with_events(events.clone()),
            lifecycle,
            events,
            history_limit: config.history_limit,
        }
    }

    /// Lifecycle in use
    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<ScanLifecycle> {
        &self.lifecycle
    }

    /// Orchestrator in use
    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &ScanOrchestrator {
        &self.orchestrator
    }

    /// Create, start and run a scan to completion
    ///
    /// # Errors
    /// Structural request errors before anything is created; lifecycle or
    /// store errors afterwards.
    pub async fn start_scan(&self, target: &str, tasks: &[String]) -> Result<ScanReport, AuditError> {
        let tasks = self.orchestrator.validate(target, tasks)?;
        let scan = self.lifecycle.initialize(target, &tasks, None).await?;
        let scan = self.lifecycle.start(scan.id).await?;

        self.events.emit(ScanEvent::ScanStarted {
            scan_id: scan.id,
            target: scan.target.clone(),
            tasks: tasks.len(),
        });
        self.run_services(&scan, &tasks).await
    }

    /// Reset retry-eligible services and run exactly those again
    ///
    /// `None` or an empty list retries every eligible service.
    ///
    /// # Errors
    /// Retry validation errors, with nothing written; lifecycle or store
    /// errors while rerunning.
    pub async fn retry_scan(
        &self,
        scan_id: ScanId,
        tasks: Option<&[String]>,
    ) -> Result<ScanReport, AuditError> {
        let plan = self.retry.retry(scan_id, tasks).await?;
        self.run_services(&plan.scan, &plan.services).await
    }

    /// Current snapshot of a scan
    ///
    /// # Errors
    /// `ScanNotFound` or store failures.
    pub async fn status(&self, scan_id: ScanId) -> Result<ScanReport, AuditError> {
        Ok(self.lifecycle.get_status(scan_id).await?)
    }

    /// Retry-eligible services of a scan
    ///
    /// # Errors
    /// `ScanNotFound` or store failures.
    pub async fn retryable(&self, scan_id: ScanId) -> Result<Vec<String>, AuditError> {
        Ok(self.retry.retryable(scan_id).await?)
    }

    /// Most recent scans, up to `limit` or the configured page size
    ///
    /// # Errors
    /// Store failures.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<Scan>, AuditError> {
        Ok(self
            .lifecycle
            .history(limit.unwrap_or(self.history_limit))
            .await?)
    }

    /// Drop scans older than `max_age`
    ///
    /// # Errors
    /// Store failures.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, AuditError> {
        Ok(self.lifecycle.cleanup_old_scans(max_age).await?)
    }

    async fn run_services(&self, scan: &Scan, tasks: &[String]) -> Result<ScanReport, AuditError> {
        let started = Instant::now();
        for name in tasks {
            self.lifecycle
                .update_service_status(scan.id, name, ServiceStatus::Running, None)
                .await?;
            let result = self.orchestrator.run_task(scan.id, name, &scan.target).await?;
            self.lifecycle
                .update_service_status(scan.id, name, result.status(), Some(result.to_service_result()))
                .await?;
        }

        let report = self.lifecycle.get_status(scan.id).await?;
        self.events.emit(ScanEvent::ScanCompleted {
            scan_id: scan.id,
            status: report.status,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        Ok(report)
    }
}
