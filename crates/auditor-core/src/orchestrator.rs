//! Scan orchestrator
//!
//! Runs the requested tasks for one target, one after another, through the
//! [`ServiceExecutor`]. Only structural problems (missing target, no tasks,
//! unknown task) are errors; everything a task does wrong ends up in its
//! service entry.

use crate::config::AuditConfig;
use crate::error::OrchestratorError;
use crate::events::{EventEmitter, ScanEvent};
use crate::executor::{ExecutionResult, ServiceExecutor};
use crate::report::{ScanReport, ScanResponse};
use crate::task::TaskRegistry;
use crate::types::{Progress, Scan, ScanId, ScanStatus, ServiceRecord};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// Runs every task of a scan and aggregates the outcome
#[derive(Debug)]
pub struct ScanOrchestrator {
    executor: Arc<ServiceExecutor>,
    registry: TaskRegistry,
    events: EventEmitter,
    max_retry_attempts: u32,
}

impl ScanOrchestrator {
    /// Create new orchestrator
    #[must_use]
    pub fn new(executor: Arc<ServiceExecutor>, registry: TaskRegistry) -> Self {
        Self {
            executor,
            registry,
            events: EventEmitter::new(),
            max_retry_attempts: AuditConfig::default().max_retry_attempts,
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(config: &AuditConfig, registry: TaskRegistry) -> Self {
        Self::new(Arc::new(ServiceExecutor::from_config(config)), registry)
            .with_max_retries(config.max_retry_attempts)
    }

    /// With event emitter
    #[must_use]
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// With retry budget reported on fresh service entries
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retry_attempts = max;
        self
    }

    /// Registered tasks
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Event emitter in use
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Executor in use
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &ServiceExecutor {
        &self.executor
    }

    /// Check the request before any task runs
    ///
    /// Returns the task list with repeated names collapsed, first occurrence
    /// kept.
    ///
    /// # Errors
    /// `MissingTarget`, `EmptyTaskList` or `UnknownTask` for the first
    /// unregistered name.
    pub fn validate(&self, target: &str, tasks: &[String]) -> Result<Vec<String>, OrchestratorError> {
        if target.trim().is_empty() {
            return Err(OrchestratorError::MissingTarget);
        }
        if tasks.is_empty() {
            return Err(OrchestratorError::EmptyTaskList);
        }
        let mut unique: Vec<String> = Vec::with_capacity(tasks.len());
        for name in tasks {
            if !self.registry.contains(name) {
                return Err(OrchestratorError::UnknownTask(name.clone()));
            }
            if !unique.contains(name) {
                unique.push(name.clone());
            }
        }
        Ok(unique)
    }

    /// Run every task in `tasks` against `target` and build the response
    ///
    /// # Errors
    /// Structural errors only; see [`ScanOrchestrator::validate`].
    pub async fn run_full_scan(
        &self,
        target: &str,
        tasks: &[String],
        scan_id: Option<ScanId>,
    ) -> Result<ScanResponse, OrchestratorError> {
        let tasks = self.validate(target, tasks)?;
        let scan_id = scan_id.unwrap_or_default();
        let started = Instant::now();
        let total = u32::try_from(tasks.len()).unwrap_or(u32::MAX);
        let mut scan = Scan::new(scan_id, target, total);

        tracing::info!(%scan_id, target, tasks = tasks.len(), "running full scan");
        self.events.emit(ScanEvent::ScanStarted {
            scan_id,
            target: target.to_string(),
            tasks: tasks.len(),
        });

        let mut results = Vec::with_capacity(tasks.len());
        for name in &tasks {
            results.push(self.run_task(scan_id, name, target).await?);
        }

        scan.status = Self::classify(&results);
        scan.progress = Progress::new(total, total);
        scan.completed_at = Some(Utc::now());

        let records: Vec<ServiceRecord> = results
            .iter()
            .map(|r| {
                let mut record = ServiceRecord::new(scan_id, r.task_name.clone(), self.max_retry_attempts);
                record.status = r.status();
                record.apply_result(r.to_service_result());
                record
            })
            .collect();

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(%scan_id, status = %scan.status, duration_ms, "full scan finished");
        self.events.emit(ScanEvent::ScanCompleted {
            scan_id,
            status: scan.status,
            duration_ms,
        });

        Ok(ScanReport::new(&scan, &records).into_response())
    }

    /// Run one registered task, emitting its start and outcome events
    ///
    /// # Errors
    /// `UnknownTask` if `task_name` is not registered.
    pub async fn run_task(
        &self,
        scan_id: ScanId,
        task_name: &str,
        target: &str,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let task = self
            .registry
            .get(task_name)
            .ok_or_else(|| OrchestratorError::UnknownTask(task_name.to_string()))?;

        self.events.emit(ScanEvent::TaskStarted {
            scan_id,
            task_name: task_name.to_string(),
        });
        let result = self.executor.run_task(task, target).await;
        self.events.emit(match result.error() {
            None => ScanEvent::TaskCompleted {
                scan_id,
                task_name: task_name.to_string(),
                execution_time_ms: result.execution_time_ms,
            },
            Some(error) => ScanEvent::TaskFailed {
                scan_id,
                task_name: task_name.to_string(),
                kind: error.kind,
                execution_time_ms: result.execution_time_ms,
            },
        });
        Ok(result)
    }

    /// Aggregate status over a set of results: all succeeded → completed,
    /// none → failed, otherwise partial
    #[must_use]
    pub fn classify(results: &[ExecutionResult]) -> ScanStatus {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        ScanStatus::derive(succeeded, results.len() - succeeded, results.len())
            .unwrap_or(ScanStatus::Failed)
    }
}
