//! Testing utilities for the auditor workspace
//!
//! Scripted task fixtures, a recording event sink, a store that fails on
//! demand and setup helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use auditor_core::{
    AnalysisOutput, AnalysisTask, AuditConfig, EventEmitter, EventSink, MemoryScanStore, Progress,
    Scan, ScanEvent, ScanId, ScanLifecycle, ScanService, ScanStatus, ScanStore, ScanUpdate,
    ServiceRecord, ServiceResult, ServiceStatus, ServiceUpdate, StoreError, TaskRegistry,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always succeeds with `{ "task": name }` and an optional score
#[derive(Debug, Clone)]
pub struct StaticTask {
    name: String,
    score: Option<f64>,
}

impl StaticTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

#[async_trait]
impl AnalysisTask for StaticTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, target: &str) -> anyhow::Result<AnalysisOutput> {
        let output = AnalysisOutput::new(json!({ "task": self.name, "target": target }));
        Ok(match self.score {
            Some(score) => output.with_score(score),
            None => output,
        })
    }
}

/// Always fails with `message`
#[derive(Debug, Clone)]
pub struct FailingTask {
    name: String,
    message: String,
}

impl FailingTask {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl AnalysisTask for FailingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _target: &str) -> anyhow::Result<AnalysisOutput> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// Fails with a connection-refused I/O error
#[derive(Debug, Clone)]
pub struct NetworkFailTask {
    name: String,
}

impl NetworkFailTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AnalysisTask for NetworkFailTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, target: &str) -> anyhow::Result<AnalysisOutput> {
        Err(anyhow::Error::new(io::Error::from(io::ErrorKind::ConnectionRefused))
            .context(format!("fetching {target}")))
    }
}

/// Never resolves
#[derive(Debug, Clone)]
pub struct HangingTask {
    name: String,
}

impl HangingTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AnalysisTask for HangingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _target: &str) -> anyhow::Result<AnalysisOutput> {
        std::future::pending().await
    }
}

/// Fails the first `failures` calls, then succeeds
#[derive(Debug)]
pub struct FlakyTask {
    name: String,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyTask {
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisTask for FlakyTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _target: &str) -> anyhow::Result<AnalysisOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("{} attempt {} failed", self.name, call + 1);
        }
        Ok(AnalysisOutput::new(json!({ "task": self.name, "attempt": call + 1 })))
    }
}

/// Keeps every event it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ScanEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ScanEvent::name).collect()
    }

    /// Wait until at least `count` events arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<ScanEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.events.lock().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn record(&self, event: &ScanEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Memory store whose writes fail on demand
///
/// `fail_writes` fails every write; `fail_on` fails only the named store
/// operation, e.g. `"reset_for_retry"`.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryScanStore,
    fail_writes: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    /// Clear every injected failure
    pub fn heal(&self) {
        self.fail_writes(false);
        self.failing.lock().clear();
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) || self.failing.lock().contains(operation) {
            Err(StoreError::Backend(format!("injected failure in {operation}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ScanStore for FlakyStore {
    async fn create_scan(&self, scan: Scan, services: Vec<ServiceRecord>) -> Result<Scan, StoreError> {
        self.check("create_scan")?;
        self.inner.create_scan(scan, services).await
    }

    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>, StoreError> {
        self.inner.get_scan(id).await
    }

    async fn update_scan_status(
        &self,
        id: ScanId,
        status: ScanStatus,
        progress: Progress,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Scan, StoreError> {
        self.check("update_scan_status")?;
        self.inner
            .update_scan_status(id, status, progress, completed_at)
            .await
    }

    async fn update_service_status(
        &self,
        id: ScanId,
        task_name: &str,
        status: ServiceStatus,
    ) -> Result<(), StoreError> {
        self.check("update_service_status")?;
        self.inner.update_service_status(id, task_name, status).await
    }

    async fn update_service_result(
        &self,
        id: ScanId,
        task_name: &str,
        result: ServiceResult,
    ) -> Result<(), StoreError> {
        self.check("update_service_result")?;
        self.inner.update_service_result(id, task_name, result).await
    }

    async fn get_scan_services(&self, id: ScanId) -> Result<Vec<ServiceRecord>, StoreError> {
        self.inner.get_scan_services(id).await
    }

    async fn get_retryable_services(&self, id: ScanId) -> Result<Vec<ServiceRecord>, StoreError> {
        self.inner.get_retryable_services(id).await
    }

    async fn increment_retry_attempt(&self, id: ScanId, task_name: &str) -> Result<(), StoreError> {
        self.check("increment_retry_attempt")?;
        self.inner.increment_retry_attempt(id, task_name).await
    }

    async fn record_service_update(&self, id: ScanId, update: ServiceUpdate) -> Result<Scan, StoreError> {
        self.check("record_service_update")?;
        self.inner.record_service_update(id, update).await
    }

    async fn reset_for_retry(
        &self,
        id: ScanId,
        task_names: &[String],
        scan: ScanUpdate,
    ) -> Result<(Scan, Vec<ServiceRecord>), StoreError> {
        self.check("reset_for_retry")?;
        self.inner.reset_for_retry(id, task_names, scan).await
    }

    async fn get_scan_history(&self, limit: usize) -> Result<Vec<Scan>, StoreError> {
        self.inner.get_scan_history(limit).await
    }

    async fn cleanup_old_scans(&self, max_age: Duration) -> Result<Vec<ScanId>, StoreError> {
        self.check("cleanup_old_scans")?;
        self.inner.cleanup_old_scans(max_age).await
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Lifecycle over a fresh memory store
pub fn setup_lifecycle(max_retry_attempts: u32) -> ScanLifecycle {
    ScanLifecycle::new(Arc::new(MemoryScanStore::new()), max_retry_attempts)
}

/// Initialized and started scan over `tasks`
pub async fn running_scan(lifecycle: &ScanLifecycle, tasks: &[&str]) -> ScanId {
    let scan = lifecycle
        .initialize("https://example.com", &names(tasks), None)
        .await
        .unwrap();
    lifecycle.start(scan.id).await.unwrap();
    scan.id
}

/// Registry with one succeeding and one failing task
pub fn mixed_registry() -> TaskRegistry {
    TaskRegistry::new()
        .with(Arc::new(StaticTask::new("serp").with_score(80.0)))
        .with(Arc::new(FailingTask::new("a11y", "axe crashed")))
}

/// Scan service with a recording sink attached
pub fn setup_service(config: &AuditConfig, registry: TaskRegistry) -> (ScanService, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let service = ScanService::new(
        config,
        Arc::new(MemoryScanStore::new()),
        registry,
        EventEmitter::new().with_sink(sink.clone()),
    );
    (service, sink)
}
