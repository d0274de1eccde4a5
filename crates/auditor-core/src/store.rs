//! Scan persistence port
//!
//! The lifecycle computes every status and progress value itself; the store
//! only records what it is told. A service change and the scan progress it
//! implies are written by one call ([`ScanStore::record_service_update`],
//! [`ScanStore::reset_for_retry`]) and must land together or not at all.
//! [`MemoryScanStore`] keeps everything in process and is what the CLI and
//! tests run against.

use crate::error::StoreError;
use crate::types::{Progress, Scan, ScanId, ScanStatus, ServiceRecord, ServiceResult, ServiceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::time::Duration;

/// Scan-level fields written alongside a service change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanUpdate {
    pub status: ScanStatus,
    pub progress: Progress,
    /// Written as given; `None` clears it
    pub completed_at: Option<DateTime<Utc>>,
}

/// One service status change and the scan state that follows from it
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUpdate {
    /// Service to change; unknown names fail with nothing written
    pub task_name: String,
    pub status: ServiceStatus,
    /// Replaces the result fields when present
    pub result: Option<ServiceResult>,
    pub scan: ScanUpdate,
}

/// Scan storage interface
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Persist a new scan and its service records
    async fn create_scan(&self, scan: Scan, services: Vec<ServiceRecord>) -> Result<Scan, StoreError>;

    /// Fetch a scan
    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>, StoreError>;

    /// Write status, progress and completion time
    async fn update_scan_status(
        &self,
        id: ScanId,
        status: ScanStatus,
        progress: Progress,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Scan, StoreError>;

    /// Write a service status
    async fn update_service_status(
        &self,
        id: ScanId,
        task_name: &str,
        status: ServiceStatus,
    ) -> Result<(), StoreError>;

    /// Write a service's result fields
    async fn update_service_result(
        &self,
        id: ScanId,
        task_name: &str,
        result: ServiceResult,
    ) -> Result<(), StoreError>;

    /// All services of a scan, in registration order
    async fn get_scan_services(&self, id: ScanId) -> Result<Vec<ServiceRecord>, StoreError>;

    /// Failed services with retry budget left
    async fn get_retryable_services(&self, id: ScanId) -> Result<Vec<ServiceRecord>, StoreError>;

    /// Consume one retry
    async fn increment_retry_attempt(&self, id: ScanId, task_name: &str) -> Result<(), StoreError>;

    /// Apply a service change and the scan update together
    ///
    /// On error nothing is written.
    async fn record_service_update(&self, id: ScanId, update: ServiceUpdate) -> Result<Scan, StoreError>;

    /// Consume one retry of each named service, reset it to pending with
    /// cleared results and apply the scan update, all together
    ///
    /// Returns the scan and the reset records. On error nothing is written.
    async fn reset_for_retry(
        &self,
        id: ScanId,
        task_names: &[String],
        scan: ScanUpdate,
    ) -> Result<(Scan, Vec<ServiceRecord>), StoreError>;

    /// Most recent scans first
    async fn get_scan_history(&self, limit: usize) -> Result<Vec<Scan>, StoreError>;

    /// Delete scans started more than `max_age` ago; returns their ids
    async fn cleanup_old_scans(&self, max_age: Duration) -> Result<Vec<ScanId>, StoreError>;
}

#[derive(Debug, Clone)]
struct ScanEntry {
    scan: Scan,
    services: IndexMap<String, ServiceRecord>,
}

/// In-process scan store
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    scans: DashMap<ScanId, ScanEntry>,
}

impl MemoryScanStore {
    /// Create new empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored scans
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.scans.len()
    }

    /// Check if store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    fn with_service<R>(
        &self,
        id: ScanId,
        task_name: &str,
        f: impl FnOnce(&mut ServiceRecord) -> R,
    ) -> Result<R, StoreError> {
        let mut entry = self
            .scans
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("scan {id}")))?;
        let record = entry
            .services
            .get_mut(task_name)
            .ok_or_else(|| StoreError::NotFound(format!("service {task_name} on scan {id}")))?;
        Ok(f(record))
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn create_scan(&self, scan: Scan, services: Vec<ServiceRecord>) -> Result<Scan, StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.scans.entry(scan.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("scan {}", scan.id))),
            Entry::Vacant(slot) => {
                let services = services
                    .into_iter()
                    .map(|s| (s.task_name.clone(), s))
                    .collect();
                slot.insert(ScanEntry {
                    scan: scan.clone(),
                    services,
                });
                Ok(scan)
            }
        }
    }

    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>, StoreError> {
        Ok(self.scans.get(&id).map(|e| e.scan.clone()))
    }

    async fn update_scan_status(
        &self,
        id: ScanId,
        status: ScanStatus,
        progress: Progress,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Scan, StoreError> {
        let mut entry = self
            .scans
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("scan {id}")))?;
        entry.scan.status = status;
        entry.scan.progress = progress;
        entry.scan.completed_at = completed_at;
        Ok(entry.scan.clone())
    }

    async fn update_service_status(
        &self,
        id: ScanId,
        task_name: &str,
        status: ServiceStatus,
    ) -> Result<(), StoreError> {
        self.with_service(id, task_name, |record| record.status = status)
    }

    async fn update_service_result(
        &self,
        id: ScanId,
        task_name: &str,
        result: ServiceResult,
    ) -> Result<(), StoreError> {
        self.with_service(id, task_name, |record| record.apply_result(result))
    }

    async fn get_scan_services(&self, id: ScanId) -> Result<Vec<ServiceRecord>, StoreError> {
        let entry = self
            .scans
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("scan {id}")))?;
        Ok(entry.services.values().cloned().collect())
    }

    async fn get_retryable_services(&self, id: ScanId) -> Result<Vec<ServiceRecord>, StoreError> {
        Ok(self
            .get_scan_services(id)
            .await?
            .into_iter()
            .filter(ServiceRecord::can_retry)
            .collect())
    }

    async fn increment_retry_attempt(&self, id: ScanId, task_name: &str) -> Result<(), StoreError> {
        self.with_service(id, task_name, |record| {
            record.retry_attempts = record.retry_attempts.saturating_add(1);
        })
    }

    async fn record_service_update(&self, id: ScanId, update: ServiceUpdate) -> Result<Scan, StoreError> {
        let mut entry = self
            .scans
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("scan {id}")))?;
        let ScanEntry { scan, services } = &mut *entry;
        let record = services.get_mut(&update.task_name).ok_or_else(|| {
            StoreError::NotFound(format!("service {} on scan {id}", update.task_name))
        })?;

        record.status = update.status;
        if let Some(result) = update.result {
            record.apply_result(result);
        }
        apply_scan_update(scan, update.scan);
        Ok(scan.clone())
    }

    async fn reset_for_retry(
        &self,
        id: ScanId,
        task_names: &[String],
        update: ScanUpdate,
    ) -> Result<(Scan, Vec<ServiceRecord>), StoreError> {
        let mut entry = self
            .scans
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("scan {id}")))?;
        if let Some(missing) = task_names.iter().find(|n| !entry.services.contains_key(*n)) {
            return Err(StoreError::NotFound(format!("service {missing} on scan {id}")));
        }

        let ScanEntry { scan, services } = &mut *entry;
        let mut reset = Vec::with_capacity(task_names.len());
        for name in task_names {
            if let Some(record) = services.get_mut(name) {
                record.retry_attempts = record.retry_attempts.saturating_add(1);
                record.status = ServiceStatus::Pending;
                record.apply_result(ServiceResult::default());
                reset.push(record.clone());
            }
        }
        apply_scan_update(scan, update);
        Ok((scan.clone(), reset))
    }

    async fn get_scan_history(&self, limit: usize) -> Result<Vec<Scan>, StoreError> {
        let mut scans: Vec<Scan> = self.scans.iter().map(|e| e.scan.clone()).collect();
        scans.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        scans.truncate(limit);
        Ok(scans)
    }

    async fn cleanup_old_scans(&self, max_age: Duration) -> Result<Vec<ScanId>, StoreError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StoreError::Backend(format!("invalid max age: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let stale: Vec<ScanId> = self
            .scans
            .iter()
            .filter(|e| e.scan.started_at < cutoff)
            .map(|e| *e.key())
            .collect();
        for id in &stale {
            self.scans.remove(id);
        }
        Ok(stale)
    }
}

fn apply_scan_update(scan: &mut Scan, update: ScanUpdate) {
    scan.status = update.status;
    scan.progress = update.progress;
    scan.completed_at = update.completed_at;
}
