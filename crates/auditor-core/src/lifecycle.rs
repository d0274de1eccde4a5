//! Scan lifecycle state machine
//!
//! Owns every write to scan and service status. Progress and the aggregate
//! scan status are computed here from the service records and written to the
//! [`ScanStore`] explicitly.
//!
//! Each mutating operation runs inside a per-scan critical section: it reads,
//! validates and writes while holding that scan's async mutex, so two updates
//! to the same scan never interleave. Distinct scans never contend. Every
//! validation happens before the write, and each operation issues a single
//! store write, so a rejected or failed call leaves the store untouched.

use crate::config::AuditConfig;
use crate::error::LifecycleError;
use crate::report::ScanReport;
use crate::store::{ScanStore, ScanUpdate, ServiceUpdate};
use crate::types::{
    Progress, Scan, ScanId, ScanStatus, ServiceRecord, ServiceResult, ServiceStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Services reset by [`ScanLifecycle::prepare_for_retry`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    /// Scan after re-entering `running`
    pub scan: Scan,
    /// Reset task names, in registration order
    pub services: Vec<String>,
    /// Reset records as stored, carrying the attempt each is now on
    pub records: Vec<ServiceRecord>,
}

/// Persisted scan state machine
pub struct ScanLifecycle {
    store: Arc<dyn ScanStore>,
    max_retry_attempts: u32,
    locks: DashMap<ScanId, Arc<Mutex<()>>>,
}

impl ScanLifecycle {
    /// Create new lifecycle over `store`
    #[must_use]
    pub fn new(store: Arc<dyn ScanStore>, max_retry_attempts: u32) -> Self {
        Self {
            store,
            max_retry_attempts,
            locks: DashMap::new(),
        }
    }

    /// Create from configuration
    #[must_use]
    pub fn from_config(store: Arc<dyn ScanStore>, config: &AuditConfig) -> Self {
        Self::new(store, config.max_retry_attempts)
    }

    /// Backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.store
    }

    fn lock_for(&self, scan_id: ScanId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(scan_id).or_default().value())
    }

    async fn load_scan(&self, scan_id: ScanId) -> Result<Scan, LifecycleError> {
        self.store
            .get_scan(scan_id)
            .await?
            .ok_or(LifecycleError::ScanNotFound(scan_id))
    }

    /// Create a pending scan with one pending service per task
    ///
    /// # Errors
    /// `InvalidRequest` for a blank target, no tasks or duplicate task names.
    pub async fn initialize(
        &self,
        target: &str,
        task_names: &[String],
        scan_id: Option<ScanId>,
    ) -> Result<Scan, LifecycleError> {
        if target.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest("target is empty".to_string()));
        }
        if task_names.is_empty() {
            return Err(LifecycleError::InvalidRequest("no tasks requested".to_string()));
        }
        let mut seen = HashSet::with_capacity(task_names.len());
        if let Some(dup) = task_names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(LifecycleError::InvalidRequest(format!(
                "duplicate task name '{dup}'"
            )));
        }
        let total = u32::try_from(task_names.len())
            .map_err(|_| LifecycleError::InvalidRequest("too many tasks".to_string()))?;

        let scan_id = scan_id.unwrap_or_default();
        let services = task_names
            .iter()
            .map(|name| ServiceRecord::new(scan_id, name.clone(), self.max_retry_attempts))
            .collect();
        let scan = self
            .store
            .create_scan(Scan::new(scan_id, target, total), services)
            .await?;

        tracing::info!(scan_id = %scan.id, target, total, "scan initialized");
        Ok(scan)
    }

    /// Move a pending or settled scan to `running`
    ///
    /// # Errors
    /// `InvalidTransition` if the scan is already running.
    pub async fn start(&self, scan_id: ScanId) -> Result<Scan, LifecycleError> {
        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;

        let scan = self.load_scan(scan_id).await?;
        check_transition(&scan, ScanStatus::Running)?;
        let from = scan.status;

        let scan = self
            .store
            .update_scan_status(scan_id, ScanStatus::Running, scan.progress, None)
            .await?;
        tracing::info!(%scan_id, %from, to = %scan.status, "scan started");
        Ok(scan)
    }

    /// Record a service status, recompute progress and settle the scan once
    /// every service resolved
    ///
    /// Result fields are written only when `status` is success or failed.
    ///
    /// # Errors
    /// - `ScanNotActive` if the scan already settled
    /// - `ServiceNotFound` for a task not registered on the scan
    /// - `InvalidTransition` if the derived status is unreachable
    pub async fn update_service_status(
        &self,
        scan_id: ScanId,
        task_name: &str,
        status: ServiceStatus,
        result: Option<ServiceResult>,
    ) -> Result<Scan, LifecycleError> {
        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;

        let scan = self.load_scan(scan_id).await?;
        if scan.status.is_terminal() {
            return Err(LifecycleError::ScanNotActive {
                scan_id,
                status: scan.status,
            });
        }

        let mut services = self.store.get_scan_services(scan_id).await?;
        let record = services
            .iter_mut()
            .find(|s| s.task_name == task_name)
            .ok_or_else(|| LifecycleError::ServiceNotFound {
                scan_id,
                task_name: task_name.to_string(),
            })?;
        record.status = status;

        let tally = Tally::of(&services);
        let derived = ScanStatus::derive(tally.succeeded, tally.failed, scan.progress.total as usize);
        if let Some(next) = derived {
            check_transition(&scan, next)?;
        }

        let progress = Progress::new(tally.resolved(), scan.progress.total);
        let (next_status, completed_at) = match derived {
            Some(next) => (next, Some(Utc::now())),
            None => (scan.status, scan.completed_at),
        };
        let updated = self
            .store
            .record_service_update(
                scan_id,
                ServiceUpdate {
                    task_name: task_name.to_string(),
                    status,
                    result: result.filter(|_| status.is_resolved()),
                    scan: ScanUpdate {
                        status: next_status,
                        progress,
                        completed_at,
                    },
                },
            )
            .await?;

        tracing::debug!(
            %scan_id,
            task = task_name,
            %status,
            completed = progress.completed,
            total = progress.total,
            "service updated"
        );
        if derived.is_some() {
            tracing::info!(%scan_id, status = %updated.status, "scan settled");
        }
        Ok(updated)
    }

    /// Snapshot of a scan and its services
    ///
    /// # Errors
    /// `ScanNotFound` for an unknown scan.
    pub async fn get_status(&self, scan_id: ScanId) -> Result<ScanReport, LifecycleError> {
        let scan = self.load_scan(scan_id).await?;
        let services = self.store.get_scan_services(scan_id).await?;
        Ok(ScanReport::new(&scan, &services))
    }

    /// Reset failed services for another attempt and re-enter `running`
    ///
    /// `None` or an empty list selects every eligible service.
    ///
    /// # Errors
    /// - `NoRetryableServices` when nothing is eligible
    /// - `InvalidService` when any requested name is not eligible
    /// - `InvalidTransition` when the scan is still running
    pub async fn prepare_for_retry(
        &self,
        scan_id: ScanId,
        task_names: Option<&[String]>,
    ) -> Result<RetryPlan, LifecycleError> {
        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;

        let scan = self.load_scan(scan_id).await?;
        let services = self.store.get_scan_services(scan_id).await?;
        let eligible: Vec<&ServiceRecord> = services.iter().filter(|s| s.can_retry()).collect();
        if eligible.is_empty() {
            return Err(LifecycleError::NoRetryableServices(scan_id));
        }

        let selected: Vec<String> = match task_names {
            Some(requested) if !requested.is_empty() => {
                let mut invalid: Vec<String> = requested
                    .iter()
                    .filter(|n| !eligible.iter().any(|s| &s.task_name == *n))
                    .cloned()
                    .collect();
                if !invalid.is_empty() {
                    invalid.sort();
                    invalid.dedup();
                    return Err(LifecycleError::InvalidService {
                        scan_id,
                        names: invalid,
                    });
                }
                // Registration order, duplicates in the request collapsed.
                eligible
                    .iter()
                    .filter(|s| requested.contains(&s.task_name))
                    .map(|s| s.task_name.clone())
                    .collect()
            }
            _ => eligible.iter().map(|s| s.task_name.clone()).collect(),
        };
        check_transition(&scan, ScanStatus::Running)?;

        let resolved = services
            .iter()
            .filter(|s| s.status.is_resolved() && !selected.contains(&s.task_name))
            .count();
        let (scan, records) = self
            .store
            .reset_for_retry(
                scan_id,
                &selected,
                ScanUpdate {
                    status: ScanStatus::Running,
                    progress: Progress::new(count_u32(resolved), scan.progress.total),
                    completed_at: None,
                },
            )
            .await?;

        tracing::info!(%scan_id, services = ?selected, "scan re-entered running for retry");
        Ok(RetryPlan {
            scan,
            services: selected,
            records,
        })
    }

    /// Most recent scans first
    ///
    /// # Errors
    /// Store failures, unchanged.
    pub async fn history(&self, limit: usize) -> Result<Vec<Scan>, LifecycleError> {
        Ok(self.store.get_scan_history(limit).await?)
    }

    /// Delete scans older than `max_age` and their locks; returns how many
    ///
    /// # Errors
    /// Store failures, unchanged.
    pub async fn cleanup_old_scans(&self, max_age: Duration) -> Result<usize, LifecycleError> {
        let removed = self.store.cleanup_old_scans(max_age).await?;
        for id in &removed {
            self.locks.remove(id);
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "removed old scans");
        }
        Ok(removed.len())
    }
}

impl std::fmt::Debug for ScanLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanLifecycle")
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("locked_scans", &self.locks.len())
            .finish_non_exhaustive()
    }
}

fn check_transition(scan: &Scan, to: ScanStatus) -> Result<(), LifecycleError> {
    if scan.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition {
            scan_id: scan.id,
            from: scan.status,
            to,
        })
    }
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn of(services: &[ServiceRecord]) -> Self {
        services.iter().fold(Self::default(), |mut t, s| {
            match s.status {
                ServiceStatus::Success => t.succeeded += 1,
                ServiceStatus::Failed => t.failed += 1,
                ServiceStatus::Pending | ServiceStatus::Running => {}
            }
            t
        })
    }

    fn resolved(&self) -> u32 {
        count_u32(self.succeeded + self.failed)
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
