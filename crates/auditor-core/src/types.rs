//! Core types for the auditor
//!
//! Defines the fundamental data model:
//! - Scan and service identifiers
//! - Scan and service status vocabularies (internal and external)
//! - Progress accounting
//! - Persisted scan and service records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use ulid::Ulid;

/// Unique scan identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub Ulid);

impl ScanId {
    /// Generate new scan ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScanId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Scan lifecycle status
///
/// ```text
/// pending   → running, failed
/// running   → completed, partial, failed
/// completed → running
/// partial   → running
/// failed    → running
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Created, no task dispatched yet
    Pending,
    /// Tasks are being executed
    Running,
    /// Every task succeeded
    Completed,
    /// Some but not all tasks succeeded
    Partial,
    /// No task succeeded
    Failed,
}

impl ScanStatus {
    /// Returns the set of valid target states from the current state.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [ScanStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Completed, Self::Partial, Self::Failed],
            Self::Completed | Self::Partial | Self::Failed => &[Self::Running],
        }
    }

    /// Check whether `target` is reachable in one step.
    #[inline]
    #[must_use]
    pub fn can_transition_to(&self, target: ScanStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Terminal statuses are the ones a scan settles in once every task resolved.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    /// Derive the aggregate status from success/failure counts.
    ///
    /// Returns `None` while tasks are still outstanding.
    #[must_use]
    pub fn derive(succeeded: usize, failed: usize, total: usize) -> Option<ScanStatus> {
        if total == 0 || succeeded + failed < total {
            return None;
        }
        Some(if succeeded == total {
            Self::Completed
        } else if succeeded == 0 {
            Self::Failed
        } else {
            Self::Partial
        })
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Per-task status as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Waiting for dispatch
    Pending,
    /// Dispatched, no outcome yet
    Running,
    /// Task returned a result
    Success,
    /// Task failed or timed out
    Failed,
}

impl ServiceStatus {
    /// Resolved services count towards progress
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Map to the externally-facing vocabulary
    #[inline]
    #[must_use]
    pub fn external(&self) -> ExternalServiceStatus {
        match self {
            Self::Pending => ExternalServiceStatus::Pending,
            Self::Running => ExternalServiceStatus::Running,
            Self::Success => ExternalServiceStatus::Completed,
            Self::Failed => ExternalServiceStatus::Error,
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Per-task status vocabulary exposed in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalServiceStatus {
    /// Not yet started
    Pending,
    /// In progress
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Error,
}

/// Scan progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Resolved services (success or failed)
    pub completed: u32,
    /// Registered services, fixed at creation
    pub total: u32,
    /// `round(100 * completed / total)`
    pub percentage: u8,
}

impl Progress {
    /// Build progress, computing the percentage
    #[must_use]
    pub fn new(completed: u32, total: u32) -> Self {
        Self {
            completed,
            total,
            percentage: percentage(completed, total),
        }
    }

    /// Zero progress over `total` services
    #[inline]
    #[must_use]
    pub fn empty(total: u32) -> Self {
        Self::new(0, total)
    }
}

/// Integer `round(100 * completed / total)`, halves round up.
#[must_use]
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = u64::from(completed.min(total));
    let total = u64::from(total);
    let pct = (200 * completed + total) / (2 * total);
    u8::try_from(pct).unwrap_or(100)
}

/// Failure classification carried on failed services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Deadline expired
    Timeout,
    /// Connection reset / refused / DNS failure
    Network,
    /// Any other task failure
    Task,
    /// Operation panicked or was dropped by the runtime
    Aborted,
}

/// Normalized error attached to a failed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message
    pub message: String,
    /// Failure classification
    pub kind: ErrorKind,
}

impl ErrorInfo {
    /// Create new error info
    #[inline]
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

/// One analysis run against a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    /// Scan identifier
    pub id: ScanId,
    /// Target resource (usually a URL)
    pub target: String,
    /// Lifecycle status
    pub status: ScanStatus,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Set when a terminal status is reached, cleared on retry
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress over the registered services
    pub progress: Progress,
}

impl Scan {
    /// Create a pending scan over `total` services
    #[must_use]
    pub fn new(id: ScanId, target: impl Into<String>, total: u32) -> Self {
        Self {
            id,
            target: target.into(),
            status: ScanStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            progress: Progress::empty(total),
        }
    }
}

/// Result fields written when a service resolves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResult {
    /// Optional score reported by the task
    pub score: Option<f64>,
    /// Task payload
    pub data: Option<serde_json::Value>,
    /// Issues reported by the task
    pub issues: Vec<serde_json::Value>,
    /// Normalized error for failed services
    pub error: Option<ErrorInfo>,
    /// Wall-clock duration of the attempt
    pub execution_time_ms: Option<u64>,
    /// Whether the attempt hit its deadline
    pub timed_out: bool,
}

/// Per-task status and result within a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Owning scan
    pub scan_id: ScanId,
    /// Task name, unique per scan
    pub task_name: String,
    /// Current status
    pub status: ServiceStatus,
    /// Score from the last resolved attempt
    pub score: Option<f64>,
    /// Payload from the last resolved attempt
    pub data: Option<serde_json::Value>,
    /// Issues from the last resolved attempt
    pub issues: Vec<serde_json::Value>,
    /// Error from the last failed attempt
    pub error: Option<ErrorInfo>,
    /// Duration of the last resolved attempt
    pub execution_time_ms: Option<u64>,
    /// Whether the last attempt timed out
    pub timed_out: bool,
    /// Retries consumed so far
    pub retry_attempts: u32,
    /// Retry budget
    pub max_retry_attempts: u32,
}

impl ServiceRecord {
    /// Create a pending record
    #[must_use]
    pub fn new(scan_id: ScanId, task_name: impl Into<String>, max_retry_attempts: u32) -> Self {
        Self {
            scan_id,
            task_name: task_name.into(),
            status: ServiceStatus::Pending,
            score: None,
            data: None,
            issues: Vec::new(),
            error: None,
            execution_time_ms: None,
            timed_out: false,
            retry_attempts: 0,
            max_retry_attempts,
        }
    }

    /// Failed with retry budget left
    #[inline]
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == ServiceStatus::Failed && self.retry_attempts < self.max_retry_attempts
    }

    /// Copy result fields onto the record
    pub fn apply_result(&mut self, result: ServiceResult) {
        self.score = result.score;
        self.data = result.data;
        self.issues = result.issues;
        self.error = result.error;
        self.execution_time_ms = result.execution_time_ms;
        self.timed_out = result.timed_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_id_generation() {
        let id1 = ScanId::new();
        let id2 = ScanId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn scan_id_roundtrips_through_display() {
        let id = ScanId::new();
        let parsed: ScanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn scan_status_transitions() {
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Running));
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Failed));
        assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Completed));
        assert!(!ScanStatus::Running.can_transition_to(ScanStatus::Running));
        assert!(ScanStatus::Partial.can_transition_to(ScanStatus::Running));
        assert!(!ScanStatus::Completed.can_transition_to(ScanStatus::Failed));
    }

    #[test]
    fn derive_aggregate_status() {
        assert_eq!(ScanStatus::derive(3, 0, 3), Some(ScanStatus::Completed));
        assert_eq!(ScanStatus::derive(2, 1, 3), Some(ScanStatus::Partial));
        assert_eq!(ScanStatus::derive(0, 2, 2), Some(ScanStatus::Failed));
        assert_eq!(ScanStatus::derive(1, 0, 2), None);
        assert_eq!(ScanStatus::derive(0, 0, 0), None);
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(0, 3), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn external_status_mapping() {
        assert_eq!(ServiceStatus::Success.external(), ExternalServiceStatus::Completed);
        assert_eq!(ServiceStatus::Failed.external(), ExternalServiceStatus::Error);
        assert_eq!(ServiceStatus::Running.external(), ExternalServiceStatus::Running);
    }

    #[test]
    fn can_retry_respects_budget() {
        let mut record = ServiceRecord::new(ScanId::new(), "schema", 2);
        assert!(!record.can_retry());

        record.status = ServiceStatus::Failed;
        record.retry_attempts = 1;
        assert!(record.can_retry());

        record.retry_attempts = 2;
        assert!(!record.can_retry());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ScanStatus::Partial).unwrap();
        assert_eq!(json, "\"partial\"");
    }
}
