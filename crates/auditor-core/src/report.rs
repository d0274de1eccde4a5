//! Caller-facing scan snapshot and response envelope

use crate::types::{
    ErrorInfo, ExternalServiceStatus, Progress, Scan, ScanId, ScanStatus, ServiceRecord,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Retry accounting for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    /// Retries consumed
    pub attempts: u32,
    /// Retry budget
    pub max_attempts: u32,
    /// Failed with budget left
    pub can_retry: bool,
}

/// One service as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    /// External status (`pending`, `running`, `completed`, `error`)
    pub status: ExternalServiceStatus,
    /// Score from the last resolved attempt
    pub score: Option<f64>,
    /// Task payload from the last successful attempt
    pub data: Option<serde_json::Value>,
    /// Findings reported by the task
    pub issues: Vec<serde_json::Value>,
    /// Normalized error of the last failed attempt
    pub error: Option<ErrorInfo>,
    /// Duration of the last resolved attempt
    pub execution_time_ms: Option<u64>,
    /// Last attempt hit its deadline
    pub timed_out: bool,
    /// Retry accounting
    pub retry: RetryInfo,
}

impl From<&ServiceRecord> for ServiceView {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            status: record.status.external(),
            score: record.score,
            data: record.data.clone(),
            issues: record.issues.clone(),
            error: record.error.clone(),
            execution_time_ms: record.execution_time_ms,
            timed_out: record.timed_out,
            retry: RetryInfo {
                attempts: record.retry_attempts,
                max_attempts: record.max_retry_attempts,
                can_retry: record.can_retry(),
            },
        }
    }
}

/// Read-only snapshot of a scan and its services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Aggregate scan status
    pub status: ScanStatus,
    /// Scan identifier
    pub scan_id: ScanId,
    /// Audited target
    pub target: String,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Set once the scan settles; cleared on retry
    pub completed_at: Option<DateTime<Utc>>,
    /// Resolved services out of total
    pub progress: Progress,
    /// Task name → view, in registration order
    pub services: IndexMap<String, ServiceView>,
}

impl ScanReport {
    /// Assemble from a scan and its records
    #[must_use]
    pub fn new(scan: &Scan, services: &[ServiceRecord]) -> Self {
        Self {
            status: scan.status,
            scan_id: scan.id,
            target: scan.target.clone(),
            started_at: scan.started_at,
            completed_at: scan.completed_at,
            progress: scan.progress,
            services: services
                .iter()
                .map(|r| (r.task_name.clone(), ServiceView::from(r)))
                .collect(),
        }
    }

    /// Names of services currently eligible for retry
    #[must_use]
    pub fn retryable(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, v)| v.retry.can_retry)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Wrap as a successful response
    #[inline]
    #[must_use]
    pub fn into_response(self) -> ScanResponse {
        ScanResponse {
            success: true,
            data: self,
        }
    }
}

/// `{ success, data }` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub success: bool,
    pub data: ScanReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, ServiceStatus};
    use serde_json::json;

    #[test]
    fn serializes_camel_case_contract() {
        let id = ScanId::new();
        let mut scan = Scan::new(id, "https://example.com", 2);
        scan.status = ScanStatus::Partial;
        scan.progress = Progress::new(2, 2);

        let mut ok = ServiceRecord::new(id, "serp", 3);
        ok.status = ServiceStatus::Success;
        ok.score = Some(72.0);
        ok.execution_time_ms = Some(12);

        let mut failed = ServiceRecord::new(id, "a11y", 3);
        failed.status = ServiceStatus::Failed;
        failed.error = Some(ErrorInfo::new(ErrorKind::Timeout, "timed out after 50ms"));
        failed.timed_out = true;

        let value =
            serde_json::to_value(ScanReport::new(&scan, &[ok, failed]).into_response()).unwrap();

        assert_eq!(value["success"], json!(true));
        assert_eq!(value["data"]["status"], json!("partial"));
        assert_eq!(value["data"]["scanId"], json!(id.to_string()));
        assert_eq!(value["data"]["progress"]["percentage"], json!(100));
        assert_eq!(value["data"]["services"]["serp"]["status"], json!("completed"));
        assert_eq!(value["data"]["services"]["serp"]["executionTimeMs"], json!(12));
        assert_eq!(value["data"]["services"]["a11y"]["status"], json!("error"));
        assert_eq!(value["data"]["services"]["a11y"]["timedOut"], json!(true));
        assert_eq!(
            value["data"]["services"]["a11y"]["retry"],
            json!({ "attempts": 0, "maxAttempts": 3, "canRetry": true })
        );
    }

    #[test]
    fn exhausted_service_is_not_retryable() {
        let id = ScanId::new();
        let scan = Scan::new(id, "t", 2);
        let mut exhausted = ServiceRecord::new(id, "serp", 2);
        exhausted.status = ServiceStatus::Failed;
        exhausted.retry_attempts = 2;
        let mut fresh = ServiceRecord::new(id, "a11y", 2);
        fresh.status = ServiceStatus::Failed;
        fresh.retry_attempts = 1;

        let report = ScanReport::new(&scan, &[exhausted, fresh]);
        assert!(!report.services["serp"].retry.can_retry);
        assert!(report.services["a11y"].retry.can_retry);
        assert_eq!(report.retryable(), vec!["a11y"]);
    }
}
