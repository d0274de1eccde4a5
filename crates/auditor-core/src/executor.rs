//! Service executor
//!
//! Runs one named task under the [`TimeoutGuard`] and turns every outcome,
//! including timeouts and panics, into an [`ExecutionResult`]. Nothing raised
//! by a task escapes this boundary.

use crate::config::AuditConfig;
use crate::error::GuardError;
use crate::guard::TimeoutGuard;
use crate::task::{AnalysisOutput, AnalysisTask};
use crate::types::{ErrorInfo, ErrorKind, ServiceResult, ServiceStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Task name → deadline
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    default: Duration,
    per_task: HashMap<String, Duration>,
}

impl TimeoutPolicy {
    /// Create policy with a default deadline
    #[inline]
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_task: HashMap::new(),
        }
    }

    /// With deadline for one task
    #[inline]
    #[must_use]
    pub fn with_task(mut self, task: impl Into<String>, timeout: Duration) -> Self {
        self.per_task.insert(task.into(), timeout);
        self
    }

    /// Deadline for `task`, falling back to the default
    #[inline]
    #[must_use]
    pub fn timeout_for(&self, task: &str) -> Duration {
        self.per_task.get(task).copied().unwrap_or(self.default)
    }
}

impl From<&AuditConfig> for TimeoutPolicy {
    fn from(config: &AuditConfig) -> Self {
        Self {
            default: config.default_timeout(),
            per_task: config
                .task_timeouts
                .iter()
                .map(|(name, ms)| (name.clone(), Duration::from_millis(*ms)))
                .collect(),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from(&AuditConfig::default())
    }
}

/// Outcome of one task attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Task returned
    Success(AnalysisOutput),
    /// Task failed, timed out or panicked
    Failed {
        /// Normalized error
        error: ErrorInfo,
        /// Deadline expired
        timed_out: bool,
    },
}

/// Normalized result of one task attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Task name
    pub task_name: String,
    /// Success or failure
    pub outcome: TaskOutcome,
    /// Dispatch to resolution
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Stored status for this outcome
    #[inline]
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        match self.outcome {
            TaskOutcome::Success(_) => ServiceStatus::Success,
            TaskOutcome::Failed { .. } => ServiceStatus::Failed,
        }
    }

    /// Check for success
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success(_))
    }

    /// Check whether the deadline expired
    #[inline]
    #[must_use]
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed { timed_out: true, .. })
    }

    /// Error of a failed attempt
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.outcome {
            TaskOutcome::Success(_) => None,
            TaskOutcome::Failed { error, .. } => Some(error),
        }
    }

    /// Fields to persist on the service record
    #[must_use]
    pub fn to_service_result(&self) -> ServiceResult {
        match &self.outcome {
            TaskOutcome::Success(output) => ServiceResult {
                score: output.score,
                data: Some(output.data.clone()),
                issues: output.issues.clone(),
                error: None,
                execution_time_ms: Some(self.execution_time_ms),
                timed_out: false,
            },
            TaskOutcome::Failed { error, timed_out } => ServiceResult {
                score: None,
                data: None,
                issues: Vec::new(),
                error: Some(error.clone()),
                execution_time_ms: Some(self.execution_time_ms),
                timed_out: *timed_out,
            },
        }
    }
}

/// Runs tasks under per-task deadlines
#[derive(Debug, Default)]
pub struct ServiceExecutor {
    guard: TimeoutGuard,
    timeouts: TimeoutPolicy,
}

impl ServiceExecutor {
    /// Create new executor
    #[inline]
    #[must_use]
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            guard: TimeoutGuard::new(),
            timeouts,
        }
    }

    /// Create from configuration
    #[inline]
    #[must_use]
    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(TimeoutPolicy::from(config))
    }

    /// Timeout policy in use
    #[inline]
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Guard (for in-flight introspection)
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &TimeoutGuard {
        &self.guard
    }

    /// Run `f` as task `task_name`; never fails
    pub async fn run<F, Fut>(&self, task_name: &str, f: F) -> ExecutionResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<AnalysisOutput>> + Send + 'static,
    {
        let timeout = self.timeouts.timeout_for(task_name);
        let start = Instant::now();
        let result = self.guard.execute(f(), timeout, task_name).await;
        let execution_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match result {
            Ok(output) => {
                tracing::debug!(task = task_name, execution_time_ms, "task succeeded");
                TaskOutcome::Success(output)
            }
            Err(err) => {
                tracing::warn!(task = task_name, execution_time_ms, error = %err, "task failed");
                TaskOutcome::Failed {
                    timed_out: err.is_timeout(),
                    error: error_info(&err),
                }
            }
        };

        ExecutionResult {
            task_name: task_name.to_string(),
            outcome,
            execution_time_ms,
        }
    }

    /// Run a registered task against `target`
    pub async fn run_task(&self, task: Arc<dyn AnalysisTask>, target: &str) -> ExecutionResult {
        let name = task.name().to_string();
        let target = target.to_string();
        self.run(&name, move || async move { task.analyze(&target).await })
            .await
    }
}

fn error_info(err: &GuardError) -> ErrorInfo {
    let kind = match err {
        GuardError::Timeout { .. } => ErrorKind::Timeout,
        GuardError::Network { .. } => ErrorKind::Network,
        GuardError::Failed { .. } => ErrorKind::Task,
        GuardError::Aborted { .. } => ErrorKind::Aborted,
    };
    ErrorInfo::new(kind, err.message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timeout_policy_falls_back_to_default() {
        let policy = TimeoutPolicy::new(Duration::from_secs(30))
            .with_task("serp", Duration::from_secs(90));
        assert_eq!(policy.timeout_for("serp"), Duration::from_secs(90));
        assert_eq!(policy.timeout_for("a11y"), Duration::from_secs(30));
    }

    #[test]
    fn timeout_policy_from_config() {
        let config = AuditConfig::new().with_task_timeout("schema", Duration::from_millis(250));
        let policy = TimeoutPolicy::from(&config);
        assert_eq!(policy.timeout_for("schema"), Duration::from_millis(250));
        assert_eq!(policy.timeout_for("other"), config.default_timeout());
    }

    #[tokio::test]
    async fn success_carries_data() {
        let executor = ServiceExecutor::default();
        let result = executor
            .run("schema", || async {
                Ok::<_, anyhow::Error>(AnalysisOutput::new(json!({ "types": 3 })).with_score(90.0))
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.status(), ServiceStatus::Success);
        let stored = result.to_service_result();
        assert_eq!(stored.score, Some(90.0));
        assert_eq!(stored.data, Some(json!({ "types": 3 })));
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn failure_is_normalized() {
        let executor = ServiceExecutor::default();
        let result = executor
            .run("a11y", || async {
                Err::<AnalysisOutput, _>(anyhow::anyhow!("page returned 500"))
            })
            .await;

        assert_eq!(result.status(), ServiceStatus::Failed);
        assert!(!result.timed_out());
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Task);
        assert_eq!(error.message, "page returned 500");
    }

    #[tokio::test]
    async fn timeout_is_flagged() {
        let policy = TimeoutPolicy::new(Duration::from_secs(30))
            .with_task("serp", Duration::from_millis(20));
        let executor = ServiceExecutor::new(policy);
        let result = executor
            .run("serp", || std::future::pending::<anyhow::Result<AnalysisOutput>>())
            .await;

        assert!(result.timed_out());
        assert_eq!(result.error().unwrap().kind, ErrorKind::Timeout);
        assert!(result.to_service_result().timed_out);
    }
}
