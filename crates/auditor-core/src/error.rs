//! Error types for the auditor
//!
//! Provides error handling for:
//! - Deadline and network failures from the timeout guard
//! - Persistence failures (propagated unchanged)
//! - Illegal lifecycle transitions and retry requests
//! - Structural orchestrator errors
//! - Configuration errors

use crate::types::{ScanId, ScanStatus};
use std::path::PathBuf;

/// Main auditor error type
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Lifecycle rejected the request
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Orchestrator rejected the request
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Persistence collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AuditError {
    /// Caller-visible validation failure (state unchanged)
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Lifecycle(e) => e.is_validation(),
            Self::Orchestrator(_) => true,
            Self::Store(_) | Self::Config(_) => false,
        }
    }

    /// Whether the caller may reasonably retry the same request later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Lifecycle(LifecycleError::Store(e)) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors from the timeout guard
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Deadline expired before the operation resolved
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation label
        label: String,
        /// Deadline that expired
        timeout_ms: u64,
    },

    /// Connection reset / refused / DNS failure
    #[error("{label} network error: {source}")]
    Network {
        /// Operation label
        label: String,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// Operation failed on its own
    #[error("{label} failed: {source}")]
    Failed {
        /// Operation label
        label: String,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// Operation panicked before producing a result
    #[error("{label} aborted before completion")]
    Aborted {
        /// Operation label
        label: String,
    },
}

impl GuardError {
    /// Check if this is a deadline expiry
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a normalized network failure
    #[inline]
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Operation label
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Timeout { label, .. }
            | Self::Network { label, .. }
            | Self::Failed { label, .. }
            | Self::Aborted { label } => label,
        }
    }

    /// Message without the label prefix, used for service records
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Timeout { timeout_ms, .. } => format!("timed out after {timeout_ms}ms"),
            Self::Network { source, .. } | Self::Failed { source, .. } => format!("{source:#}"),
            Self::Aborted { .. } => "aborted before completion".to_string(),
        }
    }
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record missing in the backing store
    #[error("record not found: {0}")]
    NotFound(String),

    /// Record already exists
    #[error("record already exists: {0}")]
    Conflict(String),

    /// Backend unavailable or failed
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Backend failures may succeed on a later attempt
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Lifecycle state machine errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Transition not in the state table
    #[error("invalid transition for scan {scan_id}: {from} -> {to}")]
    InvalidTransition {
        /// Scan
        scan_id: ScanId,
        /// Current status
        from: ScanStatus,
        /// Requested status
        to: ScanStatus,
    },

    /// Scan does not exist
    #[error("scan not found: {0}")]
    ScanNotFound(ScanId),

    /// Task not registered on the scan
    #[error("service '{task_name}' not registered on scan {scan_id}")]
    ServiceNotFound {
        /// Scan
        scan_id: ScanId,
        /// Unknown task name
        task_name: String,
    },

    /// Service updates on a scan that already settled
    #[error("scan {scan_id} is {status}; service updates require a pending or running scan")]
    ScanNotActive {
        /// Scan
        scan_id: ScanId,
        /// Current status
        status: ScanStatus,
    },

    /// Nothing eligible for retry
    #[error("scan {0} has no retryable services")]
    NoRetryableServices(ScanId),

    /// Requested services are not retry-eligible
    #[error("services not eligible for retry on scan {scan_id}: {}", names.join(", "))]
    InvalidService {
        /// Scan
        scan_id: ScanId,
        /// Offending names
        names: Vec<String>,
    },

    /// Malformed request (empty target, no tasks, duplicates)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Persistence collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Validation failures leave state unchanged
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

/// Structural orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Target missing or blank
    #[error("missing scan target")]
    MissingTarget,

    /// No tasks requested
    #[error("no tasks requested")]
    EmptyTaskList,

    /// Task name not in the registry
    #[error("unknown task: {0}")]
    UnknownTask(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
