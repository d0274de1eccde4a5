//! Auditor Core - scan orchestration for site audits
//!
//! Coordinates a fixed set of independent analysis tasks against a target:
//! - Runs each task under a per-task deadline
//! - Tracks scan and service status in a persisted state machine
//! - Retries failed services within a bounded budget
//! - Runs bulk position checks through a throttled worker pool
//!
//! # Example
//!
//! ```rust,ignore
//! use auditor_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(registry: TaskRegistry) -> Result<(), AuditError> {
//! let service = ScanService::new(
//!     &AuditConfig::default(),
//!     Arc::new(MemoryScanStore::new()),
//!     registry,
//!     EventEmitter::new().with_sink(Arc::new(TracingSink)),
//! );
//!
//! let report = service
//!     .start_scan("https://example.com", &["serp".into(), "a11y".into()])
//!     .await?;
//! if !report.retryable().is_empty() {
//!     service.retry_scan(report.scan_id, None).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod guard;
pub mod lifecycle;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod retry;
pub mod service;
pub mod store;
pub mod task;
pub mod tracking;
pub mod types;

// Re-exports for convenience
pub use config::{AuditConfig, PoolConfig};
pub use error::{
    AuditError, ConfigError, GuardError, LifecycleError, OrchestratorError, StoreError,
};
pub use events::{EventEmitter, EventSink, MetricsSink, ScanEvent, TracingSink};
pub use executor::{ExecutionResult, ServiceExecutor, TaskOutcome, TimeoutPolicy};
pub use guard::{InFlightOp, TimeoutGuard};
pub use lifecycle::{RetryPlan, ScanLifecycle};
pub use orchestrator::ScanOrchestrator;
pub use pool::{BulkOutcome, WorkerPool};
pub use report::{RetryInfo, ScanReport, ScanResponse, ServiceView};
pub use retry::RetryCoordinator;
pub use service::ScanService;
pub use store::{MemoryScanStore, ScanStore, ScanUpdate, ServiceUpdate};
pub use task::{AnalysisOutput, AnalysisTask, TaskRegistry};
pub use tracking::{
    evaluate_alert, Alert, HistoryEntry, MemoryTrackingStore, PositionFetcher, PositionTracker,
    TrackedItem, TrackingRun, TrackingStore,
};
pub use types::{
    ErrorInfo, ErrorKind, ExternalServiceStatus, Progress, Scan, ScanId, ScanStatus,
    ServiceRecord, ServiceResult, ServiceStatus,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Auditor Core
    pub use crate::{
        AnalysisOutput, AnalysisTask, AuditConfig, AuditError, EventEmitter, MemoryScanStore,
        ScanId, ScanReport, ScanService, ScanStatus, TaskRegistry, TracingSink,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
