//! Scan observability events
//!
//! Events are fire-and-forget: [`EventEmitter::emit`] hands each sink its own
//! spawned task and returns immediately. A sink that fails or panics only
//! produces a warning; it never reaches the scan that raised the event.

use crate::types::{ErrorKind, ScanId, ScanStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle event for one scan or task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// Scan entered `running` with `tasks` services
    ScanStarted {
        scan_id: ScanId,
        target: String,
        tasks: usize,
    },
    /// Scan settled; `duration_ms` covers this run only
    ScanCompleted {
        scan_id: ScanId,
        status: ScanStatus,
        duration_ms: u64,
    },
    /// Task dispatched to the executor
    TaskStarted {
        scan_id: ScanId,
        task_name: String,
    },
    /// Task returned within its deadline
    TaskCompleted {
        scan_id: ScanId,
        task_name: String,
        execution_time_ms: u64,
    },
    /// Task failed, timed out or panicked
    TaskFailed {
        scan_id: ScanId,
        task_name: String,
        kind: ErrorKind,
        execution_time_ms: u64,
    },
    /// Task reset for another attempt; `attempt` counts from 1
    TaskRetried {
        scan_id: ScanId,
        task_name: String,
        attempt: u32,
    },
}

impl ScanEvent {
    /// Scan the event belongs to
    #[must_use]
    pub fn scan_id(&self) -> ScanId {
        match self {
            Self::ScanStarted { scan_id, .. }
            | Self::ScanCompleted { scan_id, .. }
            | Self::TaskStarted { scan_id, .. }
            | Self::TaskCompleted { scan_id, .. }
            | Self::TaskFailed { scan_id, .. }
            | Self::TaskRetried { scan_id, .. } => *scan_id,
        }
    }

    /// Short event name, used as a metric label
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScanStarted { .. } => "scan_started",
            Self::ScanCompleted { .. } => "scan_completed",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRetried { .. } => "task_retried",
        }
    }
}

/// Event consumer
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record one event
    async fn record(&self, event: &ScanEvent) -> anyhow::Result<()>;
}

/// Fans events out to sinks without waiting on them
#[derive(Clone, Default)]
pub struct EventEmitter {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventEmitter {
    /// Emitter with no sinks
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an additional sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of attached sinks
    #[inline]
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatch `event` to every sink on its own task
    ///
    /// Outside a runtime the event is dropped with a debug log.
    pub fn emit(&self, event: ScanEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(event = event.name(), "no runtime; event dropped");
            return;
        };

        let name = event.name();
        let event = Arc::new(event);
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = Arc::clone(&event);
            let delivery = handle.spawn(async move { sink.record(&event).await });
            handle.spawn(async move {
                match delivery.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::warn!(event = name, error = %err, "event sink failed"),
                    Err(err) => tracing::warn!(event = name, error = %err, "event sink panicked"),
                }
            });
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Writes each event as a structured log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn record(&self, event: &ScanEvent) -> anyhow::Result<()> {
        match event {
            ScanEvent::ScanStarted {
                scan_id,
                target,
                tasks,
            } => tracing::info!(%scan_id, target, tasks, "scan started"),
            ScanEvent::ScanCompleted {
                scan_id,
                status,
                duration_ms,
            } => tracing::info!(%scan_id, %status, duration_ms, "scan completed"),
            ScanEvent::TaskStarted { scan_id, task_name } => {
                tracing::debug!(%scan_id, task = task_name, "task started");
            }
            ScanEvent::TaskCompleted {
                scan_id,
                task_name,
                execution_time_ms,
            } => tracing::debug!(%scan_id, task = task_name, execution_time_ms, "task completed"),
            ScanEvent::TaskFailed {
                scan_id,
                task_name,
                kind,
                execution_time_ms,
            } => tracing::warn!(
                %scan_id,
                task = task_name,
                ?kind,
                execution_time_ms,
                "task failed"
            ),
            ScanEvent::TaskRetried {
                scan_id,
                task_name,
                attempt,
            } => tracing::info!(%scan_id, task = task_name, attempt, "task retried"),
        }
        Ok(())
    }
}

/// Publishes counters and timing histograms through the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

#[async_trait]
impl EventSink for MetricsSink {
    #[allow(clippy::cast_precision_loss)]
    async fn record(&self, event: &ScanEvent) -> anyhow::Result<()> {
        metrics::counter!("auditor_events_total", "event" => event.name()).increment(1);
        match event {
            ScanEvent::ScanCompleted {
                status,
                duration_ms,
                ..
            } => {
                metrics::counter!("auditor_scans_total", "status" => status.to_string())
                    .increment(1);
                metrics::histogram!("auditor_scan_duration_ms").record(*duration_ms as f64);
            }
            ScanEvent::TaskCompleted {
                task_name,
                execution_time_ms,
                ..
            } => {
                metrics::histogram!("auditor_task_duration_ms", "task" => task_name.clone())
                    .record(*execution_time_ms as f64);
            }
            ScanEvent::TaskFailed {
                task_name, kind, ..
            } => {
                metrics::counter!(
                    "auditor_task_failures_total",
                    "task" => task_name.clone(),
                    "kind" => format!("{kind:?}").to_lowercase()
                )
                .increment(1);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ScanEvent>>);

    #[async_trait]
    impl EventSink for Collect {
        async fn record(&self, event: &ScanEvent) -> anyhow::Result<()> {
            self.0.lock().push(event.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl EventSink for Broken {
        async fn record(&self, _event: &ScanEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    struct Panicky;

    #[async_trait]
    impl EventSink for Panicky {
        async fn record(&self, _event: &ScanEvent) -> anyhow::Result<()> {
            panic!("sink exploded")
        }
    }

    #[tokio::test]
    async fn failing_sinks_do_not_block_others() {
        let collect = Arc::new(Collect::default());
        let emitter = EventEmitter::new()
            .with_sink(Arc::new(Broken))
            .with_sink(Arc::new(Panicky))
            .with_sink(collect.clone());

        let scan_id = ScanId::new();
        emitter.emit(ScanEvent::TaskStarted {
            scan_id,
            task_name: "serp".into(),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen = collect.0.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].scan_id(), scan_id);
    }

    #[test]
    fn emit_outside_runtime_is_noop() {
        let collect = Arc::new(Collect::default());
        EventEmitter::new()
            .with_sink(collect.clone())
            .emit(ScanEvent::TaskStarted {
                scan_id: ScanId::new(),
                task_name: "serp".into(),
            });
        assert!(collect.0.lock().is_empty());
    }

    #[test]
    fn event_serializes_with_tag() {
        let value = serde_json::to_value(ScanEvent::TaskRetried {
            scan_id: ScanId::new(),
            task_name: "a11y".into(),
            attempt: 2,
        })
        .unwrap();
        assert_eq!(value["type"], "task_retried");
        assert_eq!(value["attempt"], 2);
    }

    #[tokio::test]
    async fn builtin_sinks_accept_every_event() {
        let scan_id = ScanId::new();
        let events = [
            ScanEvent::ScanCompleted {
                scan_id,
                status: ScanStatus::Partial,
                duration_ms: 20,
            },
            ScanEvent::TaskFailed {
                scan_id,
                task_name: "serp".into(),
                kind: ErrorKind::Timeout,
                execution_time_ms: 50,
            },
        ];
        for event in &events {
            TracingSink.record(event).await.unwrap();
            MetricsSink.record(event).await.unwrap();
        }
    }
}
