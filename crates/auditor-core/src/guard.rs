//! Deadline guard for single operations
//!
//! The guarded operation runs on its own runtime task and is raced against a
//! timer. Expiry abandons the wait, not the operation: the task keeps running
//! to completion and whatever it produces is discarded. Each invocation gets a
//! generation number; the registry of in-flight generations lets callers see
//! what is outstanding, and a late result is recognised because its
//! generation has already left the registry.

use crate::error::GuardError;
use dashmap::DashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Snapshot of an operation awaiting its deadline
#[derive(Debug, Clone)]
pub struct InFlightOp {
    /// Generation tag of the invocation
    pub generation: u64,
    /// Operation label
    pub label: String,
    /// Dispatch time
    pub started_at: Instant,
    /// Deadline granted
    pub timeout: Duration,
}

impl InFlightOp {
    /// Time since dispatch
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Races operations against deadlines
#[derive(Debug, Default)]
pub struct TimeoutGuard {
    next_generation: AtomicU64,
    in_flight: Arc<DashMap<u64, InFlightOp>>,
    late_results: Arc<AtomicU64>,
}

impl TimeoutGuard {
    /// Create new guard with an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` under `timeout`
    ///
    /// # Errors
    /// - `GuardError::Timeout` when the deadline expires first
    /// - `GuardError::Network` for connection reset/refused and DNS failures
    /// - `GuardError::Failed` for any other operation failure
    /// - `GuardError::Aborted` if the operation panicked
    pub async fn execute<F, T>(
        &self,
        operation: F,
        timeout: Duration,
        label: &str,
    ) -> Result<T, GuardError>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.in_flight.insert(
            generation,
            InFlightOp {
                generation,
                label: label.to_string(),
                started_at: Instant::now(),
                timeout,
            },
        );

        let _registered = Registered {
            registry: &self.in_flight,
            generation,
        };

        let (tx, rx) = oneshot::channel();
        let late_results = Arc::clone(&self.late_results);
        let task_label = label.to_string();
        tokio::spawn(async move {
            let result = operation.await;
            // The receiver is gone once the waiter gave up on this generation.
            if tx.send(result).is_err() {
                late_results.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(generation, label = %task_label, "discarding late result");
            }
        });

        let outcome = tokio::time::timeout(timeout, rx).await;

        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(classify(label, source)),
            Ok(Err(_)) => Err(GuardError::Aborted {
                label: label.to_string(),
            }),
            Err(_) => {
                tracing::warn!(generation, label, timeout_ms = millis(timeout), "deadline expired");
                Err(GuardError::Timeout {
                    label: label.to_string(),
                    timeout_ms: millis(timeout),
                })
            }
        }
    }

    /// Operations currently waiting on their deadline
    #[must_use]
    pub fn in_flight(&self) -> Vec<InFlightOp> {
        let mut ops: Vec<InFlightOp> = self.in_flight.iter().map(|e| e.value().clone()).collect();
        ops.sort_by_key(|op| op.generation);
        ops
    }

    /// Number of operations currently waiting on their deadline
    #[inline]
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Results that arrived after their invocation timed out
    #[inline]
    #[must_use]
    pub fn late_results(&self) -> u64 {
        self.late_results.load(Ordering::Relaxed)
    }
}

/// Removes a generation from the registry when the waiter finishes or is
/// dropped mid-wait
struct Registered<'a> {
    registry: &'a DashMap<u64, InFlightOp>,
    generation: u64,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.generation);
    }
}

/// Normalize an operation failure into a guard error
fn classify(label: &str, source: anyhow::Error) -> GuardError {
    if is_network_error(&source) {
        GuardError::Network {
            label: label.to_string(),
            source,
        }
    } else {
        GuardError::Failed {
            label: label.to_string(),
            source,
        }
    }
}

const NETWORK_MARKERS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "econnaborted",
    "enotfound",
    "eai_again",
    "connection reset",
    "connection refused",
    "connection aborted",
    "dns error",
    "failed to lookup address",
    "name or service not known",
];

/// Connection reset / refused / aborted and DNS lookup failures
#[must_use]
pub fn is_network_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::AddrNotAvailable
            ) {
                return true;
            }
        }
        let msg = cause.to_string().to_ascii_lowercase();
        NETWORK_MARKERS.iter().any(|m| msg.contains(m))
    })
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
