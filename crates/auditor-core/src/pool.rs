//! Bounded-concurrency bulk runner
//!
//! A fixed number of workers share one atomic cursor over the input. Each
//! worker claims the next index with a single `fetch_add`, processes the item,
//! then pauses for `base_delay + random(0..=jitter)` before claiming again so
//! a rate-limited upstream sees a spread-out request pattern. No item is
//! processed twice; completion order is not preserved. A panicking item is
//! caught and reported like any other failure.

use crate::config::PoolConfig;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Outcome for one input item
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome<I, T> {
    /// Item processed
    Done {
        /// Input item
        item: I,
        /// Produced value
        value: T,
    },
    /// Item failed
    Failed {
        /// Input item
        item: I,
        /// Error message
        error: String,
    },
}

impl<I, T> BulkOutcome<I, T> {
    /// Check for failure
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Input item
    #[inline]
    #[must_use]
    pub fn item(&self) -> &I {
        match self {
            Self::Done { item, .. } | Self::Failed { item, .. } => item,
        }
    }

    /// Produced value, if any
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Done { value, .. } => Some(value),
            Self::Failed { .. } => None,
        }
    }
}

/// Bulk worker pool
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    /// Create new pool
    #[inline]
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Pool settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Workers actually started for `items` items at the requested
    /// concurrency
    #[must_use]
    pub fn effective_concurrency(&self, items: usize, requested: usize) -> usize {
        let cap = self.config.max_concurrency.max(1);
        requested.clamp(1, items.min(cap).max(1))
    }

    /// Run `f` over every item with at most `concurrency` in flight
    ///
    /// Never fails as a whole; a failing or panicking item becomes
    /// [`BulkOutcome::Failed`].
    pub async fn run_bulk<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        f: F,
        concurrency: usize,
    ) -> Vec<BulkOutcome<I, T>>
    where
        I: Clone + Send + Sync,
        F: Fn(I) -> Fut + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let workers = self.effective_concurrency(items.len(), concurrency);
        let cursor = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(items.len()));
        tracing::debug!(items = items.len(), workers, "starting bulk run");

        let worker = |worker_id: usize| {
            let items = &items;
            let cursor = &cursor;
            let results = &results;
            let f = &f;
            async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };

                    let run = AssertUnwindSafe(async { f(item.clone()).await }).catch_unwind();
                    let outcome = match run.await {
                        Ok(Ok(value)) => BulkOutcome::Done {
                            item: item.clone(),
                            value,
                        },
                        Ok(Err(err)) => {
                            tracing::warn!(worker_id, index, error = %err, "bulk item failed");
                            BulkOutcome::Failed {
                                item: item.clone(),
                                error: format!("{err:#}"),
                            }
                        }
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            tracing::error!(worker_id, index, panic = %message, "bulk item panicked");
                            BulkOutcome::Failed {
                                item: item.clone(),
                                error: format!("panicked: {message}"),
                            }
                        }
                    };
                    results.lock().push(outcome);

                    if cursor.load(Ordering::SeqCst) < items.len() {
                        let pause = self.pause();
                        if !pause.is_zero() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
            }
        };

        futures::future::join_all((0..workers).map(worker)).await;
        results.into_inner()
    }

    fn pause(&self) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        };
        Duration::from_millis(self.config.base_delay_ms.saturating_add(jitter))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn each_item_processed_exactly_once() {
        let pool = WorkerPool::new(PoolConfig::unthrottled(5));
        let seen = Arc::new(Mutex::new(HashMap::<u32, usize>::new()));

        let items: Vec<u32> = (0..10).collect();
        let outcomes = pool
            .run_bulk(
                items,
                |n| {
                    let seen = Arc::clone(&seen);
                    async move {
                        *seen.lock().entry(n).or_default() += 1;
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        Ok::<_, anyhow::Error>(n * 2)
                    }
                },
                3,
            )
            .await;

        assert_eq!(outcomes.len(), 10);
        let seen = seen.lock();
        assert_eq!(seen.len(), 10);
        assert!(seen.values().all(|count| *count == 1));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(PoolConfig::unthrottled(5));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.run_bulk(
            (0..12).collect::<Vec<u32>>(),
            |_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            },
            3,
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn single_worker_runs_in_order() {
        let pool = WorkerPool::new(PoolConfig::unthrottled(5));
        let outcomes = pool
            .run_bulk(
                vec!["a", "b", "c", "d"],
                |s| async move { Ok::<_, anyhow::Error>(s.to_uppercase()) },
                1,
            )
            .await;

        let order: Vec<_> = outcomes.iter().map(|o| *o.item()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn failures_become_outcomes() {
        let pool = WorkerPool::new(PoolConfig::unthrottled(2));
        let outcomes = pool
            .run_bulk(
                vec![1, 2, 3],
                |n| async move {
                    if n == 2 {
                        anyhow::bail!("upstream returned 429");
                    }
                    Ok(n)
                },
                2,
            )
            .await;

        assert_eq!(outcomes.iter().filter(|o| o.is_error()).count(), 1);
        let failed = outcomes.iter().find(|o| o.is_error()).unwrap();
        assert_eq!(*failed.item(), 2);
        assert!(failed.value().is_none());
    }

    #[tokio::test]
    async fn panicking_item_is_contained() {
        let pool = WorkerPool::new(PoolConfig::unthrottled(5));
        let outcomes = pool
            .run_bulk(
                (0..10).collect::<Vec<u32>>(),
                |n| async move {
                    if n == 4 {
                        panic!("parser blew up on item {n}");
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok::<_, anyhow::Error>(n)
                },
                3,
            )
            .await;

        assert_eq!(outcomes.len(), 10);
        let failed: Vec<_> = outcomes.iter().filter(|o| o.is_error()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(*failed[0].item(), 4);
        match failed[0] {
            BulkOutcome::Failed { error, .. } => {
                assert_eq!(error, "panicked: parser blew up on item 4");
            }
            BulkOutcome::Done { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let pool = WorkerPool::default();
        let outcomes = pool
            .run_bulk(Vec::<u32>::new(), |n| async move { Ok::<_, anyhow::Error>(n) }, 4)
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn workers_pause_between_items() {
        let pool = WorkerPool::new(PoolConfig {
            max_concurrency: 1,
            base_delay_ms: 100,
            jitter_ms: 0,
        });
        let start = tokio::time::Instant::now();
        pool.run_bulk(vec![1, 2, 3], |n| async move { Ok::<_, anyhow::Error>(n) }, 1)
            .await;
        // Two pauses; none after the last item.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[test]
    fn concurrency_is_clamped() {
        let pool = WorkerPool::new(PoolConfig::unthrottled(5));
        assert_eq!(pool.effective_concurrency(10, 0), 1);
        assert_eq!(pool.effective_concurrency(10, 50), 5);
        assert_eq!(pool.effective_concurrency(2, 4), 2);
    }
}
