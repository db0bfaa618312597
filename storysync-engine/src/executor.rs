//! Bounded-concurrency batch runner.
//!
//! At most `concurrency` operations are in flight at any instant: a
//! semaphore permit is taken before an item is spawned and released when it
//! finishes. Each item's outcome is recorded against its submission index.
//! A failing item never aborts the others unless `fail_fast` is set; then,
//! like cancellation, it stops further dispatch while items already running
//! finish and report.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use storysync_core::config::ExecutorConfig;
use storysync_core::ConfigError;

use crate::rate_limiter::RateLimiter;

/// `(completed, total)`; fires once per finished item.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Per-run collaborators.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Every item takes a token before it starts.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub progress: Option<ProgressCallback>,
    /// Cancelling stops dispatch of further items.
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Outcome of [`ParallelExecutor::run_all`], ordered by submission index.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelResult<T> {
    pub total: usize,
    pub results: Vec<(usize, T)>,
    pub errors: Vec<(usize, String)>,
    /// Items never started because the run was stopped early.
    pub skipped: Vec<usize>,
}

impl<T> ParallelResult<T> {
    fn new(total: usize) -> Self {
        Self {
            total,
            results: Vec::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    /// `results / total`, 0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.results.len() as f64 / self.total as f64
        }
    }

    pub fn stopped_early(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelExecutor {
    concurrency: usize,
    fail_fast: bool,
}

impl ParallelExecutor {
    pub fn new(concurrency: usize, fail_fast: bool) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "executor concurrency",
            });
        }
        Ok(Self {
            concurrency,
            fail_fast,
        })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ConfigError> {
        Self::new(config.concurrency, config.fail_fast)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Apply `op` to every item with bounded concurrency.
    ///
    /// A panicking operation is recorded as that item's error.
    pub async fn run_all<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        op: F,
        options: RunOptions,
    ) -> ParallelResult<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let total = items.len();
        let mut out = ParallelResult::new(total);
        let op = Arc::new(op);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let stop = options.cancel.clone().unwrap_or_default().child_token();

        let mut pending: VecDeque<(usize, T)> = items.into_iter().enumerate().collect();
        let mut running: BTreeSet<usize> = BTreeSet::new();
        let mut tasks: JoinSet<(usize, Result<Result<R, E>, JoinError>)> = JoinSet::new();
        let mut completed = 0usize;
        let mut stopped = false;

        loop {
            if tasks.is_empty() && (stopped || pending.is_empty()) {
                break;
            }
            tokio::select! {
                biased;

                _ = stop.cancelled(), if !stopped => {
                    stopped = true;
                    tracing::debug!(pending = pending.len(), running = running.len(), "batch dispatch stopped");
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let Ok((index, outcome)) = joined else {
                        continue;
                    };
                    running.remove(&index);
                    completed += 1;
                    match outcome {
                        Ok(Ok(value)) => out.results.push((index, value)),
                        Ok(Err(err)) => {
                            tracing::warn!(index, error = %err, "batch item failed");
                            out.errors.push((index, err.to_string()));
                            if self.fail_fast {
                                stop.cancel();
                            }
                        }
                        Err(join_err) => {
                            tracing::warn!(index, error = %join_err, "batch item panicked");
                            out.errors.push((index, format!("operation panicked: {join_err}")));
                            if self.fail_fast {
                                stop.cancel();
                            }
                        }
                    }
                    if let Some(progress) = &options.progress {
                        progress(completed, total);
                    }
                }

                Ok(permit) = semaphore.clone().acquire_owned(), if !stopped && !pending.is_empty() => {
                    let Some((index, item)) = pending.pop_front() else {
                        continue;
                    };
                    let op = op.clone();
                    let limiter = options.rate_limiter.clone();
                    running.insert(index);
                    tasks.spawn(async move {
                        let _permit = permit;
                        let mut work = AbortOnDrop(tokio::spawn(async move {
                            if let Some(limiter) = limiter {
                                limiter.acquire().await;
                            }
                            op(item).await
                        }));
                        (index, (&mut work.0).await)
                    });
                }

                else => break,
            }
        }

        // Dispatched items whose wrapper task was lost.
        for index in running {
            out.errors.push((index, "operation aborted".to_string()));
        }
        out.skipped = pending.into_iter().map(|(index, _)| index).collect();
        out.results.sort_by_key(|(index, _)| *index);
        out.errors.sort_by_key(|(index, _)| *index);
        out
    }
}

/// Aborts the item's task when its wrapper is dropped, so a dropped
/// `run_all` leaves no started item running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
