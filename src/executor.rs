//! Parallel batch executor: a bounded rayon pool running fixed-size batches.
//!
//! Items are split into batches of `batch_size`; each batch runs on one
//! worker. A failing or panicking batch is reported, never propagated into
//! its siblings: every submitted batch runs to completion and the caller
//! decides what partial completion means.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;

use crate::error::ExecutorError;

/// Result type for executor operations.
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

/// One batch that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub message: String,
    /// The batch function panicked rather than returning an error.
    pub panicked: bool,
}

/// Outcome of a best-effort batch run.
#[derive(Debug, Clone)]
pub struct BatchReport<R> {
    /// Successful batch results as `(batch_index, result)`, by batch index.
    pub results: Vec<(usize, R)>,
    pub failures: Vec<BatchFailure>,
    pub batches: usize,
}

impl<R> BatchReport<R> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Successful results in batch order, dropping the indices.
    pub fn into_results(self) -> Vec<R> {
        self.results.into_iter().map(|(_, r)| r).collect()
    }
}

/// Default worker count: the number of available cores.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Bounded worker pool for batch processing.
pub struct ParallelBatchExecutor {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl ParallelBatchExecutor {
    /// Create an executor with `workers` threads; `0` means one per core.
    pub fn new(workers: usize) -> ExecutorResult<Self> {
        let workers = if workers == 0 {
            default_workers()
        } else {
            workers
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("topograph-worker-{i}"))
            .build()
            .map_err(|e| ExecutorError::PoolBuild {
                message: e.to_string(),
            })?;
        tracing::debug!(workers, "batch executor ready");
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `op` inside this executor's pool, so nested rayon iterators use
    /// its threads.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }

    /// Run every batch and report successes and failures side by side.
    ///
    /// `batch_fn` receives the batch index and the batch's items in their
    /// original order.
    pub fn run_batches<T, R, E, F>(
        &self,
        items: &[T],
        batch_size: usize,
        batch_fn: F,
    ) -> ExecutorResult<BatchReport<R>>
    where
        T: Sync,
        R: Send,
        E: Display,
        F: Fn(usize, &[T]) -> Result<R, E> + Sync,
    {
        if batch_size == 0 {
            return Err(ExecutorError::InvalidBatchSize { batch_size });
        }

        let outcomes: Vec<(usize, Result<R, BatchFailure>)> = self.pool.install(|| {
            items
                .par_chunks(batch_size)
                .enumerate()
                .map(|(batch_index, batch)| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| batch_fn(batch_index, batch)));
                    let result = match outcome {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(BatchFailure {
                            batch_index,
                            message: e.to_string(),
                            panicked: false,
                        }),
                        Err(payload) => Err(BatchFailure {
                            batch_index,
                            message: panic_message(payload.as_ref()),
                            panicked: true,
                        }),
                    };
                    (batch_index, result)
                })
                .collect()
        });

        let batches = outcomes.len();
        let mut results = Vec::with_capacity(batches);
        let mut failures = Vec::new();
        for (batch_index, outcome) in outcomes {
            match outcome {
                Ok(value) => results.push((batch_index, value)),
                Err(failure) => {
                    tracing::warn!(
                        batch = failure.batch_index,
                        panicked = failure.panicked,
                        error = %failure.message,
                        "batch failed"
                    );
                    failures.push(failure);
                }
            }
        }

        Ok(BatchReport {
            results,
            failures,
            batches,
        })
    }

    /// Run every batch and return the results in batch order, or the first
    /// failure once all batches have finished.
    pub fn process_batches<T, R, E, F>(
        &self,
        items: &[T],
        batch_size: usize,
        batch_fn: F,
    ) -> ExecutorResult<Vec<R>>
    where
        T: Sync,
        R: Send,
        E: Display,
        F: Fn(usize, &[T]) -> Result<R, E> + Sync,
    {
        let report = self.run_batches(items, batch_size, batch_fn)?;
        if let Some(failure) = report.failures.into_iter().next() {
            return Err(ExecutorError::BatchFailed {
                batch_index: failure.batch_index,
                message: failure.message,
            });
        }
        Ok(report.results.into_iter().map(|(_, r)| r).collect())
    }
}

impl std::fmt::Debug for ParallelBatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBatchExecutor")
            .field("workers", &self.workers)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "batch panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn batches_preserve_internal_order() {
        let exec = ParallelBatchExecutor::new(4).unwrap();
        let items: Vec<u32> = (0..10).collect();
        let results = exec
            .process_batches(&items, 3, |_, batch| Ok::<_, String>(batch.to_vec()))
            .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results.concat(), items);
    }

    #[test]
    fn failing_batch_does_not_cancel_siblings() {
        let exec = ParallelBatchExecutor::new(2).unwrap();
        let items: Vec<u32> = (0..20).collect();
        let ran = AtomicUsize::new(0);
        let report = exec
            .run_batches(&items, 5, |index, batch| {
                ran.fetch_add(1, Ordering::SeqCst);
                if index == 1 {
                    Err(format!("bad batch starting at {}", batch[0]))
                } else {
                    Ok(batch.len())
                }
            })
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(report.batches, 4);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].batch_index, 1);
        assert!(report.failures[0].message.contains("5"));
    }

    #[test]
    fn panics_are_reported_as_failures() {
        let exec = ParallelBatchExecutor::new(2).unwrap();
        let items = [1, 2, 3, 4];
        let report = exec
            .run_batches(&items, 2, |index, _| {
                if index == 0 {
                    panic!("boom");
                }
                Ok::<_, String>(index)
            })
            .unwrap();
        assert_eq!(report.results, vec![(1, 1)]);
        assert!(report.failures[0].panicked);
        assert_eq!(report.failures[0].message, "boom");
    }

    #[test]
    fn process_batches_surfaces_failure() {
        let exec = ParallelBatchExecutor::new(1).unwrap();
        let items = [1, 2, 3];
        let err = exec
            .process_batches(&items, 1, |index, _| {
                if index == 2 { Err("nope") } else { Ok(index) }
            })
            .unwrap_err();
        assert!(matches!(err, ExecutorError::BatchFailed { batch_index: 2, .. }));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let exec = ParallelBatchExecutor::new(1).unwrap();
        let items = [1];
        assert!(matches!(
            exec.run_batches(&items, 0, |_, _| Ok::<_, String>(())),
            Err(ExecutorError::InvalidBatchSize { batch_size: 0 })
        ));
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let exec = ParallelBatchExecutor::new(0).unwrap();
        assert!(exec.workers() >= 1);
        let items: [u8; 0] = [];
        let report = exec
            .run_batches(&items, 4, |_, _| Ok::<_, String>(()))
            .unwrap();
        assert_eq!(report.batches, 0);
        assert!(report.is_complete());
    }
}
