//! Bounded worker pool for independent per-security work
//!
//! Each input is processed by exactly one task. Failures, including panics,
//! stay attached to their own input and never cancel sibling tasks.

use crate::error::{BacktestError, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Fixed-size pool of worker threads
pub struct WorkerPool {
    pool: ThreadPool,
    max_workers: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool running at most `max_workers` tasks concurrently
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(BacktestError::ConfigError(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|i| format!("pit-worker-{}", i))
            .build()
            .map_err(|e| BacktestError::ConfigError(format!("failed to build worker pool: {}", e)))?;

        Ok(Self { pool, max_workers })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `task` on every input; results come back in input order
    pub fn run<I, O, F>(&self, inputs: Vec<I>, task: F) -> Vec<(I, Result<O>)>
    where
        I: fmt::Display + Send,
        O: Send,
        F: Fn(&I) -> Result<O> + Send + Sync,
    {
        self.run_observed(inputs, task, |_: &I, _: bool| {})
    }

    /// Like [`run`](Self::run), calling `on_complete(input, succeeded)` as each task finishes
    pub fn run_observed<I, O, F, C>(
        &self,
        inputs: Vec<I>,
        task: F,
        on_complete: C,
    ) -> Vec<(I, Result<O>)>
    where
        I: fmt::Display + Send,
        O: Send,
        F: Fn(&I) -> Result<O> + Send + Sync,
        C: Fn(&I, bool) + Send + Sync,
    {
        self.pool.install(|| {
            inputs
                .into_par_iter()
                .map(|input| {
                    let result = catch_unwind(AssertUnwindSafe(|| task(&input))).unwrap_or_else(
                        |payload| {
                            Err(BacktestError::WorkerPanic {
                                input: input.to_string(),
                                message: panic_message(payload.as_ref()),
                            })
                        },
                    );
                    on_complete(&input, result.is_ok());
                    (input, result)
                })
                .collect()
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
