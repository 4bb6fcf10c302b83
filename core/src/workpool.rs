//! Ordered parallel map over a rayon thread pool
//!
//! A [`MapWork`] owns one [`rayon::ThreadPool`] for its whole life. Each
//! batch is an indexed parallel map, so results come back in input order
//! no matter which thread finishes first.
//!
//! Abort is cooperative: it bumps an epoch counter and every task of an
//! older epoch returns [`WorkError::Aborted`] without running. A panicking
//! task becomes an error result for its index; the pool keeps running.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

/// A task applied to every input of a batch
pub trait Operation: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn do_task(&self, input: Self::Input) -> Self::Output;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkError {
    #[error("No input provided")]
    NoData,

    #[error("Worker pool is stopped")]
    Stopped,

    #[error("Task {index} panicked")]
    TaskPanicked { index: usize },

    #[error("Work aborted")]
    Aborted,
}

type TaskResult<O> = Result<<O as Operation>::Output, WorkError>;

/// Fixed-size rayon pool running one [`Operation`]
pub struct MapWork<O: Operation> {
    op: Arc<O>,
    pool: Option<ThreadPool>,
    epoch: Arc<AtomicU64>,
}

impl<O: Operation> MapWork<O> {
    /// Build a pool of `threads` workers; 0 means one per available core
    pub fn new(op: O, threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            threads
        };

        let pool = match ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("map-work-{}", i))
            .build()
        {
            Ok(pool) => {
                debug!("Map work pool running {} threads", pool.current_num_threads());
                Some(pool)
            }
            Err(e) => {
                error!("Failed to build map work pool: {}", e);
                None
            }
        };

        Self {
            op: Arc::new(op),
            pool,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of pool threads, 0 once stopped
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(0, ThreadPool::current_num_threads)
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Start `items` in the background and return a channel yielding one
    /// result per item in input order. If the batch is aborted the channel
    /// yields `Err(WorkError::Aborted)` in place of the remaining results and
    /// closes.
    pub fn start(&self, items: Vec<O::Input>) -> Result<Receiver<TaskResult<O>>, WorkError> {
        if items.is_empty() {
            return Err(WorkError::NoData);
        }
        let pool = self.pool.as_ref().ok_or(WorkError::Stopped)?;

        let op = Arc::clone(&self.op);
        let current = Arc::clone(&self.epoch);
        let epoch = current.load(Ordering::SeqCst);
        let wave = pool.current_num_threads().max(1);
        let (tx, rx) = mpsc::channel();

        // results are released one wave of `wave` items at a time
        pool.spawn(move || {
            let length = items.len();
            let mut inputs = items.into_iter().enumerate();
            let mut sent = 0;
            loop {
                let batch: Vec<_> = inputs.by_ref().take(wave).collect();
                if batch.is_empty() {
                    return;
                }
                let results: Vec<_> = batch
                    .into_par_iter()
                    .map(|(index, input)| run_task(&*op, epoch, &current, index, input))
                    .collect();
                for r in results {
                    let aborted = matches!(r, Err(WorkError::Aborted));
                    // receiver is gone once the caller drops the batch
                    if tx.send(r).is_err() || aborted {
                        if aborted {
                            debug!("Map work aborted after {} of {} results", sent, length);
                        }
                        return;
                    }
                    sent += 1;
                }
            }
        });

        Ok(rx)
    }

    /// Run a batch to completion and collect the per-item results
    pub fn run(&self, items: Vec<O::Input>) -> Result<Vec<TaskResult<O>>, WorkError> {
        if items.is_empty() {
            return Err(WorkError::NoData);
        }
        let pool = self.pool.as_ref().ok_or(WorkError::Stopped)?;

        let op = &*self.op;
        let current = &*self.epoch;
        let epoch = current.load(Ordering::SeqCst);
        let results: Vec<TaskResult<O>> = pool.install(|| {
            items
                .into_par_iter()
                .enumerate()
                .map(|(index, input)| run_task(op, epoch, current, index, input))
                .collect()
        });

        if results.iter().any(|r| matches!(r, Err(WorkError::Aborted))) {
            return Err(WorkError::Aborted);
        }
        Ok(results)
    }

    /// Abandon every batch in flight; the pool stays usable
    pub fn abort(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Abort in-flight work and release the pool
    pub fn stop(&mut self) {
        self.abort();
        self.pool = None;
    }
}

impl<O: Operation> Drop for MapWork<O> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_task<O: Operation>(
    op: &O,
    epoch: u64,
    current: &AtomicU64,
    index: usize,
    input: O::Input,
) -> TaskResult<O> {
    if current.load(Ordering::SeqCst) != epoch {
        return Err(WorkError::Aborted);
    }
    panic::catch_unwind(AssertUnwindSafe(|| op.do_task(input))).map_err(|_| {
        error!("Map work task {} panicked", index);
        WorkError::TaskPanicked { index }
    })
}
