//! Executors for batches of independent tasks.
//!
//! [`Executor::detect`] picks the implementation once per batch:
//!
//! - [`Sequential`] runs tasks in input order on the calling thread. It is always
//!   available and ignores timeouts.
//! - [`WorkerPool`] runs tasks on a rayon thread pool. With a timeout configured, every
//!   task runs on its own detached thread instead and is abandoned once its deadline
//!   passes.
//!
//! Every executor returns one slot per input, in input order. A slot is `None` when its
//! task timed out.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{self, RecvTimeoutError};
use indexmap::IndexMap;
use indicatif::ProgressBar;
use rayon::prelude::*;

use super::{error::ParallelError, ParallelSettings};

pub trait Execute {
    fn execute<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        progress: &ProgressBar,
    ) -> Result<Vec<Option<R>>, ParallelError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Execute for Sequential {
    fn execute<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        progress: &ProgressBar,
    ) -> Result<Vec<Option<R>>, ParallelError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Ok(inputs
            .into_iter()
            .map(|input| {
                let result = f(input);
                progress.inc(1);
                Some(result)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    pub max_workers: usize,
    pub timeout: Option<Duration>,
}

impl WorkerPool {
    fn execute_pooled<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        progress: &ProgressBar,
    ) -> Result<Vec<Option<R>>, ParallelError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ParallelError::ThreadPool(e.to_string()))?;

        Ok(thread_pool.install(|| {
            inputs
                .into_par_iter()
                .map(|input| {
                    let result = f(input);
                    progress.inc(1);
                    Some(result)
                })
                .collect()
        }))
    }

    fn execute_with_deadlines<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        timeout: Duration,
        progress: &ProgressBar,
    ) -> Result<Vec<Option<R>>, ParallelError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let (sender, receiver) = channel::unbounded::<(usize, R)>();

        let mut results: Vec<Option<R>> = inputs.iter().map(|_| None).collect();
        let mut pending = inputs.into_iter().enumerate();
        let mut running: IndexMap<usize, Instant> = IndexMap::new();

        let mut spawn_next = |running: &mut IndexMap<usize, Instant>| -> Result<(), ParallelError> {
            if let Some((i, input)) = pending.next() {
                let f = Arc::clone(&f);
                let sender = sender.clone();
                thread::Builder::new()
                    .name(format!("modelbase-task-{i}"))
                    .spawn(move || {
                        // The receiver is gone once the batch has finished
                        let _ = sender.send((i, f(input)));
                    })
                    .map_err(|e| ParallelError::ThreadPool(e.to_string()))?;
                running.insert(i, Instant::now() + timeout);
            }
            Ok(())
        };

        for _ in 0..self.max_workers {
            spawn_next(&mut running)?;
        }

        while let Some(deadline) = running.values().min().copied() {
            match receiver.recv_deadline(deadline) {
                Ok((i, result)) => {
                    // Late results of abandoned tasks are dropped
                    if running.swap_remove(&i).is_some() {
                        results[i] = Some(result);
                        progress.inc(1);
                        spawn_next(&mut running)?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    let expired: Vec<usize> = running
                        .iter()
                        .filter(|(_, d)| **d <= now)
                        .map(|(i, _)| *i)
                        .collect();

                    for i in expired {
                        log::warn!("Task {i} timed out after {timeout:?}");
                        running.swap_remove(&i);
                        progress.inc(1);
                        spawn_next(&mut running)?;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(results)
    }
}

impl Execute for WorkerPool {
    fn execute<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        progress: &ProgressBar,
    ) -> Result<Vec<Option<R>>, ParallelError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        match self.timeout {
            Some(timeout) => self.execute_with_deadlines(inputs, f, timeout, progress),
            None => self.execute_pooled(inputs, f, progress),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Executor {
    Sequential(Sequential),
    Pool(WorkerPool),
}

impl Executor {
    /// Chooses an executor for the given settings and platform.
    ///
    /// Parallel execution needs OS threads and more than one core. Everything else
    /// runs sequentially.
    pub fn detect(settings: &ParallelSettings) -> Self {
        let available = thread::available_parallelism().map_or(1, |n| n.get());
        let threads_supported = !cfg!(target_arch = "wasm32");

        if !settings.parallel || !threads_supported || available < 2 {
            log::debug!("Using sequential executor");
            return Executor::Sequential(Sequential);
        }

        let max_workers = settings.max_workers.unwrap_or(available).max(1);
        log::debug!("Using worker pool with {max_workers} workers");

        Executor::Pool(WorkerPool {
            max_workers,
            timeout: settings.timeout,
        })
    }
}

impl Execute for Executor {
    fn execute<T, R, F>(
        &self,
        inputs: Vec<T>,
        f: F,
        progress: &ProgressBar,
    ) -> Result<Vec<Option<R>>, ParallelError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        match self {
            Executor::Sequential(executor) => executor.execute(inputs, f, progress),
            Executor::Pool(executor) => executor.execute(inputs, f, progress),
        }
    }
}
