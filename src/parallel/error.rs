//! Parallel Error Module
//!
//! Errors raised by the executor and the on-disk result cache. Failures inside a
//! worker are not represented here: workers report them through their own result type
//! and timed-out tasks are simply missing from the result mapping.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
