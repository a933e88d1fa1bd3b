//! Keyed, cached and optionally parallel map over worker inputs.

use std::{hash::Hash, time::Duration};

use derive_builder::Builder;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{de::DeserializeOwned, Serialize};

use super::{
    cache::Cache,
    error::ParallelError,
    executor::{Execute, Executor},
};

/// Execution options shared by all scans.
///
/// # Fields
///
/// * `parallel` - Run tasks on a worker pool when the platform allows it (default: true)
/// * `max_workers` - Size of the worker pool, `None` uses all available cores
/// * `timeout` - Per-task time limit. Tasks exceeding it are missing from the results.
///   Only honoured by the worker pool
/// * `cache` - Directory cache consulted before and filled after running a task
/// * `disable_progress` - Hide the progress bar (default: false)
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use modelbase::prelude::ParallelSettingsBuilder;
///
/// let settings = ParallelSettingsBuilder::default()
///     .max_workers(4usize)
///     .timeout(Duration::from_secs(30))
///     .disable_progress(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ParallelSettings {
    #[builder(default = "true")]
    pub parallel: bool,
    #[builder(default)]
    pub max_workers: Option<usize>,
    #[builder(default)]
    pub timeout: Option<Duration>,
    #[builder(default)]
    pub cache: Option<Cache>,
    #[builder(default)]
    pub disable_progress: bool,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            max_workers: None,
            timeout: None,
            cache: None,
            disable_progress: false,
        }
    }
}

impl ParallelSettings {
    /// Sequential execution without cache or progress bar.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            disable_progress: true,
            ..Default::default()
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if self.disable_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} | {elapsed}/{eta}")
        {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        bar
    }
}

/// Applies `f` to every input and returns the results keyed like the inputs.
///
/// With a cache configured, the serialized key of every input is looked up first and
/// `f` only runs for misses, whose results are then stored. The returned mapping keeps
/// the input order. Keys whose task timed out are absent.
///
/// # Arguments
///
/// * `f` - Worker applied to each input value
/// * `inputs` - Key and value pairs. Keys must be unique
/// * `settings` - Execution, cache and progress options
///
/// # Examples
///
/// ```
/// use modelbase::parallel::{parallelise, ParallelSettings};
///
/// let results = parallelise(
///     |x: f64| x * 2.0,
///     vec![(0usize, 1.0), (1, 2.0)],
///     &ParallelSettings::sequential(),
/// )
/// .unwrap();
///
/// assert_eq!(results[&1], 4.0);
/// ```
pub fn parallelise<K, T, R, F>(
    f: F,
    inputs: Vec<(K, T)>,
    settings: &ParallelSettings,
) -> Result<IndexMap<K, R>, ParallelError>
where
    K: Serialize + Clone + Hash + Eq,
    T: Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    try_parallelise(move |value| Ok::<R, ParallelError>(f(value)), inputs, settings)
}

/// Like [`parallelise`], for workers that can fail.
///
/// Only successful results are cached. The first failure in input order is returned
/// once every task has finished.
pub fn try_parallelise<K, T, R, E, F>(
    f: F,
    inputs: Vec<(K, T)>,
    settings: &ParallelSettings,
) -> Result<IndexMap<K, R>, E>
where
    K: Serialize + Clone + Hash + Eq,
    T: Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
    E: From<ParallelError> + Send + 'static,
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
{
    let progress = settings.progress_bar(inputs.len());

    if let Some(cache) = &settings.cache {
        cache.ensure_dir()?;
    }

    let mut keys = Vec::with_capacity(inputs.len());
    let mut slots: Vec<Option<R>> = Vec::with_capacity(inputs.len());
    let mut misses = Vec::new();
    let mut miss_positions = Vec::new();

    for (position, (key, value)) in inputs.into_iter().enumerate() {
        let key_str = serde_json::to_string(&key).map_err(ParallelError::from)?;
        let hit = settings
            .cache
            .as_ref()
            .and_then(|cache| cache.load::<R>(&key_str));

        match hit {
            Some(result) => {
                progress.inc(1);
                slots.push(Some(result));
            }
            None => {
                slots.push(None);
                misses.push(value);
                miss_positions.push((position, key_str));
            }
        }
        keys.push(key);
    }

    let executor = Executor::detect(settings);
    let computed = executor.execute(misses, f, &progress)?;
    progress.finish_and_clear();

    for ((position, key_str), result) in miss_positions.into_iter().zip(computed) {
        let result = result.transpose()?;
        if let (Some(cache), Some(result)) = (&settings.cache, &result) {
            cache.store(&key_str, result)?;
        }
        slots[position] = result;
    }

    Ok(keys
        .into_iter()
        .zip(slots)
        .filter_map(|(key, slot)| slot.map(|result| (key, result)))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn settings(parallel: bool) -> ParallelSettings {
        ParallelSettingsBuilder::default()
            .parallel(parallel)
            .max_workers(2usize)
            .disable_progress(true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_results_keep_input_order() {
        let inputs: Vec<(usize, f64)> = (0..20).rev().map(|i| (i, i as f64)).collect();
        let results = parallelise(|x: f64| x + 1.0, inputs, &settings(true)).unwrap();

        let keys: Vec<usize> = results.keys().copied().collect();
        assert_eq!(keys, (0..20).rev().collect::<Vec<_>>());
        assert_eq!(results[&3], 4.0);
    }

    #[test]
    fn test_cached_keys_skip_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ParallelSettings {
            cache: Some(Cache::new(dir.path())),
            ..settings(false)
        };
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = |calls: Arc<AtomicUsize>| {
            move |x: f64| {
                calls.fetch_add(1, Ordering::SeqCst);
                x * 10.0
            }
        };

        let first = parallelise(
            counted(calls.clone()),
            vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)],
            &settings,
        )
        .unwrap();
        let second = parallelise(
            counted(calls.clone()),
            vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)],
            &settings,
        )
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failures_are_returned_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ParallelSettings {
            cache: Some(Cache::new(dir.path())),
            ..settings(false)
        };

        let result = try_parallelise(
            |x: f64| {
                if x < 0.0 {
                    Err(ParallelError::ThreadPool("negative input".to_string()))
                } else {
                    Ok(x.sqrt())
                }
            },
            vec![(0usize, 4.0), (1, -1.0), (2, 9.0)],
            &settings,
        );

        assert!(matches!(result, Err(ParallelError::ThreadPool(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
