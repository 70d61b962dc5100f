//! Parallel execution scheduler
//!
//! Splits one formula's work into independent tasks (entities or contiguous row
//! ranges), runs them on a rayon pool and reassembles the owned partial results
//! by original row index.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;
use std::ops::Range;
use tracing::{debug, warn};

/// Engine tuning, read from the `engine:` section of a job file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Run chunks on a thread pool; false evaluates everything on the calling thread
    pub parallel: bool,
    /// Pool size; `None` lets rayon use the available parallelism
    pub max_threads: Option<usize>,
    /// Fixed rows per chunk instead of `rows / workers`
    pub chunk_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_threads: None,
            chunk_size: None,
        }
    }
}

impl EngineConfig {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Results of one task, keyed by original row index
#[derive(Debug, Clone, PartialEq)]
pub struct Partial {
    pub positions: Vec<usize>,
    pub values: Vec<Option<f64>>,
}

impl Partial {
    pub fn new(positions: Vec<usize>, values: Vec<Option<f64>>) -> Self {
        debug_assert_eq!(positions.len(), values.len());
        Self { positions, values }
    }
}

pub struct Scheduler {
    pool: Option<ThreadPool>,
    chunk_size: Option<usize>,
}

impl Scheduler {
    pub fn new(config: &EngineConfig) -> Self {
        let pool = if config.parallel {
            let mut builder = ThreadPoolBuilder::new();
            if let Some(max_threads) = config.max_threads {
                builder = builder.num_threads(max_threads);
            }
            match builder.build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!("Thread pool unavailable ({}), evaluating sequentially", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            pool,
            chunk_size: config.chunk_size.filter(|&size| size > 0),
        }
    }

    /// Number of workers tasks are spread over
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Contiguous row ranges covering `0..len`.
    /// Fewer rows than workers gives a single range.
    pub fn row_chunks(&self, len: usize) -> Vec<Range<usize>> {
        if len == 0 {
            return Vec::new();
        }
        let workers = self.worker_count();
        let chunk_size = match self.chunk_size {
            Some(size) => size,
            None if len < workers => len,
            None => (len / workers).max(1),
        };

        let chunks: Vec<Range<usize>> = (0..len)
            .step_by(chunk_size)
            .map(|start| start..(start + chunk_size).min(len))
            .collect();
        debug!(
            "Split {} rows into {} chunks across {} workers",
            len,
            chunks.len(),
            workers
        );
        chunks
    }

    /// Run every task, preserving task order in the returned vector
    pub fn run<T, R, F>(&self, tasks: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) if tasks.len() > 1 => pool.install(|| tasks.into_par_iter().map(&f).collect()),
            _ => tasks.into_iter().map(f).collect(),
        }
    }
}

/// Place partial results back into row order
pub fn reassemble(len: usize, partials: Vec<Partial>) -> Vec<Option<f64>> {
    let mut out = vec![None; len];
    for partial in partials {
        for (pos, value) in partial.positions.into_iter().zip(partial.values) {
            out[pos] = value;
        }
    }
    out
}
