use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use super::preprocess::{AudioPreprocessor, PreprocessOptions, ProcessingResult};
use crate::error::{Result, VoxError};

/// Result for one input of a batch.
#[derive(Debug)]
pub enum BatchOutcome {
    Done(ProcessingResult),
    Failed(VoxError),
    /// Not started because the batch was cancelled
    Cancelled,
}

#[derive(Debug)]
pub struct BatchItem {
    pub input: PathBuf,
    pub outcome: BatchOutcome,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Outcomes in input order.
#[derive(Debug)]
pub struct BatchSummary {
    pub items: Vec<BatchItem>,
}

impl BatchSummary {
    pub fn counts(&self) -> BatchCounts {
        let mut counts = BatchCounts::default();
        for item in &self.items {
            match item.outcome {
                BatchOutcome::Done(_) => counts.done += 1,
                BatchOutcome::Failed(_) => counts.failed += 1,
                BatchOutcome::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

/// Preprocesses many files in parallel. A failing file is recorded and the
/// rest continue; cancellation stops files that have not started yet.
pub struct BatchPreprocessor {
    preprocessor: AudioPreprocessor,
    cancelled: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    pool: Option<rayon::ThreadPool>,
}

impl BatchPreprocessor {
    pub fn new(preprocessor: AudioPreprocessor) -> Self {
        Self {
            preprocessor,
            cancelled: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicUsize::new(0)),
            pool: None,
        }
    }

    /// Run on a dedicated pool of `threads` workers instead of the global one.
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| VoxError::config(format!("failed to build thread pool: {}", e)))?;
        self.pool = Some(pool);
        Ok(self)
    }

    /// Shared flag; setting it cancels every file that has not started.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Files finished so far (successfully or not).
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Process `inputs` into `output_dir`. `on_item` is called from worker
    /// threads as each file finishes.
    pub fn run<F>(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        options: &PreprocessOptions,
        on_item: F,
    ) -> Result<BatchSummary>
    where
        F: Fn(&BatchItem) + Sync,
    {
        options.validate()?;
        log::info!("Batch preprocessing {} file(s)", inputs.len());

        let work = || {
            inputs
                .par_iter()
                .map(|input| {
                    let outcome = if self.is_cancelled() {
                        BatchOutcome::Cancelled
                    } else {
                        match self.preprocessor.process_audio(input, output_dir, options) {
                            Ok(result) => BatchOutcome::Done(result),
                            Err(e) => {
                                log::warn!("Failed to preprocess {}: {}", input.display(), e);
                                BatchOutcome::Failed(e)
                            }
                        }
                    };
                    let item = BatchItem {
                        input: input.clone(),
                        outcome,
                    };
                    if !matches!(item.outcome, BatchOutcome::Cancelled) {
                        self.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    on_item(&item);
                    item
                })
                .collect::<Vec<_>>()
        };

        let items = match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        };

        let summary = BatchSummary { items };
        let counts = summary.counts();
        log::info!(
            "Batch finished: {} done, {} failed, {} cancelled",
            counts.done,
            counts.failed,
            counts.cancelled
        );
        Ok(summary)
    }
}
