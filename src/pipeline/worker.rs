use thiserror::Error;

use super::context::BuildContext;
use crate::errors::BuildError;

/// A worker failure. Skips are logged and the pipeline continues; fatal
/// errors abort the build.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker '{name}' skipped: {reason}")]
    Skipped { name: String, reason: String },

    #[error(transparent)]
    Fatal(#[from] BuildError),
}

impl WorkerError {
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Skipped {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// One pipeline stage.
///
/// Workers mutate the provided `BuildContext` in place; later workers
/// read what earlier ones wrote. A build is synchronous end to end, so
/// workers must not block on anything external.
pub trait BuildWorker {
    /// Unique name for logging / diagnostics.
    fn name(&self) -> &str;

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError>;
}

/// Chains workers and executes them in order.
pub struct WorkerPipeline {
    workers: Vec<Box<dyn BuildWorker>>,
}

impl WorkerPipeline {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    pub fn add_worker(mut self, worker: Box<dyn BuildWorker>) -> Self {
        self.workers.push(worker);
        self
    }

    /// Execute all workers. Skips continue, fatal errors abort.
    pub fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        for worker in &self.workers {
            match worker.run(ctx) {
                Ok(()) => {
                    tracing::debug!("worker '{}' completed", worker.name());
                }
                Err(err) if err.is_skip() => {
                    tracing::debug!("{err}");
                }
                Err(WorkerError::Fatal(err)) => {
                    tracing::warn!("worker '{}' failed: {err}", worker.name());
                    return Err(err);
                }
                Err(WorkerError::Skipped { .. }) => unreachable!("handled above"),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for WorkerPipeline {
    fn default() -> Self {
        Self::new()
    }
}
