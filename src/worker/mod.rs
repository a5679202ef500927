//! Codec workers.
//!
//! Compression and archiving are CPU-bound and proportional to the input
//! size, so they never run on the async request tasks. Jobs are submitted to
//! a bounded pool of blocking threads; each job reports exactly one terminal
//! message back over a oneshot channel:
//!
//! - `Done`: the output file is complete
//! - `Failed(message)`: the job ran and gave up
//!
//! A job whose thread dies before reporting, or that does not report within
//! the configured timeout, surfaces as a worker failure as well.

pub mod archive;
pub mod compress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::{Result, StorageError};

/// A unit of codec work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Gzip `input` into `output`.
    Compress { input: PathBuf, output: PathBuf },
    /// Zip the folder at `folder` into `output`.
    Archive { folder: PathBuf, output: PathBuf },
}

impl Job {
    /// Short name for logs and timeout messages.
    pub fn label(&self) -> &'static str {
        match self {
            Job::Compress { .. } => "compression",
            Job::Archive { .. } => "archive",
        }
    }

    /// Run the job on the current (blocking) thread.
    pub fn run(self) -> JobReport {
        match self {
            Job::Compress { input, output } => match compress::gzip_file(&input, &output) {
                Ok(bytes) => {
                    debug!(input = %input.display(), bytes, "Compression finished");
                    JobReport::Done
                }
                Err(message) => JobReport::Failed(message),
            },
            Job::Archive { folder, output } => match archive::zip_folder(&folder, &output) {
                Ok(entries) => {
                    debug!(folder = %folder.display(), entries, "Archive finished");
                    JobReport::Done
                }
                Err(message) => JobReport::Failed(message),
            },
        }
    }
}

/// Terminal message of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Done,
    Failed(String),
}

/// Job submission interface.
///
/// `submit` resolves once the job has reported; the caller is suspended, not
/// spinning, while it runs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn submit(&self, job: Job) -> Result<()>;
}

/// Bounded pool of blocking worker threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once.
    pub fn new(size: usize, timeout: Option<Duration>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            timeout,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.pool_size, config.job_timeout())
    }

    /// Jobs that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn run_blocking<F>(&self, label: &'static str, work: F) -> Result<()>
    where
        F: FnOnce() -> JobReport + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Worker("worker pool is closed".to_string()))?;

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            // The receiver may have timed out already.
            let _ = tx.send(work());
        });

        let received = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                warn!(job = label, timeout_secs = limit.as_secs(), "Job timed out");
                StorageError::Worker(format!(
                    "{label} job timed out after {}s",
                    limit.as_secs()
                ))
            })?,
            None => rx.await,
        };

        match received {
            Ok(JobReport::Done) => Ok(()),
            Ok(JobReport::Failed(message)) => {
                warn!(job = label, error = %message, "Job failed");
                Err(StorageError::Worker(message))
            }
            Err(_) => {
                warn!(job = label, "Worker exited without a report");
                Err(StorageError::Worker(format!(
                    "{label} worker exited before reporting a result"
                )))
            }
        }
    }
}

#[async_trait]
impl JobExecutor for WorkerPool {
    async fn submit(&self, job: Job) -> Result<()> {
        let label = job.label();
        self.run_blocking(label, move || job.run()).await
    }
}
