//! Parallel execution of a per-tile operation
//!
//! Two schedules are available: a bounded pool of worker threads draining a
//! shared queue, and fixed-size waves joined one after another. Workers
//! report result values; nothing but the operation itself touches the
//! filesystem while tiles run.

pub mod command;
pub mod operation;

use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use crate::error::{Error, Result};
use crate::grid::TileId;

pub use command::{CommandOperation, CommandSpec, ProcessOutcome};
pub use operation::{CopyOperation, TileJob, TileOperation};

/// How tiles are distributed over threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheduling {
    /// Workers pull the next tile as soon as they are free
    #[default]
    Pool,
    /// Batches of `concurrency` tiles, each fully joined before the next
    Waves,
}

/// Reaction to a failed tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Admit no new tile after the first failure
    #[default]
    FailFast,
    /// Run every tile and report all failures
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        })
    }
}

/// Outcome of one tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub tile: TileId,
    pub output: PathBuf,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl ProcessingResult {
    fn skipped(job: &TileJob, reason: impl Into<String>) -> Self {
        Self {
            tile: job.id(),
            output: job.output.clone(),
            status: TaskStatus::Skipped,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Deletes an output left by an earlier run
fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Three quarters of the available cores, at least one
pub fn default_concurrency() -> usize {
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    (cores * 3 / 4).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub scheduling: Scheduling,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            scheduling: Scheduling::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Runs a tile operation over many tiles on OS threads
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs every job and returns one result per job, sorted by tile id
    ///
    /// Jobs whose primary input, or an input the operation requires, is empty
    /// are skipped without calling the operation. Under fail-fast, jobs not
    /// yet started when a failure is observed are skipped as well; running
    /// jobs finish. A panicking operation fails its tile.
    pub fn run(&self, jobs: Vec<TileJob>, op: &dyn TileOperation) -> Vec<ProcessingResult> {
        let started = Instant::now();
        let total = jobs.len();
        let concurrency = self.config.concurrency.max(1);
        info!(
            tiles = total,
            concurrency,
            scheduling = ?self.config.scheduling,
            operation = op.name(),
            "processing tiles"
        );

        let required = op.required_layers();
        let mut runnable = Vec::with_capacity(total);
        let mut results = Vec::with_capacity(total);
        for job in jobs {
            match job.missing_layer(&required).map(str::to_string) {
                Some(layer) => {
                    debug!(tile = %job.id(), layer = %layer, "skipping tile without input");
                    results.push(ProcessingResult::skipped(
                        &job,
                        format!("layer '{}' has no data for this tile", layer),
                    ));
                }
                None => runnable.push(job),
            }
        }

        let abort = AtomicBool::new(false);
        results.extend(match self.config.scheduling {
            Scheduling::Pool => self.run_pool(runnable, op, concurrency, &abort),
            Scheduling::Waves => self.run_waves(runnable, op, concurrency, &abort),
        });
        results.sort_by_key(|r| r.tile);

        let failed = results.iter().filter(|r| r.status == TaskStatus::Failed).count();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            tiles = total,
            succeeded,
            failed,
            skipped = total - succeeded - failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tile processing finished"
        );
        results
    }

    /// Like [`run`](Self::run), but a failure under fail-fast becomes an error
    pub fn run_checked(&self, jobs: Vec<TileJob>, op: &dyn TileOperation) -> Result<Vec<ProcessingResult>> {
        let results = self.run(jobs, op);
        self.check_results(&results)?;
        Ok(results)
    }

    /// Under fail-fast, turns the first failed tile in id order into an error
    ///
    /// Under the continue policy failures are only logged.
    pub fn check_results(&self, results: &[ProcessingResult]) -> Result<()> {
        let mut failures = results.iter().filter(|r| r.status == TaskStatus::Failed);
        let Some(first) = failures.next() else {
            return Ok(());
        };
        match self.config.failure_policy {
            FailurePolicy::FailFast => Err(Error::Execution {
                tile: first.tile,
                message: first.error.clone().unwrap_or_default(),
            }),
            FailurePolicy::Continue => {
                warn!(failed = failures.count() + 1, "continuing without failed tiles");
                Ok(())
            }
        }
    }

    fn run_one(&self, job: &TileJob, op: &dyn TileOperation, abort: &AtomicBool) -> ProcessingResult {
        if self.config.failure_policy == FailurePolicy::FailFast && abort.load(Ordering::SeqCst) {
            return ProcessingResult::skipped(job, "not started after an earlier failure");
        }

        let started = Instant::now();
        let outcome = remove_stale(&job.output)
            .map_err(|e| Error::execution(job.id(), format!("cannot remove {}: {}", job.output.display(), e)))
            .and_then(|()| {
                panic::catch_unwind(AssertUnwindSafe(|| op.process(job)))
                    .unwrap_or_else(|_| Err(Error::execution(job.id(), "operation panicked")))
            });
        match outcome {
            Ok(()) => {
                debug!(tile = %job.id(), elapsed_ms = started.elapsed().as_millis() as u64, "tile done");
                ProcessingResult {
                    tile: job.id(),
                    output: job.output.clone(),
                    status: TaskStatus::Success,
                    error: None,
                }
            }
            Err(e) => {
                error!(tile = %job.id(), error = %e, "tile failed");
                abort.store(true, Ordering::SeqCst);
                let message = match e {
                    Error::Execution { message, .. } => message,
                    other => other.to_string(),
                };
                ProcessingResult {
                    tile: job.id(),
                    output: job.output.clone(),
                    status: TaskStatus::Failed,
                    error: Some(message),
                }
            }
        }
    }

    fn run_pool(
        &self,
        jobs: Vec<TileJob>,
        op: &dyn TileOperation,
        concurrency: usize,
        abort: &AtomicBool,
    ) -> Vec<ProcessingResult> {
        let workers = concurrency.min(jobs.len());
        let (job_tx, job_rx): (Sender<TileJob>, Receiver<TileJob>) = unbounded();
        let (result_tx, result_rx) = unbounded::<ProcessingResult>();
        for job in jobs {
            // The receiver is alive until the scope below ends
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if result_tx.send(self.run_one(&job, op, abort)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        result_rx.into_iter().collect()
    }

    fn run_waves(
        &self,
        jobs: Vec<TileJob>,
        op: &dyn TileOperation,
        concurrency: usize,
        abort: &AtomicBool,
    ) -> Vec<ProcessingResult> {
        let mut results = Vec::with_capacity(jobs.len());
        for (wave, batch) in jobs.chunks(concurrency).enumerate() {
            if self.config.failure_policy == FailurePolicy::FailFast && abort.load(Ordering::SeqCst) {
                results.extend(
                    batch
                        .iter()
                        .map(|job| ProcessingResult::skipped(job, "not started after an earlier failure")),
                );
                continue;
            }
            debug!(wave, tiles = batch.len(), "starting wave");
            // Tiles of one wave all start, whatever happens inside it
            let batch_results: Vec<ProcessingResult> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|job| scope.spawn(move || self.run_one(job, op, &AtomicBool::new(false))))
                    .collect();
                handles
                    .into_iter()
                    .zip(batch)
                    .map(|(handle, job)| {
                        handle.join().unwrap_or_else(|_| ProcessingResult {
                            tile: job.id(),
                            output: job.output.clone(),
                            status: TaskStatus::Failed,
                            error: Some("operation panicked".to_string()),
                        })
                    })
                    .collect()
            });
            if batch_results.iter().any(|r| r.status == TaskStatus::Failed) {
                abort.store(true, Ordering::SeqCst);
            }
            results.extend(batch_results);
        }
        results
    }
}
