//! Batches of files submitted by one client.
//!
//! Every file of a batch runs as its own task. The shared semaphore inside
//! [`FileProcessor`] is the only thing limiting how many transcribe at once,
//! so files from different clients compete for the same slots.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Language, ModelSize, RunnerConfig};
use crate::connections::{ConnectionRegistry, TrackedTask};
use crate::engine::TranscriptionEngine;
use crate::jobs::{JobRegistry, JobStatus, NewJob};
use crate::notify::{BatchSummary, Notification, StatusUpdate, UnitStatus};
use crate::unit::{BatchFile, FileOutcome, FileProcessor, OutcomeStatus};

/// A client's request to transcribe a set of files.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub client_id: String,
    pub files: Vec<PathBuf>,
    pub model: ModelSize,
    pub language: Language,
}

/// Returned by [`BatchRunner::submit`].
#[derive(Debug, Clone)]
pub struct BatchTicket {
    pub client_id: String,
    pub task_id: String,
    /// One job per submitted file, in submission order.
    pub job_ids: Vec<String>,
}

/// Clears the client's task entry when the batch exits, panics included.
struct Deregister {
    connections: Arc<ConnectionRegistry>,
    client_id: String,
    task_id: String,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.connections.finish_task(&self.client_id, &self.task_id);
    }
}

pub struct BatchRunner {
    processor: FileProcessor,
    connections: Arc<ConnectionRegistry>,
    jobs: Arc<JobRegistry>,
}

impl BatchRunner {
    pub fn new(
        config: RunnerConfig,
        engine: Arc<dyn TranscriptionEngine>,
        connections: Arc<ConnectionRegistry>,
        jobs: Arc<JobRegistry>,
    ) -> Self {
        let slot = Arc::new(Semaphore::new(config.max_concurrent_transcriptions.max(1)));
        let processor = FileProcessor::new(
            engine,
            slot,
            connections.clone(),
            jobs.clone(),
            config.preview_lines,
        );
        Self {
            processor,
            connections,
            jobs,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// Process every file and report the tally.
    ///
    /// Units are independent: one failing or being cancelled never stops the
    /// others. The batch waits for all of them before sending its summary.
    pub async fn run_batch(
        &self,
        client_id: &str,
        files: Vec<BatchFile>,
        model: ModelSize,
        language: &Language,
        token: CancellationToken,
    ) -> BatchSummary {
        let total_files = files.len();
        info!(client_id, total_files, %model, %language, "batch started");
        self.connections
            .send(Notification::BatchStart { total_files }, client_id)
            .await;

        let units = files.into_iter().map(|file| {
            let processor = self.processor.clone();
            let unit_client = client_id.to_string();
            let unit_language = language.clone();
            let unit_token = token.child_token();
            let unit_file = file.clone();
            let handle = tokio::spawn(async move {
                processor
                    .process(&unit_client, &unit_file, model, &unit_language, &unit_token)
                    .await
            });
            async move { (file, handle.await) }
        });

        let mut summary = BatchSummary {
            total_files,
            ..BatchSummary::default()
        };

        for (file, joined) in join_all(units).await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    error!(client_id, file = %file.file_path.display(), "unit panicked");
                    self.report_lost_unit(client_id, &file, UnitStatus::Error, "Worker panicked")
                        .await;
                    FileOutcome::new(file.file_path.clone(), OutcomeStatus::Error, "worker panicked")
                }
                Err(_) => {
                    warn!(client_id, file = %file.file_path.display(), "unit aborted");
                    self.report_lost_unit(client_id, &file, UnitStatus::Cancelled, "Cancelled")
                        .await;
                    FileOutcome::new(file.file_path.clone(), OutcomeStatus::Cancelled, "aborted")
                }
            };
            match outcome.status {
                OutcomeStatus::Completed => summary.completed_count += 1,
                OutcomeStatus::Skipped => summary.skipped_count += 1,
                OutcomeStatus::Error => summary.error_count += 1,
                OutcomeStatus::Cancelled => summary.cancelled_count += 1,
            }
        }

        let cancelled = token.is_cancelled();
        info!(
            client_id,
            total_files,
            completed = summary.completed_count,
            skipped = summary.skipped_count,
            errors = summary.error_count,
            cancelled_units = summary.cancelled_count,
            batch_cancelled = cancelled,
            "batch finished"
        );

        let message = if cancelled {
            Notification::BatchCancelled(summary)
        } else {
            Notification::BatchComplete(summary)
        };
        self.connections.send(message, client_id).await;
        summary
    }

    /// A unit that died without reporting still owes its client a terminal status.
    async fn report_lost_unit(
        &self,
        client_id: &str,
        file: &BatchFile,
        status: UnitStatus,
        message: &str,
    ) {
        if let Some(job_id) = &file.job_id {
            let job_status = match status {
                UnitStatus::Cancelled => JobStatus::Cancelled,
                _ => JobStatus::Error,
            };
            self.jobs.set_status(job_id, job_status);
        }
        let update = StatusUpdate::new(file.file_path.to_string_lossy(), status, message, 0);
        self.connections
            .send(Notification::StatusUpdate(update), client_id)
            .await;
    }

    /// Register jobs for a request and start its batch in the background.
    ///
    /// The batch is tracked under the client id, replacing (and cancelling)
    /// any batch the client still had running.
    pub fn submit(self: &Arc<Self>, request: BatchRequest) -> BatchTicket {
        let BatchRequest {
            client_id,
            files,
            model,
            language,
        } = request;

        let files: Vec<BatchFile> = files
            .into_iter()
            .map(|path| {
                let job_id = self.jobs.submit(NewJob::for_file(
                    &path,
                    &client_id,
                    model,
                    language.clone(),
                ));
                BatchFile::new(path).with_job(job_id)
            })
            .collect();
        let job_ids = files.iter().filter_map(|f| f.job_id.clone()).collect();

        let token = CancellationToken::new();
        let (registered_tx, registered_rx) = oneshot::channel::<String>();

        let runner = Arc::clone(self);
        let batch_client = client_id.clone();
        let batch_token = token.clone();
        let task = TrackedTask::spawn(token, async move {
            // Never start, and so never deregister, before being registered.
            let Ok(task_id) = registered_rx.await else {
                return;
            };
            let _guard = Deregister {
                connections: runner.connections.clone(),
                client_id: batch_client.clone(),
                task_id,
            };
            runner
                .run_batch(&batch_client, files, model, &language, batch_token)
                .await;
        });

        let task_id = task.id().to_string();
        self.connections.register_task(&client_id, task);
        let _ = registered_tx.send(task_id.clone());

        BatchTicket {
            client_id,
            task_id,
            job_ids,
        }
    }
}
