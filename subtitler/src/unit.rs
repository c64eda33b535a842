//! Processing of a single media file.
//!
//! A unit waits for a model slot, loads the model, transcribes, gates on
//! language and writes the subtitle file. Whatever happens, it ends in exactly
//! one terminal status update and returns a [`FileOutcome`]; errors never
//! escape to the batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Language, ModelSize};
use crate::connections::ConnectionRegistry;
use crate::engine::{Progress, TranscriptionEngine};
use crate::error::{Error, Result};
use crate::jobs::{JobRegistry, JobStatus};
use crate::notify::{LogLevel, LogLine, Notification, StatusUpdate, UnitStatus};
use crate::subtitle;

/// One file of a batch, optionally linked to a job-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub file_path: PathBuf,
    pub job_id: Option<String>,
}

impl BatchFile {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            job_id: None,
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Skipped,
    Error,
    Cancelled,
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub file_path: PathBuf,
    pub status: OutcomeStatus,
    pub message: String,
    pub language: Option<String>,
    pub output_path: Option<PathBuf>,
    /// Seconds spent holding the transcription slot.
    pub processing_time: Option<f64>,
    pub subtitle_preview: Option<String>,
}

impl FileOutcome {
    pub(crate) fn new(file_path: PathBuf, status: OutcomeStatus, message: impl Into<String>) -> Self {
        Self {
            file_path,
            status,
            message: message.into(),
            language: None,
            output_path: None,
            processing_time: None,
            subtitle_preview: None,
        }
    }
}

/// Progress band while transcribing: 10% at the start, 90% when every segment is in.
pub fn transcription_percent(current: usize, total: usize) -> u8 {
    let pct = 10 + 80 * current.min(total.max(1)) / total.max(1);
    pct.min(90) as u8
}

fn checkpoint(token: &CancellationToken, stage: &str) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled(stage.to_string()))
    } else {
        Ok(())
    }
}

fn job_status(status: UnitStatus) -> JobStatus {
    match status {
        UnitStatus::Waiting => JobStatus::Queued,
        UnitStatus::LoadingModel
        | UnitStatus::Transcribing
        | UnitStatus::LanguageCheck
        | UnitStatus::WritingOutput => JobStatus::Processing,
        UnitStatus::Completed => JobStatus::Done,
        UnitStatus::Skipped => JobStatus::Skipped,
        UnitStatus::Cancelled => JobStatus::Cancelled,
        UnitStatus::Error => JobStatus::Error,
    }
}

/// Sends a unit's messages to its client and mirrors them into the job list.
struct Reporter {
    connections: Arc<ConnectionRegistry>,
    jobs: Arc<JobRegistry>,
    client_id: String,
    file_path: String,
    job_id: Option<String>,
    percent: u8,
}

impl Reporter {
    async fn status(&mut self, update: StatusUpdate) {
        self.percent = update.progress_percent;
        if let Some(job_id) = &self.job_id {
            self.jobs.set_status(job_id, job_status(update.status));
            self.jobs.set_progress(job_id, update.progress_percent);
        }
        self.connections
            .send(Notification::StatusUpdate(update), &self.client_id)
            .await;
    }

    async fn update(&mut self, status: UnitStatus, message: impl Into<String>, percent: u8) {
        let update = StatusUpdate::new(self.file_path.clone(), status, message, percent);
        self.status(update).await;
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        if let Some(job_id) = &self.job_id {
            self.jobs.append_log(job_id, &message);
        }
        let line = LogLine {
            file_path: self.file_path.clone(),
            level,
            message,
            progress_percent: self.percent,
        };
        self.connections
            .send(Notification::Log(line), &self.client_id)
            .await;
    }
}

/// Everything a unit needs, shared by all units of all batches.
#[derive(Clone)]
pub struct FileProcessor {
    engine: Arc<dyn TranscriptionEngine>,
    slot: Arc<Semaphore>,
    connections: Arc<ConnectionRegistry>,
    jobs: Arc<JobRegistry>,
    preview_lines: usize,
}

impl FileProcessor {
    pub fn new(
        engine: Arc<dyn TranscriptionEngine>,
        slot: Arc<Semaphore>,
        connections: Arc<ConnectionRegistry>,
        jobs: Arc<JobRegistry>,
        preview_lines: usize,
    ) -> Self {
        Self {
            engine,
            slot,
            connections,
            jobs,
            preview_lines,
        }
    }

    /// Run one file to a terminal outcome.
    pub async fn process(
        &self,
        client_id: &str,
        file: &BatchFile,
        model: ModelSize,
        language: &Language,
        token: &CancellationToken,
    ) -> FileOutcome {
        let mut report = Reporter {
            connections: self.connections.clone(),
            jobs: self.jobs.clone(),
            client_id: client_id.to_string(),
            file_path: file.file_path.to_string_lossy().into_owned(),
            job_id: file.job_id.clone(),
            percent: 0,
        };

        match self.run(&mut report, file, model, language, token).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                info!(client_id, file = %report.file_path, "{e}");
                let percent = report.percent;
                report
                    .update(UnitStatus::Cancelled, "Cancelled", percent)
                    .await;
                FileOutcome::new(file.file_path.clone(), OutcomeStatus::Cancelled, e.to_string())
            }
            Err(e) => {
                error!(client_id, file = %report.file_path, error = %e, "transcription failed");
                let percent = report.percent;
                report.update(UnitStatus::Error, e.to_string(), percent).await;
                FileOutcome::new(file.file_path.clone(), OutcomeStatus::Error, e.to_string())
            }
        }
    }

    async fn run(
        &self,
        report: &mut Reporter,
        file: &BatchFile,
        model: ModelSize,
        language: &Language,
        token: &CancellationToken,
    ) -> Result<FileOutcome> {
        report
            .update(UnitStatus::Waiting, "Waiting for a transcription slot", 0)
            .await;

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(Error::Cancelled("while waiting for a transcription slot".into()));
            }
            permit = self.slot.clone().acquire_owned() => {
                permit.map_err(|_| Error::Worker("transcription slot closed".into()))?
            }
        };
        checkpoint(token, "after acquiring a transcription slot")?;
        let started = Instant::now();
        debug!(file = %report.file_path, "transcription slot acquired");

        // --- Model --- //

        report
            .update(UnitStatus::LoadingModel, format!("Loading {model} model"), 5)
            .await;
        report
            .log(LogLevel::Info, format!("Loading whisper model ({model})"))
            .await;

        let engine = self.engine.clone();
        let speech = tokio::task::spawn_blocking(move || engine.load_model(model)).await??;
        checkpoint(token, "after loading the model")?;
        report
            .log(LogLevel::Info, format!("Whisper model loaded ({model})"))
            .await;

        // --- Transcription --- //

        report
            .update(UnitStatus::Transcribing, "Transcribing and detecting language", 10)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, usize)>();
        let media = file.file_path.clone();
        let requested = language.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let on_progress: Progress = Arc::new(move |current: usize, total: usize| {
                let _ = tx.send((current, total));
            });
            let result = speech.transcribe(&media, &requested, on_progress);
            (speech, result)
        });

        while let Some((current, total)) = rx.recv().await {
            let percent = transcription_percent(current, total);
            report
                .update(
                    UnitStatus::Transcribing,
                    format!("Transcribing ({current}/{total})"),
                    percent,
                )
                .await;
            report
                .log(LogLevel::Info, format!("Transcription progress {current}/{total}"))
                .await;
        }

        let (speech, result) = handle.await?;
        let transcription = result?;
        checkpoint(token, "after transcription")?;

        // --- Language gate --- //

        let detected = transcription.language.clone();
        report
            .update(
                UnitStatus::LanguageCheck,
                format!("Detected language: {detected}"),
                90,
            )
            .await;
        report
            .log(LogLevel::Info, format!("Detected language: {detected}"))
            .await;

        if language.requires_english() && !transcription.is_english() {
            let message = format!("Skipped (language: {detected})");
            warn!(file = %report.file_path, language = %detected, "not English, skipping");
            report.log(LogLevel::Warning, message.clone()).await;

            let mut update =
                StatusUpdate::new(report.file_path.clone(), UnitStatus::Skipped, &message, 100);
            update.language = Some(detected.clone());
            report.status(update).await;

            let mut outcome = FileOutcome::new(file.file_path.clone(), OutcomeStatus::Skipped, message);
            outcome.language = Some(detected);
            return Ok(outcome);
        }

        // --- Output --- //

        checkpoint(token, "before writing subtitles")?;
        report
            .update(UnitStatus::WritingOutput, "Writing subtitle file", 95)
            .await;

        let media = file.file_path.clone();
        let preview_lines = self.preview_lines;
        let (output, preview) = tokio::task::spawn_blocking(move || {
            let output = subtitle::write_srt(speech.as_ref(), &transcription, &media)?;
            let preview = subtitle::preview(&output, preview_lines);
            Ok::<_, Error>((output, preview))
        })
        .await??;

        checkpoint(token, "before completion")?;

        let elapsed = started.elapsed().as_secs_f64();
        let mut update = StatusUpdate::new(
            report.file_path.clone(),
            UnitStatus::Completed,
            "Completed",
            100,
        );
        update.language = Some(detected.clone());
        update.output_path = Some(output.to_string_lossy().into_owned());
        update.subtitle_preview = preview.clone();
        update.processing_time = Some(elapsed);
        report.status(update).await;
        report
            .log(LogLevel::Info, format!("Subtitles saved to {}", output.display()))
            .await;

        info!(
            file = %report.file_path,
            output = %output.display(),
            language = %detected,
            elapsed_secs = elapsed,
            "file completed"
        );

        let mut outcome = FileOutcome::new(file.file_path.clone(), OutcomeStatus::Completed, "Completed");
        outcome.language = Some(detected);
        outcome.output_path = Some(output);
        outcome.processing_time = Some(elapsed);
        outcome.subtitle_preview = preview;
        Ok(outcome)
    }
}
