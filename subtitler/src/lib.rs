//! Batch subtitle generation for media libraries.
//!
//! **subtitler** takes batches of media files from connected clients, runs
//! them through a speech-to-text engine under a global concurrency limit and
//! writes `<stem>_<lang>.srt` next to each file. Clients follow progress over
//! a push channel and can stop their batch at any time.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use subtitler::*;
//! # #[tokio::main]
//! # async fn main() {
//! let config = RunnerConfig::default();
//! let connections = Arc::new(ConnectionRegistry::new(config.cancel_wait));
//! let jobs = Arc::new(JobRegistry::new(config.job_retention));
//! let runner = Arc::new(BatchRunner::new(
//!     config,
//!     Arc::new(UnavailableEngine),
//!     connections,
//!     jobs,
//! ));
//!
//! let ticket = runner.submit(BatchRequest {
//!     client_id: "client-1".into(),
//!     files: vec!["/media/show/ep1.mkv".into()],
//!     model: ModelSize::Base,
//!     language: Language::Auto,
//! });
//! println!("started {} job(s)", ticket.job_ids.len());
//! # }
//! ```
//!
//! Build with the `whisper` feature to get [`WhisperEngine`], backed by
//! whisper.cpp.

#[cfg(feature = "whisper")]
pub(crate) mod audio;
pub mod batch;
pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod model;
pub mod notify;
pub mod subtitle;
pub mod types;
pub mod unit;

#[cfg(test)]
mod test_support;

pub use batch::{BatchRequest, BatchRunner, BatchTicket};
pub use config::{Language, ModelSize, RunnerConfig, WhisperOptions};
pub use connections::{CancelOutcome, ConnectionRegistry, TrackedTask};
#[cfg(feature = "whisper")]
pub use engine::WhisperEngine;
pub use engine::{Progress, SpeechModel, TranscriptionEngine, UnavailableEngine};
pub use error::{Error, Result};
pub use jobs::{ActionResult, Job, JobAction, JobRegistry, JobStatus, NewJob};
pub use notify::{
    BatchSummary, ClientMessage, LogLevel, LogLine, Notification, NotificationChannel,
    StatusUpdate, UnitStatus, CLOSE_POLICY_VIOLATION,
};
pub use types::{Segment, Transcription};
pub use unit::{BatchFile, FileOutcome, FileProcessor, OutcomeStatus};
