//! In-memory job registry.
//!
//! One [`Job`] per submitted file. The registry is a plain data store behind a
//! single mutex; finished jobs expire lazily when the full list is read.
//! Every mutator on an unknown id is a no-op, since the job may simply have
//! expired or been deleted in the meantime.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Language, ModelSize};

/// Status of a job as shown in the job list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Paused,
    Done,
    Skipped,
    Error,
    Cancelled,
    Stopped,
}

impl JobStatus {
    /// Terminal statuses carry a completion timestamp and are subject to expiry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done
                | JobStatus::Skipped
                | JobStatus::Error
                | JobStatus::Cancelled
                | JobStatus::Stopped
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub filename: String,
    pub language: Language,
    pub model: ModelSize,
    pub progress: u8,
    pub status: JobStatus,
    pub log: String,
    pub client_id: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything needed to register a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub filename: String,
    pub language: Language,
    pub model: ModelSize,
    pub client_id: String,
    pub file_path: PathBuf,
}

impl NewJob {
    /// Build a submission for a media file, deriving the display name from the path.
    pub fn for_file(
        file_path: impl Into<PathBuf>,
        client_id: impl Into<String>,
        model: ModelSize,
        language: Language,
    ) -> Self {
        let file_path = file_path.into();
        let filename = file_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string_lossy().into_owned());
        Self {
            filename,
            language,
            model,
            client_id: client_id.into(),
            file_path,
        }
    }
}

/// User-requested job actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Pause,
    Resume,
    Stop,
    Delete,
}

#[derive(Debug, Clone)]
pub enum ActionResult {
    Updated(Job),
    Deleted,
    NotFound,
}

pub struct JobRegistry {
    jobs: Mutex<Vec<Job>>,
    retention: chrono::Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_job<R>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut jobs = self.lock();
        match jobs.iter_mut().find(|j| j.id == job_id) {
            Some(job) => Some(f(job)),
            None => {
                warn!(job_id, "job not found, ignoring");
                None
            }
        }
    }

    /// Register a job in `queued` state and return its id.
    pub fn submit(&self, new: NewJob) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            filename: new.filename,
            language: new.language,
            model: new.model,
            progress: 0,
            status: JobStatus::Queued,
            log: String::new(),
            client_id: new.client_id,
            file_path: new.file_path,
            created_at: Utc::now(),
            completed_at: None,
        };
        debug!(job_id = %id, file = %job.file_path.display(), "job submitted");
        self.lock().push(job);
        id
    }

    /// All live jobs in submission order. Expired jobs are purged first.
    pub fn list_all(&self) -> Vec<Job> {
        self.list_all_at(Utc::now())
    }

    fn list_all_at(&self, now: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.lock();
        let before = jobs.len();
        let retention = self.retention;
        jobs.retain(|job| match job.completed_at {
            Some(done) => now.signed_duration_since(done) <= retention,
            None => true,
        });
        let purged = before - jobs.len();
        if purged > 0 {
            info!(purged, "expired finished jobs");
        }
        jobs.clone()
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.lock().iter().find(|j| j.id == job_id).cloned()
    }

    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        self.set_status_at(job_id, status, Utc::now());
    }

    fn set_status_at(&self, job_id: &str, status: JobStatus, now: DateTime<Utc>) {
        self.with_job(job_id, |job| {
            job.status = status;
            job.completed_at = status.is_terminal().then_some(now);
        });
    }

    pub fn set_progress(&self, job_id: &str, percent: u8) {
        self.with_job(job_id, |job| job.progress = percent.min(100));
    }

    pub fn append_log(&self, job_id: &str, line: &str) {
        self.with_job(job_id, |job| {
            job.log.push_str(line);
            job.log.push('\n');
        });
    }

    /// Remove a job. Removing an unknown id does nothing.
    pub fn remove(&self, job_id: &str) -> bool {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != job_id);
        jobs.len() != before
    }

    pub fn client_of(&self, job_id: &str) -> Option<String> {
        self.with_job(job_id, |job| job.client_id.clone())
    }

    pub fn path_of(&self, job_id: &str) -> Option<PathBuf> {
        self.with_job(job_id, |job| job.file_path.clone())
    }

    pub fn jobs_for_client(&self, client_id: &str) -> Vec<Job> {
        self.lock()
            .iter()
            .filter(|j| j.client_id == client_id)
            .cloned()
            .collect()
    }

    /// Apply a user action from the job list.
    pub fn apply_action(&self, job_id: &str, action: JobAction) -> ActionResult {
        match action {
            JobAction::Delete => {
                if self.remove(job_id) {
                    info!(job_id, "job deleted");
                    ActionResult::Deleted
                } else {
                    ActionResult::NotFound
                }
            }
            JobAction::Pause => self.update_for_action(job_id, JobStatus::Paused, None),
            JobAction::Resume => self.update_for_action(job_id, JobStatus::Processing, None),
            JobAction::Stop => self.update_for_action(job_id, JobStatus::Stopped, Some(0)),
        }
    }

    fn update_for_action(&self, job_id: &str, status: JobStatus, progress: Option<u8>) -> ActionResult {
        let now = Utc::now();
        let updated = self.with_job(job_id, |job| {
            job.status = status;
            job.completed_at = status.is_terminal().then_some(now);
            if let Some(p) = progress {
                job.progress = p;
            }
            job.clone()
        });
        match updated {
            Some(job) => ActionResult::Updated(job),
            None => ActionResult::NotFound,
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(crate::config::RunnerConfig::default().job_retention)
    }
}
