//! Fakes shared by the unit and batch tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Language, ModelSize};
use crate::engine::{Progress, SpeechModel, TranscriptionEngine};
use crate::error::{Error, Result};
use crate::notify::{Notification, NotificationChannel, StatusUpdate, UnitStatus};
use crate::types::{Segment, Transcription};

/// Channel that records everything sent over it.
#[derive(Default)]
pub struct RecordingChannel {
    messages: Mutex<Vec<Notification>>,
    accepted: Mutex<bool>,
    closed: Mutex<Option<u16>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A channel whose sends and closes all fail.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn messages(&self) -> Vec<Notification> {
        self.messages.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> bool {
        *self.accepted.lock().unwrap()
    }

    pub fn closed_with(&self) -> Option<u16> {
        *self.closed.lock().unwrap()
    }

    /// Status updates for one file, in order.
    pub fn statuses_for(&self, file: &str) -> Vec<StatusUpdate> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Notification::StatusUpdate(u) if u.file_path == file => Some(u),
                _ => None,
            })
            .collect()
    }

    pub fn status_kinds_for(&self, file: &str) -> Vec<UnitStatus> {
        self.statuses_for(file).into_iter().map(|u| u.status).collect()
    }

    /// Poll until a recorded message matches, or give up after five seconds.
    pub async fn wait_for(&self, pred: impl Fn(&Notification) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.messages().iter().any(&pred) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected message never arrived: {:?}", self.messages());
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn accept(&self) -> Result<()> {
        *self.accepted.lock().unwrap() = true;
        Ok(())
    }

    async fn send(&self, message: &Notification) -> Result<()> {
        if self.fail {
            return Err(Error::Channel("peer went away".into()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&self, code: u16) -> Result<()> {
        *self.closed.lock().unwrap() = Some(code);
        if self.fail {
            return Err(Error::Channel("already closed".into()));
        }
        Ok(())
    }
}

/// Scripted engine. Every model it loads returns the same transcription.
#[derive(Clone)]
pub struct FakeEngine {
    pub language: String,
    pub segments: Vec<Segment>,
    pub load_delay: Duration,
    pub transcribe_delay: Duration,
    pub fail_load: bool,
    pub fail_transcribe: bool,
    /// Write `<stem>.srt` through the model's own writer.
    pub native_writer: bool,
    pub(crate) running: Arc<AtomicUsize>,
    pub(crate) peak: Arc<AtomicUsize>,
    pub(crate) loads: Arc<AtomicUsize>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            language: "en".into(),
            segments: vec![
                Segment::new(0.0, 1.0, "First line."),
                Segment::new(1.0, 2.0, "Second line."),
                Segment::new(2.0, 3.0, "Third line."),
                Segment::new(3.0, 4.0, "Fourth line."),
            ],
            load_delay: Duration::ZERO,
            transcribe_delay: Duration::ZERO,
            fail_load: false,
            fail_transcribe: false,
            native_writer: false,
            running: Arc::default(),
            peak: Arc::default(),
            loads: Arc::default(),
        }
    }
}

impl FakeEngine {
    pub fn detecting(language: &str) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    /// Highest number of transcriptions that ran at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TranscriptionEngine for FakeEngine {
    fn load_model(&self, _size: ModelSize) -> Result<Box<dyn SpeechModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);
        if self.fail_load {
            return Err(Error::Model("weights are corrupt".into()));
        }
        Ok(Box::new(FakeModel(self.clone())))
    }
}

struct FakeModel(FakeEngine);

impl SpeechModel for FakeModel {
    fn transcribe(
        &self,
        _path: &Path,
        language: &Language,
        progress: Progress,
    ) -> Result<Transcription> {
        let engine = &self.0;
        let now = engine.running.fetch_add(1, Ordering::SeqCst) + 1;
        engine.peak.fetch_max(now, Ordering::SeqCst);

        let total = engine.segments.len();
        let step = engine.transcribe_delay / total.max(1) as u32;
        for i in 0..total {
            std::thread::sleep(step);
            progress(i + 1, total);
        }
        engine.running.fetch_sub(1, Ordering::SeqCst);

        if engine.fail_transcribe {
            return Err(Error::Transcription("decoder exploded".into()));
        }

        Ok(Transcription {
            segments: engine.segments.clone(),
            language: language.code().unwrap_or(&engine.language).to_string(),
            duration: total as f64,
        })
    }

    fn write_subtitles(&self, transcription: &Transcription, media: &Path) -> Result<Option<PathBuf>> {
        if !self.0.native_writer {
            return Ok(None);
        }
        let path = media.with_extension("srt");
        std::fs::write(&path, transcription.to_srt())?;
        Ok(Some(path))
    }
}
