//! Speech-to-text engines.
//!
//! The batch runner only sees the two traits here. Both are synchronous and
//! are always driven from tokio's blocking pool, so implementations are free
//! to block for as long as a model load or a transcription takes.

#[cfg(feature = "whisper")]
mod whisper;

#[cfg(feature = "whisper")]
pub use whisper::WhisperEngine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Language, ModelSize};
use crate::error::{Error, Result};
use crate::types::Transcription;

/// Progress sink handed to [`SpeechModel::transcribe`], called with
/// `(current, total)`.
pub type Progress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Loads models. One engine is shared by every unit in the process.
pub trait TranscriptionEngine: Send + Sync + 'static {
    fn load_model(&self, size: ModelSize) -> Result<Box<dyn SpeechModel>>;
}

/// A loaded model, owned by a single unit for the length of one file.
pub trait SpeechModel: Send {
    /// Transcribe a media file.
    ///
    /// `progress` is called with `(current, total)` while decoding runs, not
    /// only once it is over. It may be called from any thread.
    fn transcribe(
        &self,
        path: &Path,
        language: &Language,
        progress: Progress,
    ) -> Result<Transcription>;

    /// Optional library-native subtitle writer.
    ///
    /// Implementations that have one write `<stem>.srt` next to the media
    /// file and return its path. The default writes nothing.
    fn write_subtitles(&self, _transcription: &Transcription, _media: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Engine used when the crate is built without a speech backend.
///
/// Every load fails, so each unit ends in `error` with a message telling the
/// operator how to rebuild.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEngine;

impl TranscriptionEngine for UnavailableEngine {
    fn load_model(&self, _size: ModelSize) -> Result<Box<dyn SpeechModel>> {
        Err(Error::EngineUnavailable)
    }
}
