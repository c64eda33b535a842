use std::path::PathBuf;

/// All errors that can occur in subtitler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("model error: {0}")]
    Model(String),

    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[error("unknown model size: \"{0}\"; use ModelSize::all() to list valid sizes")]
    UnknownModel(String),

    #[error("audio decoding error: {0}")]
    AudioDecode(String),

    #[error("audio file not found: {path}")]
    AudioNotFound { path: PathBuf },

    #[error("unsupported language: \"{0}\"")]
    UnsupportedLanguage(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("transcription engine unavailable, rebuild with the \"whisper\" feature")]
    EngineUnavailable,

    #[cfg(feature = "whisper")]
    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),

    #[error("cancelled {0}")]
    Cancelled(String),

    #[error("failed to write subtitle file {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notification channel error: {0}")]
    Channel(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Error::Cancelled("by runtime shutdown".into())
        } else {
            Error::Worker(format!("blocking task panicked: {e}"))
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_model() {
        let e = Error::Model("bad model".into());
        assert_eq!(e.to_string(), "model error: bad model");
    }

    #[test]
    fn test_error_display_unknown_model() {
        let e = Error::UnknownModel("gigantic".into());
        let msg = e.to_string();
        assert!(msg.contains("gigantic"));
        assert!(msg.contains("ModelSize::all()"));
    }

    #[test]
    fn test_error_display_output_write() {
        let e = Error::OutputWrite {
            path: PathBuf::from("/media/show/ep1_en.srt"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        let msg = e.to_string();
        assert!(msg.contains("ep1_en.srt"));
        assert!(msg.contains("read-only"));
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(Error::Cancelled("after model load".into()).is_cancelled());
        assert!(!Error::Transcription("boom".into()).is_cancelled());
        assert_eq!(
            Error::Cancelled("after model load".into()).to_string(),
            "cancelled after model load"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let e: Error = json_err.into();
        assert!(matches!(e, Error::Json(_)));
    }

    #[tokio::test]
    async fn test_error_from_panicked_join() {
        let handle = tokio::spawn(async { panic!("kaboom") });
        let e: Error = handle.await.unwrap_err().into();
        assert!(matches!(e, Error::Worker(_)));
    }
}
