//! Subtitle artifacts next to the source media.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::engine::SpeechModel;
use crate::error::{Error, Result};
use crate::types::Transcription;

/// `<dir>/<stem>_<lang>.srt` for a media file.
pub fn output_path(media: &Path, language: &str) -> PathBuf {
    let stem = media
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    media.with_file_name(format!("{stem}_{language}.srt"))
}

fn write_error(path: &Path, source: std::io::Error) -> Error {
    Error::OutputWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// Produce the final subtitle file for `media` and return its path.
///
/// The engine's writer gets the first go. A file it reports writing is
/// renamed into place, replacing any earlier target. Otherwise the SRT is
/// assembled from the segments and written over the target.
pub fn write_srt(
    model: &dyn SpeechModel,
    transcription: &Transcription,
    media: &Path,
) -> Result<PathBuf> {
    let target = output_path(media, &transcription.language);

    let native = match model.write_subtitles(transcription, media) {
        Ok(path) => path,
        Err(e @ Error::OutputWrite { .. }) => return Err(e),
        Err(e) => return Err(write_error(&target, std::io::Error::other(e.to_string()))),
    };

    match native {
        Some(native) if native != target => {
            debug!(from = %native.display(), to = %target.display(), "renaming subtitle file");
            fs::rename(&native, &target).map_err(|e| write_error(&target, e))?;
        }
        Some(_) => {}
        None => {
            fs::write(&target, transcription.to_srt()).map_err(|e| write_error(&target, e))?;
        }
    }

    info!(path = %target.display(), segments = transcription.segments.len(), "subtitles written");
    Ok(target)
}

/// First `lines` text lines of an SRT file, newline-joined.
///
/// Cue numbers, timing lines and blanks are skipped. Returns `None` when the
/// file cannot be read.
pub fn preview(path: &Path, lines: usize) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let text: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.contains("-->"))
        .filter(|l| !l.chars().all(|c| c.is_ascii_digit()))
        .take(lines)
        .collect();
    Some(text.join("\n"))
}
