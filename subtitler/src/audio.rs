//! Media decoding through the `ffmpeg` binary.

use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Output};

use tracing::debug;

use crate::error::{Error, Result};

/// Sample rate whisper.cpp expects.
pub(crate) const SAMPLE_RATE: u32 = 16_000;

/// Longest input accepted, in samples (eight hours of audio).
const MAX_SAMPLES: usize = 8 * 3600 * SAMPLE_RATE as usize;

/// Audio track of `path` as mono 16 kHz samples in `[-1.0, 1.0)`.
///
/// Any container ffmpeg understands works; video streams are ignored.
pub fn decode(path: &Path) -> Result<Vec<f32>> {
    if !path.is_file() {
        return Err(Error::AudioNotFound {
            path: path.to_path_buf(),
        });
    }

    let pcm = run_ffmpeg(path)?;
    let samples = pcm_to_samples(&pcm);
    debug!(
        path = %path.display(),
        seconds = samples.len() / SAMPLE_RATE as usize,
        "audio decoded"
    );

    if samples.len() > MAX_SAMPLES {
        return Err(Error::AudioDecode(format!(
            "{} is longer than {} hours",
            path.display(),
            MAX_SAMPLES / (3600 * SAMPLE_RATE as usize)
        )));
    }
    Ok(samples)
}

fn run_ffmpeg(path: &Path) -> Result<Vec<u8>> {
    let rate = SAMPLE_RATE.to_string();
    let Output { status, stdout, stderr } = Command::new("ffmpeg")
        .args(["-nostdin", "-loglevel", "error", "-i"])
        .arg(path)
        .args(["-vn", "-ac", "1", "-ar", &rate, "-f", "s16le", "-"])
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::AudioDecode("ffmpeg is not installed or not on PATH".into()),
            _ => Error::AudioDecode(format!("cannot start ffmpeg: {e}")),
        })?;

    if !status.success() {
        let reason = String::from_utf8_lossy(&stderr);
        return Err(Error::AudioDecode(format!("ffmpeg exited with {status}: {}", reason.trim())));
    }
    if stdout.is_empty() {
        return Err(Error::AudioDecode(format!("{} has no audio track", path.display())));
    }
    Ok(stdout)
}

/// Little-endian signed 16-bit PCM to floats. A trailing odd byte is dropped.
fn pcm_to_samples(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}
