//! Local cache of ggml whisper models.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::ModelSize;
use crate::error::{Error, Result};

const MODEL_REPO: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Smallest published model is ~75 MB; below this the server sent an error page.
const MIN_MODEL_BYTES: u64 = 1_000_000;

/// A directory of `ggml-*.bin` files.
#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `size` lives once fetched.
    pub fn path_for(&self, size: ModelSize) -> PathBuf {
        self.dir.join(size.filename())
    }

    /// Complete model files in the cache, sorted by name. Partial downloads
    /// are not listed.
    pub fn cached(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "bin"))
            .collect();
        found.sort();
        found
    }

    /// Path to `size`, downloading it first when it is not cached yet.
    pub async fn fetch(&self, size: ModelSize) -> Result<PathBuf> {
        let dest = self.path_for(size);
        if dest.is_file() {
            debug!(path = %dest.display(), "model cache hit");
            return Ok(dest);
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Model(format!("cannot create model cache {}: {e}", self.dir.display()))
        })?;

        let url = model_url(size);
        info!(%url, model = %size, "fetching model");
        download(&url, &dest).await?;
        Ok(dest)
    }
}

/// Download URL for a model size.
pub fn model_url(size: ModelSize) -> String {
    format!("{MODEL_REPO}/{}", size.filename())
}

fn progress_bar(len: u64, dest: &Path) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    let name = dest
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    bar.set_message(name);
    bar
}

/// Stream `url` into `<dest>.part`, then move it over `dest` once it looks
/// like a model.
async fn download(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await?
        .error_for_status()
        .map_err(|e| Error::ModelDownload(e.to_string()))?;
    let expected = response.content_length();

    let partial = dest.with_extension("bin.part");
    let bar = progress_bar(expected.unwrap_or(0), dest);
    let mut out = File::create(&partial)?;
    let mut written: u64 = 0;

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        out.write_all(&chunk)?;
        written += chunk.len() as u64;
        bar.set_position(written);
    }
    out.sync_all()?;
    drop(out);
    bar.finish_and_clear();

    if written < MIN_MODEL_BYTES {
        let _ = fs::remove_file(&partial);
        return Err(Error::ModelDownload(format!(
            "{url} returned only {written} bytes"
        )));
    }
    if let Some(expected) = expected.filter(|&n| n != written) {
        warn!(expected, written, "model size differs from Content-Length");
    }

    fs::rename(&partial, dest)?;
    info!(path = %dest.display(), bytes = written, "model stored");
    Ok(())
}
