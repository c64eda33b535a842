use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use subtitler::{RunnerConfig, WhisperOptions};

#[derive(Parser, Clone, Debug)]
#[command(
    name = "subtitler-server",
    version,
    about = "Generate subtitles for a media library over HTTP and WebSocket"
)]
pub struct Config {
    /// Root of the media library. Submitted files must live under it.
    #[arg(long, env = "NAS_MEDIA_PATH", default_value = "/mnt/media")]
    pub media_root: PathBuf,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Transcriptions allowed to run at once, across all clients.
    #[arg(long, env = "MAX_CONCURRENT_TRANSCRIPTIONS", default_value = "1")]
    pub max_concurrent_transcriptions: usize,

    /// How long a stop request waits for the batch to wind down.
    #[arg(long, env = "CANCEL_WAIT_MS", default_value = "1000")]
    pub cancel_wait_ms: u64,

    /// How long finished jobs stay in the job list.
    #[arg(long, env = "JOB_RETENTION_HOURS", default_value = "72")]
    pub job_retention_hours: u64,

    /// Model cache directory (default: ~/.cache/subtitler/models).
    #[arg(long, env = "MODEL_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disable GPU acceleration.
    #[arg(long, env = "WHISPER_NO_GPU")]
    pub no_gpu: bool,

    /// GPU device ID.
    #[arg(long, env = "WHISPER_GPU_DEVICE", default_value = "0")]
    pub gpu_device: u32,

    /// Number of threads (default: auto).
    #[arg(long, env = "WHISPER_THREADS")]
    pub threads: Option<u32>,

    /// List available models and exit.
    #[arg(long)]
    pub list_models: bool,

    /// Download a model into the cache and exit.
    #[arg(long)]
    pub download_model: Option<String>,
}

impl Config {
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new()
            .max_concurrent_transcriptions(self.max_concurrent_transcriptions)
            .cancel_wait(Duration::from_millis(self.cancel_wait_ms))
            .job_retention(Duration::from_secs(self.job_retention_hours.saturating_mul(60 * 60)))
    }

    pub fn whisper_options(&self) -> WhisperOptions {
        let mut opts = WhisperOptions::new().gpu(!self.no_gpu).gpu_device(self.gpu_device);
        if let Some(n) = self.threads {
            opts = opts.n_threads(n);
        }
        if let Some(dir) = &self.cache_dir {
            opts = opts.cache_dir(dir.clone());
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["subtitler-server"]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind_addr().unwrap().port(), 8000);

        let runner = config.runner_config();
        assert_eq!(runner.max_concurrent_transcriptions, 1);
        assert_eq!(runner.cancel_wait, Duration::from_secs(1));
        assert_eq!(runner.job_retention, Duration::from_secs(72 * 3600));
    }

    #[test]
    fn test_huge_retention_saturates() {
        let hours = u64::MAX.to_string();
        let config =
            Config::parse_from(["subtitler-server", "--job-retention-hours", hours.as_str()]);
        assert_eq!(config.runner_config().job_retention, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_zero_concurrency_is_raised() {
        let config = Config::parse_from(["subtitler-server", "--max-concurrent-transcriptions", "0"]);
        assert_eq!(config.runner_config().max_concurrent_transcriptions, 1);
    }

    #[test]
    fn test_whisper_options() {
        let config = Config::parse_from([
            "subtitler-server",
            "--no-gpu",
            "--threads",
            "4",
            "--cache-dir",
            "/tmp/models",
        ]);
        let opts = config.whisper_options();
        assert!(!opts.gpu);
        assert_eq!(opts.n_threads, Some(4));
        assert_eq!(opts.resolve_cache_dir(), PathBuf::from("/tmp/models"));
    }
}
