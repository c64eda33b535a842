use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Requested transcription language.
///
/// `"auto"` and the empty string both mean automatic detection. Anything else
/// is kept as a lower-cased language code; engines validate it against their
/// own language tables when the model runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Language {
    /// Auto-detect language from audio.
    #[default]
    Auto,
    /// An explicit language code (e.g. "en", "de", "ja").
    Code(String),
}

impl Language {
    pub fn new(lang: &str) -> Self {
        let lower = lang.trim().to_lowercase();
        if lower.is_empty() || lower == "auto" {
            Language::Auto
        } else {
            Language::Code(lower)
        }
    }

    /// Get the short language code (e.g. "en"), or None for Auto.
    pub fn code(&self) -> Option<&str> {
        match self {
            Language::Auto => None,
            Language::Code(code) => Some(code),
        }
    }

    /// Whether this is auto-detection mode.
    pub fn is_auto(&self) -> bool {
        matches!(self, Language::Auto)
    }

    /// Whether transcripts in a non-English language should be dropped.
    ///
    /// Only auto-detection and an explicit English request keep the gate; any
    /// other explicit language means the caller wants that language.
    pub fn requires_english(&self) -> bool {
        match self {
            Language::Auto => true,
            Language::Code(code) => code == "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Auto => write!(f, "auto"),
            Language::Code(code) => write!(f, "{code}"),
        }
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Language::new(&raw))
    }
}

/// Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModelSize {
    Tiny,
    TinyEn,
    #[default]
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    MediumEn,
    LargeV2,
    LargeV3,
    LargeV3Turbo,
}

impl ModelSize {
    /// Model filename as used by HuggingFace / whisper.cpp.
    pub fn filename(&self) -> String {
        format!("ggml-{}.bin", self.name())
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::TinyEn => "tiny.en",
            ModelSize::Base => "base",
            ModelSize::BaseEn => "base.en",
            ModelSize::Small => "small",
            ModelSize::SmallEn => "small.en",
            ModelSize::Medium => "medium",
            ModelSize::MediumEn => "medium.en",
            ModelSize::LargeV2 => "large-v2",
            ModelSize::LargeV3 => "large-v3",
            ModelSize::LargeV3Turbo => "large-v3-turbo",
        }
    }

    /// Approximate download size, for listings.
    pub fn approx_size(&self) -> &'static str {
        match self {
            ModelSize::Tiny | ModelSize::TinyEn => "75 MB",
            ModelSize::Base | ModelSize::BaseEn => "142 MB",
            ModelSize::Small | ModelSize::SmallEn => "466 MB",
            ModelSize::Medium | ModelSize::MediumEn => "1.5 GB",
            ModelSize::LargeV2 | ModelSize::LargeV3 => "2.9 GB",
            ModelSize::LargeV3Turbo => "~1.6 GB",
        }
    }

    /// Parse from a request or CLI argument. `large` and `turbo` are accepted
    /// as aliases for the newest large models.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tiny" => Some(ModelSize::Tiny),
            "tiny.en" => Some(ModelSize::TinyEn),
            "base" => Some(ModelSize::Base),
            "base.en" => Some(ModelSize::BaseEn),
            "small" => Some(ModelSize::Small),
            "small.en" => Some(ModelSize::SmallEn),
            "medium" => Some(ModelSize::Medium),
            "medium.en" => Some(ModelSize::MediumEn),
            "large-v2" => Some(ModelSize::LargeV2),
            "large" | "large-v3" => Some(ModelSize::LargeV3),
            "turbo" | "large-v3-turbo" => Some(ModelSize::LargeV3Turbo),
            _ => None,
        }
    }

    pub fn all() -> &'static [ModelSize] {
        &[
            ModelSize::Tiny,
            ModelSize::TinyEn,
            ModelSize::Base,
            ModelSize::BaseEn,
            ModelSize::Small,
            ModelSize::SmallEn,
            ModelSize::Medium,
            ModelSize::MediumEn,
            ModelSize::LargeV2,
            ModelSize::LargeV3,
            ModelSize::LargeV3Turbo,
        ]
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModelSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelSize::parse_name(s).ok_or_else(|| Error::UnknownModel(s.to_string()))
    }
}

impl Serialize for ModelSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ModelSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Options for the whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperOptions {
    pub n_threads: Option<u32>,
    pub gpu: bool,
    pub gpu_device: u32,
    pub cache_dir: Option<PathBuf>,
}

impl Default for WhisperOptions {
    fn default() -> Self {
        Self {
            n_threads: None,
            gpu: true,
            gpu_device: 0,
            cache_dir: None,
        }
    }
}

impl WhisperOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_threads(mut self, n: u32) -> Self {
        self.n_threads = Some(n);
        self
    }

    pub fn gpu(mut self, enabled: bool) -> Self {
        self.gpu = enabled;
        self
    }

    pub fn gpu_device(mut self, device: u32) -> Self {
        self.gpu_device = device;
        self
    }

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Resolve the cache directory, defaulting to ~/.cache/subtitler/models.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("subtitler")
                .join("models")
        })
    }
}

/// Tuning for the batch runner and the registries.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How many transcriptions may hold the model slot at once.
    pub max_concurrent_transcriptions: usize,
    /// How long `cancel` waits for a batch to acknowledge before replying.
    pub cancel_wait: Duration,
    /// How long finished jobs stay visible in the job list.
    pub job_retention: Duration,
    /// Number of subtitle text lines included in completion previews.
    pub preview_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transcriptions: 1,
            cancel_wait: Duration::from_secs(1),
            job_retention: Duration::from_secs(3 * 24 * 60 * 60),
            preview_lines: 3,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the slot count. Zero would deadlock every unit, so it is raised to one.
    pub fn max_concurrent_transcriptions(mut self, n: usize) -> Self {
        self.max_concurrent_transcriptions = n.max(1);
        self
    }

    pub fn cancel_wait(mut self, wait: Duration) -> Self {
        self.cancel_wait = wait;
        self
    }

    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn preview_lines(mut self, lines: usize) -> Self {
        self.preview_lines = lines;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_auto_variants() {
        assert!(Language::new("auto").is_auto());
        assert!(Language::new("AUTO").is_auto());
        assert!(Language::new("").is_auto());
        assert!(Language::new("  ").is_auto());
        assert_eq!(Language::new("De").code(), Some("de"));
    }

    #[test]
    fn test_language_english_gate() {
        assert!(Language::Auto.requires_english());
        assert!(Language::new("en").requires_english());
        assert!(!Language::new("fr").requires_english());
    }

    #[test]
    fn test_language_serde() {
        let lang: Language = serde_json::from_str("\"ko\"").unwrap();
        assert_eq!(lang, Language::Code("ko".into()));
        assert_eq!(serde_json::to_string(&Language::Auto).unwrap(), "\"auto\"");
    }

    #[test]
    fn test_model_parse_and_aliases() {
        assert_eq!(ModelSize::parse_name("base"), Some(ModelSize::Base));
        assert_eq!(ModelSize::parse_name("large"), Some(ModelSize::LargeV3));
        assert_eq!(ModelSize::parse_name("turbo"), Some(ModelSize::LargeV3Turbo));
        assert_eq!(ModelSize::parse_name("Medium.EN"), Some(ModelSize::MediumEn));
        assert_eq!(ModelSize::parse_name("huge"), None);
    }

    #[test]
    fn test_model_names_round_trip_through_parse() {
        for size in ModelSize::all() {
            assert_eq!(ModelSize::parse_name(size.name()), Some(*size));
        }
    }

    #[test]
    fn test_model_filename() {
        assert_eq!(ModelSize::Tiny.filename(), "ggml-tiny.bin");
        assert_eq!(ModelSize::LargeV3Turbo.filename(), "ggml-large-v3-turbo.bin");
    }

    #[test]
    fn test_model_deserialize_rejects_unknown() {
        let err = serde_json::from_str::<ModelSize>("\"enormous\"").unwrap_err();
        assert!(err.to_string().contains("enormous"));
    }

    #[test]
    fn test_runner_config_defaults() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.max_concurrent_transcriptions, 1);
        assert_eq!(cfg.cancel_wait, Duration::from_secs(1));
        assert_eq!(cfg.job_retention.as_secs(), 259_200);
        assert_eq!(cfg.preview_lines, 3);
    }

    #[test]
    fn test_runner_config_clamps_zero_slots() {
        let cfg = RunnerConfig::new().max_concurrent_transcriptions(0);
        assert_eq!(cfg.max_concurrent_transcriptions, 1);
    }

    #[test]
    fn test_whisper_options_cache_dir() {
        let opts = WhisperOptions::new().cache_dir(PathBuf::from("/tmp/models"));
        assert_eq!(opts.resolve_cache_dir(), PathBuf::from("/tmp/models"));
        let default_dir = WhisperOptions::default().resolve_cache_dir();
        assert!(default_dir.ends_with("subtitler/models"));
    }
}
