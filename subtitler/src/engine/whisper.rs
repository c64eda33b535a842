use std::path::Path;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{self, SAMPLE_RATE};
use crate::config::{Language, ModelSize, WhisperOptions};
use crate::engine::{Progress, SpeechModel, TranscriptionEngine};
use crate::error::{Error, Result};
use crate::model::ModelCache;
use crate::types::{Segment, Transcription};

/// whisper.cpp engine. Models are fetched into the cache on first use.
#[derive(Debug, Clone, Default)]
pub struct WhisperEngine {
    options: WhisperOptions,
}

impl WhisperEngine {
    pub fn new(options: WhisperOptions) -> Self {
        Self { options }
    }
}

impl TranscriptionEngine for WhisperEngine {
    fn load_model(&self, size: ModelSize) -> Result<Box<dyn SpeechModel>> {
        let cache = ModelCache::new(self.options.resolve_cache_dir());
        // Runs on the blocking pool, where entering the runtime is allowed.
        let model_path = tokio::runtime::Handle::current().block_on(cache.fetch(size))?;

        info!(model = %model_path.display(), "loading whisper model");

        let mut ctx_params = WhisperContextParameters::new();
        ctx_params.use_gpu(self.options.gpu);
        ctx_params.gpu_device(self.options.gpu_device as i32);

        let ctx = WhisperContext::new_with_params(
            model_path
                .to_str()
                .ok_or_else(|| Error::Model("model path contains invalid UTF-8".into()))?,
            ctx_params,
        )?;

        Ok(Box::new(WhisperModel {
            ctx,
            n_threads: self.options.n_threads,
        }))
    }
}

struct WhisperModel {
    ctx: WhisperContext,
    n_threads: Option<u32>,
}

impl SpeechModel for WhisperModel {
    fn transcribe(
        &self,
        path: &Path,
        language: &Language,
        progress: Progress,
    ) -> Result<Transcription> {
        let samples = audio::decode(path)?;

        let mut state = self.ctx.create_state()?;
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });

        match language {
            Language::Auto => params.set_detect_language(true),
            Language::Code(code) => {
                if whisper_rs::get_lang_id(code).is_none() {
                    return Err(Error::UnsupportedLanguage(code.clone()));
                }
                params.set_language(Some(code));
            }
        }

        if let Some(n) = self.n_threads {
            params.set_n_threads(n as i32);
        }

        // Disable stderr printing from whisper.cpp
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        // whisper.cpp reports percent done from inside `full`.
        let mut last = 0;
        params.set_progress_callback_safe(move |percent: i32| {
            let percent = percent.clamp(0, 100) as usize;
            if percent > last {
                last = percent;
                progress(percent, 100);
            }
        });

        info!(samples = samples.len(), "running transcription");
        state.full(params, &samples)?;

        let num_segments = state.full_n_segments();
        debug!(num_segments, "transcription complete");

        let total = num_segments.max(0) as usize;
        let mut segments = Vec::with_capacity(total);

        for i in 0..num_segments {
            let segment = state
                .get_segment(i)
                .ok_or_else(|| Error::Transcription(format!("segment {i} not found")))?;

            let text = segment
                .to_str_lossy()
                .map_err(|e| Error::Transcription(format!("segment text error: {e}")))?
                .into_owned();

            segments.push(Segment {
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
                text,
            });
        }

        let detected = whisper_rs::get_lang_str(state.full_lang_id_from_state())
            .unwrap_or("unknown")
            .to_string();

        Ok(Transcription {
            segments,
            language: detected,
            duration: samples.len() as f64 / SAMPLE_RATE as f64,
        })
    }
}
