//! Configuration types for the voice pipeline and the TTS job service.
//!
//! Every value has a compiled-in default and can be overridden through the
//! environment. The service is configured entirely from the environment so
//! deployments can be tuned without a config file rollout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for both services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address for the combined HTTP/WebSocket server.
    pub server: ServerConfig,
    /// Per-chunk speech decision settings.
    pub vad: VadConfig,
    /// Session pipeline settings (wake, enrollment, endpointing, SV).
    pub pipeline: PipelineConfig,
    /// Text post-correction settings (hotwords + LLM endpoint).
    pub correction: CorrectionConfig,
    /// Remote inferencer endpoints.
    pub models: ModelsConfig,
    /// TTS segmentation, synthesis, and concatenation settings.
    pub tts: TtsConfig,
    /// Debug/audit WAV dump settings.
    pub audit: AuditConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8001,
        }
    }
}

/// Per-chunk speech decision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Mean-absolute-amplitude threshold for the energy detector.
    pub energy_threshold: f32,
    /// Peak-absolute-amplitude threshold for the energy detector.
    pub peak_threshold: f32,
    /// Combine energy and peak with AND (true, stricter) or OR (false).
    pub use_and_logic: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            peak_threshold: 0.17,
            use_and_logic: true,
        }
    }
}

/// Session pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing silence that finalizes an utterance, in seconds.
    pub silence_threshold_secs: f32,
    /// Sliding wake-detection window, in seconds.
    pub kws_window_secs: f32,
    /// Pre-speech protection window, in seconds.
    pub pre_speech_window_secs: f32,
    /// Minimum speech accumulated before enrollment can complete, in seconds.
    pub min_enroll_secs: f32,
    /// Trailing silence that completes enrollment, in seconds.
    pub enroll_silence_secs: f32,
    /// Speaker-verification acceptance threshold.
    pub sv_threshold: f32,
    /// Force every session to require a wake word regardless of client flags.
    pub require_wake: bool,
    /// Globally disable the LLM correction pass regardless of client flags.
    pub disable_llm: bool,
    /// Disable the recognizer's language-model rescoring (acoustic model only).
    pub disable_lm: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            silence_threshold_secs: 2.0,
            kws_window_secs: 1.6,
            pre_speech_window_secs: 0.4,
            min_enroll_secs: 5.0,
            enroll_silence_secs: 2.0,
            sv_threshold: 0.40,
            require_wake: false,
            disable_llm: false,
            disable_lm: false,
        }
    }
}

/// Text post-correction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Base URL of the OpenAI-compatible correction endpoint.
    pub llm_base_url: String,
    /// API key for the correction endpoint.
    pub llm_api_key: String,
    /// Model name to request.
    pub llm_model: String,
    /// Request timeout in seconds.
    pub llm_timeout_secs: u64,
    /// Optional hotword list path; the embedded default list is used when unset.
    pub hotwords_path: Option<PathBuf>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            llm_base_url: "http://127.0.0.1:5105/v1".to_owned(),
            llm_api_key: String::new(),
            llm_model: "Qwen3-32B".to_owned(),
            llm_timeout_secs: 10,
            hotwords_path: None,
        }
    }
}

/// Remote inferencer endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Base URL of the inference gateway serving VAD/KWS/ASR/SV models.
    pub gateway_url: String,
    /// Per-call timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:10095".to_owned(),
            request_timeout_secs: 30,
        }
    }
}

/// TTS segmentation and synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Target length for general segments, in characters.
    pub seg_target: usize,
    /// Target length for the first segment (shorter, trims tail-latency outliers).
    pub seg_first_target: usize,
    /// Hard cap; segments above this are sub-split.
    pub seg_hard_max: usize,
    /// Pause after weak boundaries (comma-class), in milliseconds.
    pub pause_soft_ms: u32,
    /// Pause after strong boundaries (sentence enders), in milliseconds.
    pub pause_hard_ms: u32,
    /// Linear crossfade at each concatenation boundary, in milliseconds.
    pub crossfade_ms: u32,
    /// Sampling rate forwarded to the synthesis backend.
    pub sampling_rate: u32,
    /// Beam size forwarded to the synthesis backend.
    pub beam_size: u32,
    /// Submit segments to the backend in batches when it supports list input.
    pub use_batch: bool,
    /// Batch size for batched synthesis.
    pub batch_size: usize,
    /// Synthesize a job's segments concurrently (backend must be thread-safe).
    pub parallel_segments: bool,
    /// Width of the synthesis worker pool (concurrent jobs).
    pub workers: usize,
    /// Default voice when a request does not specify one.
    pub default_voice: String,
    /// Bound on waiting for a concurrent engine load, in seconds.
    pub load_wait_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            seg_target: 18,
            seg_first_target: 14,
            seg_hard_max: 22,
            pause_soft_ms: 120,
            pause_hard_ms: 200,
            crossfade_ms: 60,
            sampling_rate: 16_000,
            beam_size: 1,
            use_batch: true,
            batch_size: 2,
            parallel_segments: false,
            workers: 2,
            default_voice: "zhitian_emo".to_owned(),
            load_wait_secs: 60,
        }
    }
}

/// Debug/audit WAV dump configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether audit WAVs are written at all.
    pub enabled: bool,
    /// Root directory for audit artifacts.
    pub root_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let root_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("nightingale")
            .join("audio");
        Self {
            enabled: true,
            root_dir,
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup (the environment in production,
    /// a map in tests).
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        set_string(&get, "SERVER_HOST", &mut self.server.host);
        set_parsed(&get, "SERVER_PORT", &mut self.server.port);

        set_parsed(&get, "VAD_ENERGY_THRESHOLD", &mut self.vad.energy_threshold);
        set_parsed(&get, "VAD_PEAK_THRESHOLD", &mut self.vad.peak_threshold);
        set_bool(&get, "VAD_USE_AND_LOGIC", &mut self.vad.use_and_logic);

        set_parsed(
            &get,
            "SILENCE_THRESHOLD_SECS",
            &mut self.pipeline.silence_threshold_secs,
        );
        set_parsed(&get, "KWS_WINDOW_SECS", &mut self.pipeline.kws_window_secs);
        set_parsed(
            &get,
            "PRE_SPEECH_WINDOW_SECS",
            &mut self.pipeline.pre_speech_window_secs,
        );
        set_parsed(&get, "MIN_ENROLL_SECS", &mut self.pipeline.min_enroll_secs);
        set_parsed(
            &get,
            "ENROLL_SILENCE_SECS",
            &mut self.pipeline.enroll_silence_secs,
        );
        set_parsed(&get, "SV_THRESHOLD", &mut self.pipeline.sv_threshold);
        set_bool(&get, "VOICE_REQUIRE_WAKE", &mut self.pipeline.require_wake);
        set_bool(&get, "VOICE_DISABLE_LLM", &mut self.pipeline.disable_llm);
        set_bool(&get, "ASR_DISABLE_LM", &mut self.pipeline.disable_lm);

        set_string(&get, "AI_MODEL_BASE_URL", &mut self.correction.llm_base_url);
        set_string(&get, "AI_MODEL_API_KEY", &mut self.correction.llm_api_key);
        set_string(&get, "AI_MODEL_NAME", &mut self.correction.llm_model);
        set_parsed(
            &get,
            "AI_MODEL_TIMEOUT_SECS",
            &mut self.correction.llm_timeout_secs,
        );
        if let Some(path) = get("HOTWORDS_PATH").filter(|v| !v.trim().is_empty()) {
            self.correction.hotwords_path = Some(PathBuf::from(path));
        }

        set_string(&get, "MODEL_GATEWAY_URL", &mut self.models.gateway_url);
        set_parsed(
            &get,
            "MODEL_REQUEST_TIMEOUT_SECS",
            &mut self.models.request_timeout_secs,
        );

        set_parsed(&get, "TTS_SEG_TARGET", &mut self.tts.seg_target);
        set_parsed(&get, "TTS_SEG_FIRST", &mut self.tts.seg_first_target);
        set_parsed(&get, "TTS_SEG_HARD_MAX", &mut self.tts.seg_hard_max);
        set_parsed(&get, "TTS_PAUSE_SOFT_MS", &mut self.tts.pause_soft_ms);
        set_parsed(&get, "TTS_PAUSE_HARD_MS", &mut self.tts.pause_hard_ms);
        set_parsed(&get, "TTS_CROSSFADE_MS", &mut self.tts.crossfade_ms);
        set_parsed(&get, "TTS_SAMPLING_RATE", &mut self.tts.sampling_rate);
        set_parsed(&get, "TTS_BEAM_SIZE", &mut self.tts.beam_size);
        set_bool(&get, "TTS_USE_BATCH", &mut self.tts.use_batch);
        set_parsed(&get, "TTS_BATCH_SIZE", &mut self.tts.batch_size);
        set_bool(&get, "TTS_PARALLEL_SEGMENTS", &mut self.tts.parallel_segments);
        set_parsed(&get, "TTS_WORKERS", &mut self.tts.workers);
        set_string(&get, "TTS_DEFAULT_VOICE", &mut self.tts.default_voice);
        set_parsed(&get, "TTS_LOAD_WAIT_SECS", &mut self.tts.load_wait_secs);

        set_bool(&get, "AUDIT_ENABLED", &mut self.audit.enabled);
        if let Some(dir) = get("AUDIT_DIR").filter(|v| !v.trim().is_empty()) {
            self.audit.root_dir = PathBuf::from(dir);
        }
    }
}

fn set_string(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut String) {
    if let Some(value) = get(key) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *slot = trimmed.to_owned();
        }
    }
}

fn set_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(value) = get(key) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!("ignoring unparseable env override {key}={value}"),
        }
    }
}

/// Booleans accept 1/true/yes/on (case-insensitive); everything else is false.
fn set_bool(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(value) = get(key) {
        let v = value.trim().to_ascii_lowercase();
        *slot = matches!(v.as_str(), "1" | "true" | "yes" | "on");
    }
}
