//! Opaque inferencer seams.
//!
//! The heavy models (streaming VAD, keyword spotting, speaker-separating
//! recognition, speaker verification, TTS synthesis) live behind narrow
//! traits. Implementations return their payloads as raw [`serde_json::Value`]
//! and callers interpret them exclusively through the [`adapter`] functions —
//! nobody indexes a raw payload directly. All trait methods are synchronous:
//! they run on the blocking worker pool, never on the transport task.

pub mod adapter;
pub mod remote;

use crate::error::{Result, VoiceError};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Opaque incremental state carried across streaming inference calls.
///
/// The pipeline only ever clears it or threads it back into the next call;
/// its contents belong to the model implementation.
#[derive(Debug, Clone, Default)]
pub struct ModelCache(Value);

impl ModelCache {
    /// Fresh, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self(Value::Null)
    }

    /// Drop all incremental state.
    pub fn clear(&mut self) {
        self.0 = Value::Null;
    }

    /// The raw state to thread into the next call.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Replace the state with what the model handed back.
    pub fn replace(&mut self, state: Value) {
        self.0 = state;
    }

    /// Whether any incremental state is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

/// Streaming voice-activity model.
pub trait StreamingVad: Send + Sync {
    /// One streaming step over a chunk of 16 kHz mono samples.
    ///
    /// Interpret the payload via [`adapter::vad_emitted_speech`].
    ///
    /// # Errors
    ///
    /// Implementation-defined; the caller treats any error as "no speech".
    fn stream(
        &self,
        samples: &[f32],
        cache: &mut ModelCache,
        is_final: bool,
        chunk_ms: u32,
    ) -> Result<Value>;
}

/// Wake-phrase keyword spotter.
pub trait KeywordSpotter: Send + Sync {
    /// Full-window detection (`is_final` semantics, fresh cache every call).
    ///
    /// Interpret the payload via [`adapter::kws_text`].
    ///
    /// # Errors
    ///
    /// Implementation-defined; the caller treats any error as "not wakened".
    fn spot(&self, window: &[f32]) -> Result<Value>;
}

/// Offline recognizer with speaker separation.
pub trait SpeakerSeparator: Send + Sync {
    /// Recognize a WAV file, returning per-sentence text, timestamps, and
    /// speaker ids. Interpret via [`adapter::sentences`].
    ///
    /// # Errors
    ///
    /// Implementation-defined; finalize maps errors to an empty result.
    fn separate(&self, wav: &Path, batch_size_s: u32, hotword: &str, disable_lm: bool)
    -> Result<Value>;
}

/// Pairwise speaker verification.
pub trait SpeakerVerifier: Send + Sync {
    /// Compare an enrollment WAV with a probe WAV.
    /// Interpret via [`adapter::sv_reading`].
    ///
    /// # Errors
    ///
    /// Implementation-defined; the gate treats an error as a failed group.
    fn verify(&self, enroll_wav: &Path, probe_wav: &Path) -> Result<Value>;
}

/// Inference parameters forwarded verbatim to the synthesis backend.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardParams {
    /// Decoder beam size.
    pub beam_size: u32,
    /// Output sampling rate in Hz.
    pub sampling_rate: u32,
}

/// Text-to-speech synthesis backend. Produces complete WAV containers.
pub trait TtsEngine: Send + Sync {
    /// Synthesize one segment to WAV bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Tts`] on synthesis failure.
    fn synthesize(&self, text: &str, voice: &str, params: &ForwardParams) -> Result<Vec<u8>>;

    /// Synthesize several segments in one call, index-aligned with the input.
    ///
    /// # Errors
    ///
    /// The default refuses list input; callers fall back to per-segment calls.
    fn synthesize_batch(
        &self,
        texts: &[String],
        voice: &str,
        params: &ForwardParams,
    ) -> Result<Vec<Vec<u8>>> {
        let _ = (texts, voice, params);
        Err(VoiceError::Tts("backend does not accept list input".into()))
    }
}

/// Process-wide model singletons, initialized once at startup.
///
/// Sessions never hold a model beyond a single inference call.
#[derive(Clone)]
pub struct ModelRegistry {
    /// Streaming VAD model.
    pub vad: Arc<dyn StreamingVad>,
    /// Wake-phrase spotter.
    pub kws: Arc<dyn KeywordSpotter>,
    /// Speaker-separating recognizer used at finalize.
    pub separator: Arc<dyn SpeakerSeparator>,
    /// Pairwise speaker verifier.
    pub verifier: Arc<dyn SpeakerVerifier>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    #[test]
    fn cache_starts_empty_and_clears() {
        let mut cache = ModelCache::new();
        assert!(cache.is_empty());
        cache.replace(json!({"frames": [1, 2, 3]}));
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.raw().is_null());
    }

    #[test]
    fn forward_params_serialize_snake_case() {
        let params = ForwardParams {
            beam_size: 1,
            sampling_rate: 16_000,
        };
        let v = serde_json::to_value(&params).unwrap();
        assert_eq!(v["beam_size"], 1);
        assert_eq!(v["sampling_rate"], 16_000);
    }
}
