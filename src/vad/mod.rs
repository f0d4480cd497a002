//! Per-chunk speech decision.
//!
//! Combines a cheap energy/peak detector with the streaming VAD model. The
//! energy detector alone is too eager on breath noise and too deaf to soft
//! speech; the model alone adds latency and occasionally throws. The final
//! verdict is the OR of both, so a model failure degrades to energy-only
//! detection instead of going silent.

use crate::config::VadConfig;
use crate::models::{ModelCache, StreamingVad, adapter};
use std::sync::Arc;
use tracing::debug;

/// Outcome of assessing one chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkDecision {
    /// Final speech verdict (`energy ∨ model`).
    pub is_speech: bool,
    /// Energy/peak detector verdict.
    pub is_speech_energy: bool,
    /// Streaming model verdict (false on model error).
    pub is_speech_model: bool,
    /// Mean absolute amplitude of the chunk.
    pub energy: f32,
    /// Peak absolute amplitude of the chunk.
    pub peak: f32,
}

/// Dual-signal speech detector shared by enrollment and ASR endpointing.
pub struct SpeechDetector {
    config: VadConfig,
    model: Arc<dyn StreamingVad>,
}

impl SpeechDetector {
    /// Build a detector over the process-wide streaming VAD model.
    #[must_use]
    pub fn new(config: VadConfig, model: Arc<dyn StreamingVad>) -> Self {
        Self { config, model }
    }

    /// Assess one 16 kHz mono chunk, threading the session's VAD cache.
    pub fn assess(&self, samples: &[f32], cache: &mut ModelCache) -> ChunkDecision {
        let energy = mean_abs(samples);
        let peak = peak_abs(samples);

        let energy_hit = energy > self.config.energy_threshold;
        let peak_hit = peak > self.config.peak_threshold;
        let is_speech_energy = if self.config.use_and_logic {
            energy_hit && peak_hit
        } else {
            energy_hit || peak_hit
        };

        let chunk_ms = (samples.len() / 16) as u32;
        let is_speech_model = match self.model.stream(samples, cache, false, chunk_ms) {
            Ok(payload) => adapter::vad_emitted_speech(&payload),
            Err(e) => {
                debug!("streaming VAD failed, falling back to energy only: {e}");
                false
            }
        };

        ChunkDecision {
            is_speech: is_speech_energy || is_speech_model,
            is_speech_energy,
            is_speech_model,
            energy,
            peak,
        }
    }
}

fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}
