//! Utterance endpointing for the ASR_ACTIVE mode.
//!
//! Maintains the per-utterance audio buffer with two protections:
//! a pre-speech ring (≤400 ms) prepended once at speech onset so leading
//! consonants survive, and a two-chunk tail margin so trailing phonemes
//! survive without letting the buffer grow through long silences.
//!
//! Timers use the monotonic clock; callers pass `now` explicitly so tests
//! can drive time.

use crate::audio::SAMPLE_RATE;
use std::collections::VecDeque;
use std::time::Instant;

/// Silence chunks kept after the last speech chunk.
const TAIL_CHUNKS: u32 = 2;

/// Endpointer state for one utterance.
pub struct AsrEndpointer {
    buffer: Vec<f32>,
    pre_speech: VecDeque<f32>,
    pre_speech_max: usize,
    has_detected_speech: bool,
    silence_chunks: u32,
    last_voice: Instant,
    silence_secs: f32,
    silence_threshold_secs: f32,
}

impl AsrEndpointer {
    /// Create an endpointer; `now` seeds the silence reference point.
    #[must_use]
    pub fn new(pre_speech_window_secs: f32, silence_threshold_secs: f32, now: Instant) -> Self {
        Self {
            buffer: Vec::new(),
            pre_speech: VecDeque::new(),
            pre_speech_max: (pre_speech_window_secs * SAMPLE_RATE as f32) as usize,
            has_detected_speech: false,
            silence_chunks: 0,
            last_voice: now,
            silence_secs: 0.0,
            silence_threshold_secs,
        }
    }

    /// Feed one chunk with its speech verdict.
    pub fn observe(&mut self, samples: &[f32], is_speech: bool, now: Instant) {
        if is_speech {
            self.silence_secs = 0.0;
            self.silence_chunks = 0;
            self.has_detected_speech = true;
            self.last_voice = now;

            // One-shot onset protection: everything buffered before the
            // first speech chunk goes in front of it.
            if !self.pre_speech.is_empty() {
                self.buffer.extend(self.pre_speech.drain(..));
            }
            self.buffer.extend_from_slice(samples);
            return;
        }

        if self.has_detected_speech {
            if self.silence_chunks < TAIL_CHUNKS {
                self.buffer.extend_from_slice(samples);
                self.silence_chunks += 1;
            }
            self.silence_secs = now.duration_since(self.last_voice).as_secs_f32();
        } else {
            self.pre_speech.extend(samples.iter().copied());
            while self.pre_speech.len() > self.pre_speech_max {
                let _ = self.pre_speech.pop_front();
            }
            // Zero until the first speech frame.
            self.silence_secs = 0.0;
        }
    }

    /// Whether the utterance should be finalized now.
    ///
    /// Pure-silence input never finalizes.
    #[must_use]
    pub fn should_finalize(&self) -> bool {
        self.silence_secs >= self.silence_threshold_secs
            && !self.buffer.is_empty()
            && self.has_detected_speech
    }

    /// Take the accumulated utterance, leaving the buffer empty.
    pub fn take_utterance(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }

    /// Reset for the next utterance; `now` re-seeds the silence reference
    /// so no silence leaks across the transition.
    pub fn reset(&mut self, now: Instant) {
        self.buffer.clear();
        self.pre_speech.clear();
        self.has_detected_speech = false;
        self.silence_chunks = 0;
        self.last_voice = now;
        self.silence_secs = 0.0;
    }

    /// Buffered utterance length in samples.
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Pre-speech ring length in samples.
    #[must_use]
    pub fn pre_speech_samples(&self) -> usize {
        self.pre_speech.len()
    }

    /// Whether any speech frame has been seen this utterance.
    #[must_use]
    pub fn has_detected_speech(&self) -> bool {
        self.has_detected_speech
    }

    /// Current trailing-silence reading in seconds.
    #[must_use]
    pub fn silence_secs(&self) -> f32 {
        self.silence_secs
    }

    /// Trailing silence chunks accumulated (capped at the tail margin).
    #[must_use]
    pub fn silence_chunks(&self) -> u32 {
        self.silence_chunks
    }
}
