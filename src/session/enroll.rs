//! Speaker enrollment capture.
//!
//! After wake-up the session collects a reference sample of the authorized
//! speaker. Chunks before the first detected speech are dropped; from the
//! first speech chunk onward everything (speech and silence alike) is
//! accumulated so the sample keeps its natural pauses. Capture completes
//! when both conditions hold: enough time has passed since the first speech
//! (≥5 s by default) and the speaker has gone quiet (≥2 s trailing silence).

use std::time::Instant;
use tracing::info;

/// Progress report for one observed chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnrollProgress {
    /// No speech detected yet; nothing accumulated.
    WaitingForSpeech,
    /// Accumulating; reports elapsed capture and trailing silence.
    Capturing {
        /// Seconds since the first detected speech.
        captured_secs: f32,
        /// Current trailing silence in seconds.
        silence_secs: f32,
    },
    /// Both completion conditions hold; take the sample.
    Ready,
}

/// Enrollment capture state.
pub struct EnrollCapturer {
    buffer: Vec<f32>,
    has_detected_speech: bool,
    first_speech: Option<Instant>,
    last_voice: Option<Instant>,
    silence_secs: f32,
    min_enroll_secs: f32,
    silence_threshold_secs: f32,
}

impl EnrollCapturer {
    /// Create a capturer with the given completion thresholds.
    #[must_use]
    pub fn new(min_enroll_secs: f32, silence_threshold_secs: f32) -> Self {
        Self {
            buffer: Vec::new(),
            has_detected_speech: false,
            first_speech: None,
            last_voice: None,
            silence_secs: 0.0,
            min_enroll_secs,
            silence_threshold_secs,
        }
    }

    /// Feed one chunk with its speech verdict.
    pub fn observe(&mut self, samples: &[f32], is_speech: bool, now: Instant) -> EnrollProgress {
        if is_speech {
            if !self.has_detected_speech {
                self.has_detected_speech = true;
                self.first_speech = Some(now);
                info!("enrollment capture started (first speech detected)");
            }
            self.last_voice = Some(now);
            self.silence_secs = 0.0;
        } else if let Some(last_voice) = self.last_voice {
            self.silence_secs = now.duration_since(last_voice).as_secs_f32();
        }

        if !self.has_detected_speech {
            return EnrollProgress::WaitingForSpeech;
        }

        self.buffer.extend_from_slice(samples);

        let captured_secs = self
            .first_speech
            .map(|t| now.duration_since(t).as_secs_f32())
            .unwrap_or_default();

        if captured_secs >= self.min_enroll_secs && self.silence_secs >= self.silence_threshold_secs
        {
            EnrollProgress::Ready
        } else {
            EnrollProgress::Capturing {
                captured_secs,
                silence_secs: self.silence_secs,
            }
        }
    }

    /// Take the accumulated sample, leaving the buffer empty.
    pub fn take_sample(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }

    /// Drop everything, including the timers.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.has_detected_speech = false;
        self.first_speech = None;
        self.last_voice = None;
        self.silence_secs = 0.0;
    }

    /// Accumulated sample length in samples.
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }
}
