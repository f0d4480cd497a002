//! Sliding-window wake detector.
//!
//! Every incoming chunk (speech or not) is appended to a FIFO window capped
//! at the configured length (1.6 s by default). Once the window is full the
//! wake inferencer runs over the whole window with `is_final` semantics and
//! a fresh cache. Running over a full window instead of streaming per chunk
//! makes detection insensitive to chunk boundaries while bounding latency to
//! one window.

use crate::audio::SAMPLE_RATE;
use crate::models::{KeywordSpotter, ModelCache, adapter};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verdict the spotter uses to signal "no keyword in this window".
const REJECTED: &str = "rejected";

/// Result of feeding one chunk to the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum WakeOutcome {
    /// Window not yet full; keep feeding.
    Pending,
    /// A full window was checked and the keyword was not found.
    Rejected,
    /// The wake phrase was detected. Carries the detected text and the
    /// audio window that triggered it (for audit).
    Wakened {
        /// Text the spotter matched (e.g. the wake phrase).
        text: String,
        /// The full detection window.
        window: Vec<f32>,
    },
}

/// Wake-phrase detector with a sliding audio window.
pub struct WakeDetector {
    model: Arc<dyn KeywordSpotter>,
    buffer: Vec<f32>,
    cache: ModelCache,
    window_samples: usize,
}

impl WakeDetector {
    /// Build a detector with the given window length in seconds.
    #[must_use]
    pub fn new(model: Arc<dyn KeywordSpotter>, window_secs: f32) -> Self {
        let window_samples = (window_secs * SAMPLE_RATE as f32) as usize;
        Self {
            model,
            buffer: Vec::with_capacity(window_samples),
            cache: ModelCache::new(),
            window_samples,
        }
    }

    /// Feed one chunk and, when the window is full, run detection.
    pub fn push_chunk(&mut self, samples: &[f32]) -> WakeOutcome {
        self.buffer.extend_from_slice(samples);
        if self.buffer.len() > self.window_samples {
            let excess = self.buffer.len() - self.window_samples;
            self.buffer.drain(..excess);
        }

        if self.buffer.len() < self.window_samples {
            return WakeOutcome::Pending;
        }

        // Every attempt starts from a clean cache.
        self.cache.clear();

        let payload = match self.model.spot(&self.buffer) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("wake detection failed, treating window as not wakened: {e}");
                self.reset();
                return WakeOutcome::Rejected;
            }
        };

        match adapter::kws_text(&payload) {
            Some(text) if text != REJECTED => {
                info!("wake phrase detected: {text}");
                let window = std::mem::take(&mut self.buffer);
                self.cache.clear();
                WakeOutcome::Wakened { text, window }
            }
            verdict => {
                debug!("wake window rejected (verdict: {verdict:?})");
                self.reset();
                WakeOutcome::Rejected
            }
        }
    }

    /// Drop the window and cache.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cache.clear();
    }

    /// Current number of buffered samples.
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Window capacity in samples.
    #[must_use]
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::{Result, VoiceError};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSpotter {
        text: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedSpotter {
        fn new(text: Option<&'static str>) -> Self {
            Self {
                text,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl KeywordSpotter for ScriptedSpotter {
        fn spot(&self, _window: &[f32]) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.text {
                Some(text) => Ok(json!([{"text": text}])),
                None => Ok(json!([])),
            }
        }
    }

    struct FailingSpotter;

    impl KeywordSpotter for FailingSpotter {
        fn spot(&self, _window: &[f32]) -> Result<Value> {
            Err(VoiceError::Kws("spotter crashed".into()))
        }
    }

    /// 400 ms chunk at 16 kHz.
    fn chunk() -> Vec<f32> {
        vec![0.1; 6400]
    }

    #[test]
    fn buffer_never_exceeds_window() {
        let spotter = Arc::new(ScriptedSpotter::new(None));
        let mut detector = WakeDetector::new(spotter, 1.6);
        for _ in 0..50 {
            let _ = detector.push_chunk(&chunk());
            assert!(detector.buffered_samples() <= detector.window_samples());
        }
    }

    #[test]
    fn detection_waits_for_full_window() {
        let spotter = Arc::new(ScriptedSpotter::new(Some("小护")));
        let mut detector = WakeDetector::new(Arc::clone(&spotter) as Arc<dyn KeywordSpotter>, 1.6);
        // 1.6 s window needs 4 chunks of 400 ms.
        assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Pending);
        assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Pending);
        assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Pending);
        let outcome = detector.push_chunk(&chunk());
        assert!(matches!(outcome, WakeOutcome::Wakened { ref text, .. } if text == "小护"));
        assert_eq!(spotter.calls.load(Ordering::SeqCst), 1);
        // Buffer is consumed by the detection.
        assert_eq!(detector.buffered_samples(), 0);
    }

    #[test]
    fn rejected_verdict_clears_the_window() {
        let spotter = Arc::new(ScriptedSpotter::new(Some("rejected")));
        let mut detector = WakeDetector::new(spotter, 1.6);
        for _ in 0..3 {
            assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Pending);
        }
        assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Rejected);
        assert_eq!(detector.buffered_samples(), 0);
    }

    #[test]
    fn empty_payload_is_rejected() {
        let spotter = Arc::new(ScriptedSpotter::new(None));
        let mut detector = WakeDetector::new(spotter, 1.6);
        for _ in 0..3 {
            let _ = detector.push_chunk(&chunk());
        }
        assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Rejected);
    }

    #[test]
    fn spotter_error_is_rejected_and_resets() {
        let mut detector = WakeDetector::new(Arc::new(FailingSpotter), 1.6);
        for _ in 0..3 {
            let _ = detector.push_chunk(&chunk());
        }
        assert_eq!(detector.push_chunk(&chunk()), WakeOutcome::Rejected);
        assert_eq!(detector.buffered_samples(), 0);
    }

    #[test]
    fn wake_window_carries_full_audio() {
        let spotter = Arc::new(ScriptedSpotter::new(Some("小护")));
        let mut detector = WakeDetector::new(spotter, 1.6);
        for _ in 0..3 {
            let _ = detector.push_chunk(&chunk());
        }
        match detector.push_chunk(&chunk()) {
            WakeOutcome::Wakened { window, .. } => {
                assert_eq!(window.len(), (1.6 * 16_000.0) as usize);
            }
            other => panic!("expected wake, got {other:?}"),
        }
    }
}
