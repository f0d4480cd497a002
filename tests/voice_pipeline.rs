//! End-to-end session pipeline tests with stub inferencers.
//!
//! These drive a real [`Session`] through the wake → enrollment → confirm →
//! recognition lifecycle, with models replaced by scripted stubs and the
//! clock driven explicitly.

use nightingale::config::ServiceConfig;
use nightingale::error::Result;
use nightingale::models::{
    KeywordSpotter, ModelCache, ModelRegistry, SpeakerSeparator, SpeakerVerifier, StreamingVad,
};
use nightingale::server::{VoiceRuntime, messages};
use nightingale::session::{ChunkEvent, Session, SessionMode};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 400 ms of clearly-voiced audio.
fn loud_chunk() -> Vec<f32> {
    vec![0.25; 6400]
}

/// 400 ms of digital silence.
fn silent_chunk() -> Vec<f32> {
    vec![0.0; 6400]
}

/// Streaming VAD stub that never reports speech; the energy detector
/// decides alone.
struct QuietVad;

impl StreamingVad for QuietVad {
    fn stream(
        &self,
        _samples: &[f32],
        _cache: &mut ModelCache,
        _is_final: bool,
        _chunk_ms: u32,
    ) -> Result<Value> {
        Ok(json!([{"value": []}]))
    }
}

/// Keyword spotter that always answers with a fixed verdict.
struct ScriptedKws(&'static str);

impl KeywordSpotter for ScriptedKws {
    fn spot(&self, _window: &[f32]) -> Result<Value> {
        Ok(json!([{"text": self.0}]))
    }
}

/// Separator that reports one speaker covering the whole utterance.
struct WholeUtteranceSeparator(&'static str);

impl SpeakerSeparator for WholeUtteranceSeparator {
    fn separate(
        &self,
        wav: &Path,
        _batch_size_s: u32,
        _hotword: &str,
        _disable_lm: bool,
    ) -> Result<Value> {
        let bytes = std::fs::read(wav)?;
        let samples = nightingale::audio::decode_wav_bytes(&bytes)?;
        let end_ms = (nightingale::audio::duration_secs(&samples) * 1000.0) as i64;
        Ok(json!([{"text": self.0, "start": 0, "end": end_ms, "spk": 0}]))
    }
}

/// Verifier with a fixed similarity score.
struct FixedScoreVerifier(f64);

impl SpeakerVerifier for FixedScoreVerifier {
    fn verify(&self, _enroll: &Path, _probe: &Path) -> Result<Value> {
        Ok(json!({"score": self.0}))
    }
}

struct Bench {
    session: Session,
    now: Instant,
    _dir: tempfile::TempDir,
}

impl Bench {
    fn new(kws_verdict: &'static str, recognized: &'static str, score: f64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServiceConfig::default();
        config.audit.root_dir = dir.path().to_path_buf();
        // Keep finalize offline: the deterministic rules are under test,
        // the LLM pass is not.
        config.pipeline.disable_llm = true;

        let registry = ModelRegistry {
            vad: Arc::new(QuietVad),
            kws: Arc::new(ScriptedKws(kws_verdict)),
            separator: Arc::new(WholeUtteranceSeparator(recognized)),
            verifier: Arc::new(FixedScoreVerifier(score)),
        };
        let runtime = VoiceRuntime::new(config, registry);
        let session = runtime.new_session().expect("session");
        Self {
            session,
            now: Instant::now(),
            _dir: dir,
        }
    }

    /// Feed one chunk, advancing the simulated clock by 400 ms first.
    fn feed(&mut self, samples: &[f32]) -> ChunkEvent {
        self.now += Duration::from_millis(400);
        self.session.ingest_chunk(samples, self.now)
    }

    /// Wake the session: the scripted spotter fires once the window fills.
    fn wake(&mut self) {
        for _ in 0..3 {
            assert_eq!(self.feed(&loud_chunk()), ChunkEvent::None);
        }
        assert_eq!(self.feed(&loud_chunk()), ChunkEvent::Wakened);
        assert_eq!(self.session.mode(), SessionMode::WaitingForEnrollment);
        assert!(self.session.is_activated());
    }

    /// Complete enrollment: speech past the minimum, then trailing silence.
    fn enroll(&mut self) {
        for _ in 0..13 {
            assert_eq!(self.feed(&loud_chunk()), ChunkEvent::None);
        }
        let mut completed = false;
        for _ in 0..8 {
            if self.feed(&silent_chunk()) == ChunkEvent::EnrollmentCompleted {
                completed = true;
                break;
            }
        }
        assert!(completed, "enrollment never completed");
        assert!(self.session.is_enrolled());
        assert_eq!(self.session.mode(), SessionMode::WaitingForEnrollmentConfirm);
        assert!(self.session.start_asr());
        assert_eq!(self.session.mode(), SessionMode::AsrActive);
    }

    /// Speak one utterance and endpoint it with trailing silence.
    fn speak_utterance(&mut self) {
        for _ in 0..4 {
            assert_eq!(self.feed(&loud_chunk()), ChunkEvent::None);
        }
        for _ in 0..5 {
            if self.feed(&silent_chunk()) == ChunkEvent::ReadyToFinalize {
                return;
            }
        }
        panic!("utterance never endpointed");
    }
}

#[test]
fn pure_silence_never_finalizes() {
    let mut bench = Bench::new("rejected", "unused", 0.9);
    bench.session.set_use_wake(false);
    assert_eq!(bench.session.mode(), SessionMode::AsrActive);

    for _ in 0..10 {
        assert_eq!(bench.feed(&silent_chunk()), ChunkEvent::None);
    }
    assert_eq!(bench.session.endpointer().buffered_samples(), 0);
    assert!(!bench.session.endpointer().has_detected_speech());
}

#[test]
fn wake_activates_without_polluting_the_asr_buffer() {
    let mut bench = Bench::new("小护", "unused", 0.9);
    bench.wake();
    // The triggering chunk was skipped downstream.
    assert_eq!(bench.session.endpointer().buffered_samples(), 0);
    assert_eq!(bench.session.endpointer().pre_speech_samples(), 0);
}

#[test]
fn rejected_windows_never_wake() {
    let mut bench = Bench::new("rejected", "unused", 0.9);
    for _ in 0..12 {
        assert_eq!(bench.feed(&loud_chunk()), ChunkEvent::None);
    }
    assert_eq!(bench.session.mode(), SessionMode::WaitingForWakeup);
    assert!(!bench.session.is_activated());
}

#[test]
fn enrollment_captures_a_long_sample() {
    let mut bench = Bench::new("小护", "unused", 0.9);
    bench.wake();

    for _ in 0..13 {
        assert_eq!(bench.feed(&loud_chunk()), ChunkEvent::None);
    }
    let mut completed = false;
    for _ in 0..8 {
        if bench.feed(&silent_chunk()) == ChunkEvent::EnrollmentCompleted {
            completed = true;
            break;
        }
    }
    assert!(completed);
    assert_eq!(bench.session.mode(), SessionMode::WaitingForEnrollmentConfirm);

    // The persisted sample covers everything from first speech on: at
    // least the 13 speech chunks (5.2 s).
    let enroll_dir = bench._dir.path().join("enroll");
    let entry = std::fs::read_dir(&enroll_dir)
        .expect("enroll dir")
        .next()
        .expect("enroll wav")
        .expect("dir entry");
    let samples =
        nightingale::audio::decode_wav_bytes(&std::fs::read(entry.path()).expect("read wav"))
            .expect("decode wav");
    assert!(nightingale::audio::duration_secs(&samples) >= 5.2);

    // Audio is ignored until the client confirms.
    assert_eq!(bench.feed(&loud_chunk()), ChunkEvent::None);
    assert!(bench.session.start_asr());
}

#[test]
fn low_score_speaker_is_rejected() {
    let mut bench = Bench::new("小护", "我头疼", 0.30);
    bench.wake();
    bench.enroll();
    bench.speak_utterance();

    let final_text = bench.session.finalize();
    assert_eq!(final_text, "__SV_VERIFICATION_FAILED__");

    let reply = messages::result(&final_text);
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "抱歉，请再说一遍！");
}

#[test]
fn accepted_utterance_is_recognized_and_corrected() {
    let mut bench = Bench::new("小护", "我头疼，脱腾得厉害，前妻检查过", 0.62);
    bench.wake();
    bench.enroll();
    bench.speak_utterance();

    let final_text = bench.session.finalize();
    assert!(final_text.contains("头疼"), "got: {final_text}");
    assert!(final_text.contains("前期"), "got: {final_text}");
    assert!(!final_text.contains("脱腾"));
    assert!(!final_text.contains("前妻"));

    // ASR state is reset after finalize; the session keeps listening.
    assert_eq!(bench.session.mode(), SessionMode::AsrActive);
    assert!(bench.session.is_activated());
    assert!(bench.session.is_enrolled());
    assert_eq!(bench.session.endpointer().buffered_samples(), 0);
    assert_eq!(bench.session.endpointer().silence_chunks(), 0);
    assert!(!bench.session.endpointer().has_detected_speech());
}

#[test]
fn second_utterance_flows_after_the_first() {
    let mut bench = Bench::new("小护", "胸闷三天", 0.8);
    bench.wake();
    bench.enroll();

    bench.speak_utterance();
    assert_eq!(bench.session.finalize(), "胸闷三天");

    bench.speak_utterance();
    assert_eq!(bench.session.finalize(), "胸闷三天");
}

#[test]
fn disabling_sv_clears_enrollment_and_passes_audio_through() {
    let mut bench = Bench::new("小护", "旁人说话", 0.01);
    bench.wake();
    bench.enroll();

    bench.session.set_use_sv(false);
    assert!(!bench.session.is_enrolled());

    // Without verification the recognized text passes straight through,
    // score irrelevant.
    bench.speak_utterance();
    assert_eq!(bench.session.finalize(), "旁人说话");
}

#[test]
fn enrolled_but_not_activated_is_refused() {
    let mut bench = Bench::new("小护", "我头疼", 0.9);
    bench.wake();
    bench.enroll();

    // Toggling wake back on during recognition drops the activation (but
    // not the enrollment); turning it off again resumes recognition
    // without a fresh wake-up.
    bench.session.set_use_wake(false);
    bench.session.set_use_wake(true);
    assert!(!bench.session.is_activated());
    bench.session.set_use_wake(false);
    assert!(bench.session.is_enrolled());

    // Back to recognition without a fresh wake-up: refuse verification.
    assert_eq!(bench.session.mode(), SessionMode::AsrActive);
    bench.speak_utterance();
    let final_text = bench.session.finalize();
    assert_eq!(final_text, "__SV_NOT_ACTIVATED__");
    assert_eq!(
        messages::result(&final_text)["message"],
        "非认证注册声音，拒绝访问。"
    );
}

#[test]
fn cancel_enrollment_returns_to_wakeup() {
    let mut bench = Bench::new("小护", "unused", 0.9);
    bench.wake();
    for _ in 0..3 {
        let _ = bench.feed(&loud_chunk());
    }

    bench.session.cancel_enrollment();
    assert_eq!(bench.session.mode(), SessionMode::WaitingForWakeup);
    assert!(bench.session.use_wake());
    assert!(!bench.session.is_activated());
    assert!(!bench.session.is_enrolled());
}

#[test]
fn end_conversation_resets_everything() {
    let mut bench = Bench::new("小护", "胸闷三天", 0.8);
    bench.wake();
    bench.enroll();
    bench.speak_utterance();
    let _ = bench.session.finalize();

    bench.session.reset();
    assert_eq!(bench.session.mode(), SessionMode::WaitingForWakeup);
    assert!(!bench.session.is_activated());
    assert!(!bench.session.is_enrolled());
    assert_eq!(bench.session.endpointer().buffered_samples(), 0);
}

#[test]
fn wake_toggle_during_recognition_returns_to_wakeup() {
    let mut bench = Bench::new("小护", "unused", 0.9);
    bench.session.set_use_wake(false);
    assert_eq!(bench.session.mode(), SessionMode::AsrActive);

    bench.session.set_use_wake(true);
    assert_eq!(bench.session.mode(), SessionMode::WaitingForWakeup);
    assert!(!bench.session.is_activated());
}
