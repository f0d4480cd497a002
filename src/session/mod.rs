//! Per-connection session state machine.
//!
//! A session moves through four modes: waiting for the wake phrase, capturing
//! the speaker's enrollment sample, waiting for the client to confirm
//! enrollment, and active recognition. Every audio chunk is routed by the
//! current mode; control messages move the machine between modes. All methods
//! here are synchronous and are expected to run on the blocking worker pool —
//! the transport task only shuttles messages.

pub mod endpoint;
pub mod enroll;

use crate::audio::AuditSink;
use crate::config::ServiceConfig;
use crate::correct;
use crate::correct::llm::LlmCorrector;
use crate::kws::{WakeDetector, WakeOutcome};
use crate::models::{ModelCache, ModelRegistry};
use crate::session::endpoint::AsrEndpointer;
use crate::session::enroll::{EnrollCapturer, EnrollProgress};
use crate::sv::{ASR_RESULT_EMPTY, GatePolicy, SV_NOT_ACTIVATED, SV_VERIFICATION_FAILED, VerificationGate};
use crate::vad::SpeechDetector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The four session modes, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Only the wake detector runs; no recognition.
    WaitingForWakeup,
    /// Wake fired; capturing the speaker's enrollment sample.
    WaitingForEnrollment,
    /// Enrollment captured; audio is ignored until the client confirms.
    WaitingForEnrollmentConfirm,
    /// Active recognition with endpointing and verification.
    AsrActive,
}

impl SessionMode {
    /// Wire representation of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForWakeup => "WAITING_FOR_WAKEUP",
            Self::WaitingForEnrollment => "WAITING_FOR_ENROLLMENT",
            Self::WaitingForEnrollmentConfirm => "WAITING_FOR_ENROLLMENT_CONFIRM",
            Self::AsrActive => "ASR_ACTIVE",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do after a chunk was ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEvent {
    /// Nothing to report.
    None,
    /// The wake phrase fired; the chunk's downstream processing was skipped.
    Wakened,
    /// Enrollment completed; the session now waits for `start_asr`.
    EnrollmentCompleted,
    /// The utterance endpointed; call [`Session::finalize`].
    ReadyToFinalize,
}

/// One client session.
pub struct Session {
    id: String,
    mode: SessionMode,
    use_wake: bool,
    use_sv: bool,
    use_llm: bool,
    is_activated: bool,
    is_enrolled: bool,
    enroll_sample_path: Option<PathBuf>,
    /// Reserved for streaming intermediate results; currently always empty.
    accumulated_intermediate_text: String,

    wake: WakeDetector,
    enroll: EnrollCapturer,
    endpoint: AsrEndpointer,
    detector: SpeechDetector,
    vad_cache: ModelCache,
    asr_cache: ModelCache,

    gate: Arc<VerificationGate>,
    corrector: Arc<LlmCorrector>,
    hotword_words: Arc<Vec<String>>,
    audit: AuditSink,

    require_wake: bool,
    disable_llm: bool,
}

impl Session {
    /// Build a fresh session over the process-wide singletons.
    #[must_use]
    pub fn new(
        config: &ServiceConfig,
        registry: &ModelRegistry,
        gate: Arc<VerificationGate>,
        corrector: Arc<LlmCorrector>,
        hotword_words: Arc<Vec<String>>,
        audit: AuditSink,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let pipeline = &config.pipeline;

        // Wake is on by default and can only be forced on, never forced off.
        let use_wake = true;
        let mode = SessionMode::WaitingForWakeup;

        info!("session {id} created (mode={})", mode.as_str());

        Self {
            id,
            mode,
            use_wake,
            use_sv: true,
            use_llm: !pipeline.disable_llm,
            is_activated: false,
            is_enrolled: false,
            enroll_sample_path: None,
            accumulated_intermediate_text: String::new(),
            wake: WakeDetector::new(Arc::clone(&registry.kws), pipeline.kws_window_secs),
            enroll: EnrollCapturer::new(pipeline.min_enroll_secs, pipeline.enroll_silence_secs),
            endpoint: AsrEndpointer::new(
                pipeline.pre_speech_window_secs,
                pipeline.silence_threshold_secs,
                now,
            ),
            detector: SpeechDetector::new(config.vad.clone(), Arc::clone(&registry.vad)),
            vad_cache: ModelCache::new(),
            asr_cache: ModelCache::new(),
            gate,
            corrector,
            hotword_words,
            audit,
            require_wake: pipeline.require_wake,
            disable_llm: pipeline.disable_llm,
        }
    }

    /// Route one decoded audio chunk by the current mode.
    ///
    /// `now` is the monotonic receive time of the chunk; passing it in
    /// keeps the silence/enrollment timers testable.
    pub fn ingest_chunk(&mut self, samples: &[f32], now: Instant) -> ChunkEvent {
        match self.mode {
            SessionMode::WaitingForWakeup => self.ingest_wake_chunk(samples, now),
            SessionMode::WaitingForEnrollment => self.ingest_enroll_chunk(samples, now),
            SessionMode::WaitingForEnrollmentConfirm => {
                debug!("session {}: audio ignored while awaiting confirmation", self.id);
                ChunkEvent::None
            }
            SessionMode::AsrActive => self.ingest_asr_chunk(samples, now),
        }
    }

    fn ingest_wake_chunk(&mut self, samples: &[f32], now: Instant) -> ChunkEvent {
        match self.wake.push_chunk(samples) {
            WakeOutcome::Wakened { text, window } => {
                self.audit.dump_kws(&window, &self.discriminator());
                self.is_activated = true;
                self.mode = SessionMode::WaitingForEnrollment;
                self.enroll.reset();
                // The wake audio must not leak into recognition.
                self.reset_asr_state(now);
                info!(
                    "session {}: wakened by '{text}', waiting for enrollment",
                    self.id
                );
                ChunkEvent::Wakened
            }
            outcome => {
                if self.is_activated {
                    // Stale activation from a previous lifecycle.
                    warn!(
                        "session {}: clearing stale activation after failed detection",
                        self.id
                    );
                    self.is_activated = false;
                }
                if outcome == WakeOutcome::Rejected {
                    debug!("session {}: wake window rejected", self.id);
                }
                ChunkEvent::None
            }
        }
    }

    fn ingest_enroll_chunk(&mut self, samples: &[f32], now: Instant) -> ChunkEvent {
        let decision = self.detector.assess(samples, &mut self.vad_cache);
        match self.enroll.observe(samples, decision.is_speech, now) {
            EnrollProgress::Ready if !self.is_enrolled => {
                let sample = self.enroll.take_sample();
                let duration = crate::audio::duration_secs(&sample);
                match self.audit.dump_enroll(&sample, &self.discriminator()) {
                    Some(path) => {
                        info!(
                            "session {}: enrollment completed ({duration:.2}s) -> {}",
                            self.id,
                            path.display()
                        );
                        self.enroll_sample_path = Some(path);
                        self.is_enrolled = true;
                        self.enroll.reset();
                        self.mode = SessionMode::WaitingForEnrollmentConfirm;
                        ChunkEvent::EnrollmentCompleted
                    }
                    None => {
                        warn!(
                            "session {}: cannot persist enrollment sample, restarting capture",
                            self.id
                        );
                        self.enroll.reset();
                        ChunkEvent::None
                    }
                }
            }
            progress => {
                if let EnrollProgress::Capturing {
                    captured_secs,
                    silence_secs,
                } = progress
                {
                    debug!(
                        "session {}: enrolling ({captured_secs:.2}s captured, {silence_secs:.2}s silence)",
                        self.id
                    );
                }
                ChunkEvent::None
            }
        }
    }

    fn ingest_asr_chunk(&mut self, samples: &[f32], now: Instant) -> ChunkEvent {
        let decision = self.detector.assess(samples, &mut self.vad_cache);
        self.endpoint.observe(samples, decision.is_speech, now);
        if self.endpoint.should_finalize() {
            ChunkEvent::ReadyToFinalize
        } else {
            ChunkEvent::None
        }
    }

    /// Run the finalize pass: speaker-separating recognition, verification,
    /// and text correction. Returns recognized text or a reserved sentinel.
    /// Resets the ASR state afterwards; mode, activation, and enrollment
    /// survive so the session keeps listening.
    pub fn finalize(&mut self) -> String {
        let utterance = self.endpoint.take_utterance();
        let policy = GatePolicy {
            sv_enabled: self.use_sv,
            enroll_wav: self.enroll_sample_path.clone(),
            activated: self.is_activated,
        };
        let raw = self.gate.recognize(&utterance, &self.discriminator(), &policy);

        let result = if is_sentinel(&raw) {
            raw
        } else {
            let mut corrected = correct::apply_rules(&raw);
            if corrected != raw {
                info!("session {}: rules corrected '{raw}' -> '{corrected}'", self.id);
            }
            if self.use_llm && !corrected.is_empty() {
                if let Some(llm_text) = self.corrector.correct(&corrected, &self.hotword_words) {
                    corrected = llm_text;
                }
            }
            if correct::is_effectively_empty(&corrected) {
                ASR_RESULT_EMPTY.to_owned()
            } else {
                corrected
            }
        };

        self.reset_asr_state(Instant::now());
        result
    }

    /// `start_asr` control message: valid only while enrolling or awaiting
    /// confirmation. Returns false (and changes nothing) otherwise.
    pub fn start_asr(&mut self) -> bool {
        match self.mode {
            SessionMode::WaitingForEnrollment | SessionMode::WaitingForEnrollmentConfirm => {
                let old_mode = self.mode;
                self.mode = SessionMode::AsrActive;
                self.enroll.reset();
                self.reset_asr_state(Instant::now());
                info!(
                    "session {}: {} -> ASR_ACTIVE (client confirmed)",
                    self.id,
                    old_mode.as_str()
                );
                true
            }
            _ => {
                warn!(
                    "session {}: start_asr ignored in mode {}",
                    self.id,
                    self.mode.as_str()
                );
                false
            }
        }
    }

    /// `use_wake` flag update.
    pub fn set_use_wake(&mut self, on: bool) {
        let effective = on || self.require_wake;
        if effective == self.use_wake {
            return;
        }
        info!("session {}: use_wake {} -> {effective}", self.id, self.use_wake);
        self.use_wake = effective;
        let now = Instant::now();
        if effective {
            if self.mode == SessionMode::AsrActive {
                self.mode = SessionMode::WaitingForWakeup;
                self.is_activated = false;
                self.wake.reset();
                self.reset_asr_state(now);
            }
        } else if self.mode == SessionMode::WaitingForWakeup {
            self.mode = SessionMode::AsrActive;
            self.wake.reset();
            self.reset_asr_state(now);
        }
    }

    /// `use_sv` flag update; disabling clears the enrollment.
    pub fn set_use_sv(&mut self, on: bool) {
        if self.use_sv == on {
            return;
        }
        info!("session {}: use_sv {} -> {on}", self.id, self.use_sv);
        self.use_sv = on;
        if !on {
            self.clear_enrollment();
        }
    }

    /// `use_llm` flag update; global config wins when it disables the pass.
    pub fn set_use_llm(&mut self, on: bool) {
        let effective = on && !self.disable_llm;
        if self.use_llm != effective {
            info!("session {}: use_llm {} -> {effective}", self.id, self.use_llm);
            self.use_llm = effective;
        }
    }

    /// Full reset: wake, enrollment, activation, and ASR state. The restart
    /// mode honors `use_wake`.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.mode = if self.use_wake {
            SessionMode::WaitingForWakeup
        } else {
            SessionMode::AsrActive
        };
        self.is_activated = false;
        self.clear_enrollment();
        self.wake.reset();
        self.reset_asr_state(now);
        info!("session {}: reset (mode={})", self.id, self.mode.as_str());
    }

    /// `cancel_enrollment` control message: force wake mode and reset.
    pub fn cancel_enrollment(&mut self) {
        self.use_wake = true;
        self.reset();
        self.mode = SessionMode::WaitingForWakeup;
    }

    /// Reset only the recognition state; mode, activation, and enrollment
    /// survive. Re-seeds the silence reference so no silence leaks across
    /// the transition.
    pub fn reset_asr_state(&mut self, now: Instant) {
        self.endpoint.reset(now);
        self.vad_cache.clear();
        self.asr_cache.clear();
        self.accumulated_intermediate_text.clear();
    }

    fn clear_enrollment(&mut self) {
        if self.is_enrolled {
            info!("session {}: enrollment cleared", self.id);
        }
        self.is_enrolled = false;
        self.enroll_sample_path = None;
        self.enroll.reset();
    }

    /// Session-unique discriminator for artifact filenames.
    fn discriminator(&self) -> String {
        self.id.chars().take(8).collect()
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Whether a wake phrase is currently required.
    #[must_use]
    pub fn use_wake(&self) -> bool {
        self.use_wake
    }

    /// Whether this session has been activated by a wake-up.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.is_activated
    }

    /// Whether a speaker sample is enrolled.
    #[must_use]
    pub fn is_enrolled(&self) -> bool {
        self.is_enrolled
    }

    /// Endpointer inspection for tests and diagnostics.
    #[must_use]
    pub fn endpointer(&self) -> &AsrEndpointer {
        &self.endpoint
    }
}

/// Whether a gate result is one of the reserved sentinels.
#[must_use]
pub fn is_sentinel(text: &str) -> bool {
    matches!(
        text,
        SV_VERIFICATION_FAILED | SV_NOT_ACTIVATED | ASR_RESULT_EMPTY
    )
}
