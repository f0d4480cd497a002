//! Speaker-verification gate.
//!
//! Runs at finalize time: the utterance is transcribed by the
//! speaker-separating recognizer, sentences are grouped per speaker, and —
//! when verification is active — each group's audio is compared against the
//! enrolled sample. Only the accepted group's text leaves the gate; everyone
//! else's speech is dropped.

use crate::audio::{self, AuditSink, SAMPLE_RATE};
use crate::models::adapter::{self, SentenceReading, SvReading};
use crate::models::{SpeakerSeparator, SpeakerVerifier};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reserved result string: verification rejected the utterance.
pub const SV_VERIFICATION_FAILED: &str = "__SV_VERIFICATION_FAILED__";
/// Reserved result string: verification requested without a wake-up.
pub const SV_NOT_ACTIVATED: &str = "__SV_NOT_ACTIVATED__";
/// Reserved result string: recognition produced no usable text.
pub const ASR_RESULT_EMPTY: &str = "__ASR_RESULT_EMPTY__";

/// Gap between consecutive sentences (ms) above which a single reported
/// speaker is split into synthetic speakers. Compensates for models that
/// under-segment multi-party audio.
const SINGLE_SPEAKER_GAP_MS: i64 = 800;

/// Verification inputs derived from session state.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    /// Whether speaker verification is enabled for the session.
    pub sv_enabled: bool,
    /// The enrolled reference sample, when one exists.
    pub enroll_wav: Option<PathBuf>,
    /// Whether the session was activated by a wake-up.
    pub activated: bool,
}

/// One speaker's sentences, time-ordered.
#[derive(Debug, Clone, PartialEq)]
struct SpeakerGroup {
    speaker: i64,
    sentences: Vec<SentenceReading>,
}

impl SpeakerGroup {
    fn text(&self) -> String {
        self.sentences
            .iter()
            .map(|s| s.text.as_str())
            .collect::<String>()
    }
}

/// The finalize-time recognition and verification gate.
pub struct VerificationGate {
    separator: Arc<dyn SpeakerSeparator>,
    verifier: Arc<dyn SpeakerVerifier>,
    audit: AuditSink,
    sv_threshold: f32,
    hotword: String,
    disable_lm: bool,
}

impl VerificationGate {
    /// Build the gate over the process-wide model singletons.
    #[must_use]
    pub fn new(
        separator: Arc<dyn SpeakerSeparator>,
        verifier: Arc<dyn SpeakerVerifier>,
        audit: AuditSink,
        sv_threshold: f32,
        hotword: String,
        disable_lm: bool,
    ) -> Self {
        Self {
            separator,
            verifier,
            audit,
            sv_threshold,
            hotword,
            disable_lm,
        }
    }

    /// Recognize a finalized utterance and apply the verification policy.
    ///
    /// Always returns a string: recognized text or one of the reserved
    /// result sentinels. Inference failures never escape as errors.
    pub fn recognize(&self, samples: &[f32], discriminator: &str, policy: &GatePolicy) -> String {
        let Some(utterance_wav) = self.audit.dump_utterance(samples, discriminator) else {
            warn!("cannot persist finalized utterance, returning empty result");
            return ASR_RESULT_EMPTY.to_owned();
        };

        let verifying = policy.sv_enabled && policy.enroll_wav.is_some();
        if verifying && !policy.activated {
            info!("verification requested without activation, rejecting");
            self.cleanup(&[], &utterance_wav);
            return SV_NOT_ACTIVATED.to_owned();
        }

        let batch_size_s = batch_size_for(audio::duration_secs(samples));
        let payload = match self.separator.separate(
            &utterance_wav,
            batch_size_s,
            &self.hotword,
            self.disable_lm,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("speaker separation failed: {e}");
                self.cleanup(&[], &utterance_wav);
                return ASR_RESULT_EMPTY.to_owned();
            }
        };

        let sentences = adapter::sentences(&payload);
        if sentences.is_empty() || sentences.iter().any(|s| s.speaker.is_none()) {
            debug!(
                "separation produced {} sentences, speaker ids {}complete",
                sentences.len(),
                if sentences.iter().any(|s| s.speaker.is_none()) {
                    "in"
                } else {
                    ""
                }
            );
            self.cleanup(&[], &utterance_wav);
            return ASR_RESULT_EMPTY.to_owned();
        }

        let groups = group_by_speaker(sentences);

        if !verifying {
            let text: String = groups.iter().map(|g| g.text()).collect();
            self.cleanup(&[], &utterance_wav);
            return text;
        }

        // Policy checks above guarantee the enrollment path exists here.
        let Some(enroll_wav) = policy.enroll_wav.as_deref() else {
            self.cleanup(&[], &utterance_wav);
            return SV_VERIFICATION_FAILED.to_owned();
        };

        let mut temp_wavs: Vec<PathBuf> = Vec::new();
        let mut verdicts: Vec<(usize, SvReading)> = Vec::new();

        for (idx, group) in groups.iter().enumerate() {
            let splice = splice_sentences(samples, &group.sentences);
            if splice.is_empty() {
                continue;
            }
            let speaker_tag = format!("{discriminator}_spk{}", group.speaker);
            let Some(speaker_wav) = self.audit.dump_speaker(&splice, &speaker_tag) else {
                continue;
            };
            temp_wavs.push(speaker_wav.clone());

            match self.verifier.verify(enroll_wav, &speaker_wav) {
                Ok(payload) => {
                    let reading = adapter::sv_reading(&payload);
                    info!(
                        "speaker {} verification: verdict={:?} score={:?}",
                        group.speaker, reading.verdict, reading.score
                    );
                    verdicts.push((idx, reading));
                }
                Err(e) => warn!("verification call failed for speaker {}: {e}", group.speaker),
            }
        }

        let result = self.select(&groups, &verdicts);
        self.cleanup(&temp_wavs, &utterance_wav);
        result
    }

    /// Apply the per-group decision policy and pick the accepted group.
    fn select(&self, groups: &[SpeakerGroup], verdicts: &[(usize, SvReading)]) -> String {
        let scored: Vec<(usize, f32)> = verdicts
            .iter()
            .filter_map(|(idx, reading)| reading.score.map(|score| (*idx, score)))
            .collect();

        if scored.is_empty() {
            return SV_VERIFICATION_FAILED.to_owned();
        }

        if groups.len() == 1 {
            let (idx, reading) = &verdicts[0];
            if self.passes(reading) {
                return groups[*idx].text();
            }
            return SV_VERIFICATION_FAILED.to_owned();
        }

        let Some(&(best_idx, best_score)) = scored
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return SV_VERIFICATION_FAILED.to_owned();
        };

        if best_score >= self.sv_threshold {
            groups[best_idx].text()
        } else {
            SV_VERIFICATION_FAILED.to_owned()
        }
    }

    /// Pass rule: score above threshold passes; a score exactly at the
    /// threshold defers to the verdict text; no score fails.
    fn passes(&self, reading: &SvReading) -> bool {
        match reading.score {
            None => false,
            Some(score) if (score - self.sv_threshold).abs() <= f32::EPSILON => {
                reading.verdict.as_deref() != Some("no")
            }
            Some(score) => score > self.sv_threshold,
        }
    }

    /// Remove temp speaker splices unconditionally; remove the utterance
    /// WAV unless audit retention is on.
    fn cleanup(&self, temp_wavs: &[PathBuf], utterance_wav: &PathBuf) {
        for path in temp_wavs {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("could not remove temp speaker WAV {}: {e}", path.display());
            }
        }
        if !self.audit.retain_artifacts() {
            if let Err(e) = std::fs::remove_file(utterance_wav) {
                debug!(
                    "could not remove utterance WAV {}: {e}",
                    utterance_wav.display()
                );
            }
        }
    }
}

/// Batch parameter for the separator, scaled by utterance length.
fn batch_size_for(duration_secs: f32) -> u32 {
    if duration_secs < 30.0 {
        60
    } else if duration_secs < 60.0 {
        120
    } else {
        300
    }
}

/// Group sentences by speaker id (sorted by start time within each group),
/// splitting an under-segmented single speaker at long gaps.
fn group_by_speaker(mut sentences: Vec<SentenceReading>) -> Vec<SpeakerGroup> {
    sentences.sort_by_key(|s| s.start_ms.unwrap_or(i64::MAX));

    let distinct: std::collections::BTreeSet<i64> =
        sentences.iter().filter_map(|s| s.speaker).collect();

    if distinct.len() == 1 {
        let base = sentences
            .first()
            .and_then(|s| s.speaker)
            .unwrap_or_default();
        let mut synthetic = base;
        let mut previous_end: Option<i64> = None;
        for sentence in &mut sentences {
            if let (Some(prev_end), Some(start)) = (previous_end, sentence.start_ms) {
                if start - prev_end > SINGLE_SPEAKER_GAP_MS {
                    synthetic += 1;
                }
            }
            previous_end = sentence.end_ms.or(previous_end);
            sentence.speaker = Some(synthetic);
        }
    }

    let mut grouped: BTreeMap<i64, Vec<SentenceReading>> = BTreeMap::new();
    for sentence in sentences {
        let speaker = sentence.speaker.unwrap_or_default();
        grouped.entry(speaker).or_default().push(sentence);
    }

    grouped
        .into_iter()
        .map(|(speaker, mut sentences)| {
            sentences.sort_by_key(|s| s.start_ms.unwrap_or(i64::MAX));
            SpeakerGroup {
                speaker,
                sentences,
            }
        })
        .collect()
}

/// Splice the `[start, end]` spans of a group's sentences out of the
/// finalized utterance.
fn splice_sentences(samples: &[f32], sentences: &[SentenceReading]) -> Vec<f32> {
    let ms_to_sample = |ms: i64| ((ms.max(0) as usize) * SAMPLE_RATE as usize) / 1000;
    let mut out = Vec::new();
    for sentence in sentences {
        let (Some(start_ms), Some(end_ms)) = (sentence.start_ms, sentence.end_ms) else {
            continue;
        };
        let start = ms_to_sample(start_ms).min(samples.len());
        let end = ms_to_sample(end_ms).min(samples.len());
        if end > start {
            out.extend_from_slice(&samples[start..end]);
        }
    }
    out
}
