//! Asynchronous text-to-speech job service.
//!
//! Jobs are UUID-keyed records in a process-wide table. A bounded worker
//! pool synthesizes each job off the transport thread: the text is split
//! into short segments, each segment is synthesized (optionally batched),
//! and the per-segment WAVs are concatenated with inter-segment pauses and
//! boundary crossfades. Cancellation is polled between segments and before
//! the result is stored; a cancelled job's partial audio is discarded.
//!
//! The synthesis engine is loaded exactly once (single-flight): the first
//! worker loads while concurrent workers wait on the load with a bounded
//! timeout, falling back to loading on their own thread if the wait
//! expires.

pub mod concat;
pub mod job;
pub mod segment;

use crate::config::TtsConfig;
use crate::error::{Result, VoiceError};
use crate::models::{ForwardParams, TtsEngine};
use crate::tts::job::{Job, JobResult, JobSnapshot, JobStatus, JobTiming};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

/// Builds the synthesis engine on first use.
pub type EngineFactory = Box<dyn Fn() -> Result<Arc<dyn TtsEngine>> + Send + Sync>;

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No such job.
    NotFound,
    /// The job already completed; its result stands.
    AlreadyCompleted,
    /// The job was already cancelled.
    AlreadyCancelled,
    /// The job is now cancelled.
    Cancelled,
}

/// Outcome of a cleanup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No such job.
    NotFound,
    /// The job is still pending or processing.
    NotTerminal,
    /// The record was deleted.
    Deleted,
}

struct LoaderState {
    engine: Option<Arc<dyn TtsEngine>>,
    loading: bool,
}

/// Single-flight engine loader.
struct EngineLoader {
    state: Mutex<LoaderState>,
    loaded: Condvar,
    factory: EngineFactory,
}

impl EngineLoader {
    fn new(factory: EngineFactory) -> Self {
        Self {
            state: Mutex::new(LoaderState {
                engine: None,
                loading: false,
            }),
            loaded: Condvar::new(),
            factory,
        }
    }

    /// Get the engine, loading it if needed. When another worker is already
    /// loading and `wait_if_loading` is set, waits up to `wait` for that
    /// load; on timeout the calling worker loads synchronously itself.
    fn ensure(&self, wait_if_loading: bool, wait: Duration) -> Result<Arc<dyn TtsEngine>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = &state.engine {
            return Ok(Arc::clone(engine));
        }

        if state.loading && wait_if_loading {
            info!("TTS engine is loading elsewhere, waiting up to {wait:?}");
            let (next, timeout) = self
                .loaded
                .wait_timeout_while(state, wait, |s| s.loading && s.engine.is_none())
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            if let Some(engine) = &state.engine {
                return Ok(Arc::clone(engine));
            }
            if timeout.timed_out() {
                warn!("TTS engine load wait timed out, loading on this worker");
            }
        }

        state.loading = true;
        drop(state);

        let started = Instant::now();
        let result = (self.factory)();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.loading = false;
        match &result {
            Ok(engine) => {
                info!(
                    "TTS engine loaded in {:.0}ms",
                    started.elapsed().as_secs_f64() * 1000.0
                );
                state.engine = Some(Arc::clone(engine));
            }
            Err(e) => warn!("TTS engine load failed: {e}"),
        }
        self.loaded.notify_all();
        result
    }
}

/// The job table plus worker scheduling.
pub struct TtsManager {
    config: TtsConfig,
    jobs: Mutex<HashMap<Uuid, Job>>,
    loader: EngineLoader,
    workers: Arc<Semaphore>,
}

impl TtsManager {
    /// Build a manager; the factory runs at most once, on first synthesis.
    #[must_use]
    pub fn new(config: TtsConfig, factory: EngineFactory) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
            loader: EngineLoader::new(factory),
            workers,
        }
    }

    /// Submit a job. Returns its id; the worker runs in the background.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Job`] when the text is empty or whitespace.
    pub fn start(self: &Arc<Self>, text: String, voice: Option<String>) -> Result<Uuid> {
        if text.trim().is_empty() {
            return Err(VoiceError::Job("text must not be empty".into()));
        }
        let voice = voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.config.default_voice.clone());

        let id = Uuid::new_v4();
        self.lock_jobs().insert(id, Job::new(text, voice));
        info!("TTS job {id} queued");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(permit) = Arc::clone(&manager.workers).acquire_owned().await else {
                manager.mark_error(id, "worker pool closed");
                return;
            };
            let worker = Arc::clone(&manager);
            let joined = tokio::task::spawn_blocking(move || worker.run_job(id)).await;
            if let Err(e) = joined {
                manager.mark_error(id, &format!("synthesis worker panicked: {e}"));
            }
            drop(permit);
        });

        Ok(id)
    }

    /// Cancel a job unless it already completed.
    pub fn cancel(&self, id: Uuid) -> CancelOutcome {
        let mut jobs = self.lock_jobs();
        let Some(job) = jobs.get_mut(&id) else {
            return CancelOutcome::NotFound;
        };
        match job.status {
            JobStatus::Completed => CancelOutcome::AlreadyCompleted,
            JobStatus::Cancelled => CancelOutcome::AlreadyCancelled,
            _ => {
                job.status = JobStatus::Cancelled;
                job.cancelled_at = Some(chrono::Local::now().to_rfc3339());
                info!("TTS job {id} cancelled");
                CancelOutcome::Cancelled
            }
        }
    }

    /// Current status projection of a job.
    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<JobSnapshot> {
        let jobs = self.lock_jobs();
        let job = jobs.get(&id)?;
        Some(JobSnapshot {
            status: job.status,
            text: job.text.clone(),
            audio_base64: job.result.as_ref().map(|r| r.audio_base64.clone()),
            audio_size: job.result.as_ref().map(|r| r.audio_size),
            error: job.error.clone(),
        })
    }

    /// Timing report of a completed job.
    #[must_use]
    pub fn timing(&self, id: Uuid) -> Option<JobTiming> {
        self.lock_jobs().get(&id).and_then(|j| j.timing.clone())
    }

    /// Delete a terminal job record.
    pub fn cleanup(&self, id: Uuid) -> CleanupOutcome {
        let mut jobs = self.lock_jobs();
        let Some(job) = jobs.get(&id) else {
            return CleanupOutcome::NotFound;
        };
        if !job.status.is_terminal() {
            return CleanupOutcome::NotTerminal;
        }
        jobs.remove(&id);
        CleanupOutcome::Deleted
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self, id: Uuid) -> bool {
        self.lock_jobs()
            .get(&id)
            .is_none_or(|j| j.status == JobStatus::Cancelled)
    }

    fn mark_error(&self, id: Uuid, message: &str) {
        let mut jobs = self.lock_jobs();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status != JobStatus::Cancelled {
                job.status = JobStatus::Error;
                job.error = Some(message.to_owned());
            }
        }
    }

    /// Worker entry point; runs on the blocking pool.
    fn run_job(&self, id: Uuid) {
        let (text, voice, started) = {
            let mut jobs = self.lock_jobs();
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            if job.status == JobStatus::Cancelled {
                return;
            }
            job.status = JobStatus::Processing;
            (job.text.clone(), job.voice.clone(), job.started)
        };
        let thread_wait_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            "TTS job {id} started (queued {thread_wait_ms:.0}ms, {} chars)",
            text.chars().count()
        );

        match self.synthesize(id, &text, &voice) {
            Ok(Some((wav_bytes, mut timing))) => {
                timing.thread_wait_ms = thread_wait_ms;
                timing.total_ms = started.elapsed().as_secs_f64() * 1000.0;

                let base64_start = Instant::now();
                let audio_base64 = BASE64.encode(&wav_bytes);
                timing.base64_ms = base64_start.elapsed().as_secs_f64() * 1000.0;

                let mut jobs = self.lock_jobs();
                let Some(job) = jobs.get_mut(&id) else {
                    return;
                };
                if job.status == JobStatus::Cancelled {
                    info!("TTS job {id} cancelled, result discarded");
                    return;
                }
                info!(
                    "TTS job {id} completed: {} bytes, {:.2}s audio, rtf={:.3}",
                    wav_bytes.len(),
                    timing.audio_duration_s,
                    timing.rtf
                );
                job.result = Some(JobResult {
                    audio_size: wav_bytes.len(),
                    audio_base64,
                    wav_bytes,
                });
                job.timing = Some(timing);
                job.status = JobStatus::Completed;
                job.completed_at = Some(chrono::Local::now().to_rfc3339());
            }
            Ok(None) => info!("TTS job {id} cancelled mid-synthesis, partial audio discarded"),
            Err(e) => {
                warn!("TTS job {id} failed: {e}");
                self.mark_error(id, &e.to_string());
            }
        }
    }

    /// Synthesize all segments and concatenate. `Ok(None)` means the job
    /// was cancelled between segments.
    fn synthesize(&self, id: Uuid, text: &str, voice: &str) -> Result<Option<(Vec<u8>, JobTiming)>> {
        let engine = self
            .loader
            .ensure(true, Duration::from_secs(self.config.load_wait_secs))?;

        let segments = segment::split_for_tts(
            text,
            self.config.seg_target,
            self.config.seg_first_target,
            self.config.seg_hard_max,
        );
        if segments.is_empty() {
            return Err(VoiceError::Tts("empty text after normalization".into()));
        }
        info!(
            "TTS job {id}: {} segments, lens={:?}",
            segments.len(),
            segments.iter().map(|s| s.chars().count()).collect::<Vec<_>>()
        );

        let params = ForwardParams {
            beam_size: self.config.beam_size,
            sampling_rate: self.config.sampling_rate,
        };
        let pauses: Vec<u32> = segments
            .iter()
            .take(segments.len().saturating_sub(1))
            .map(|s| segment::pause_after(s, self.config.pause_hard_ms, self.config.pause_soft_ms))
            .collect();

        let generation_start = Instant::now();
        let mut wav_chunks: Vec<Vec<u8>> = vec![Vec::new(); segments.len()];
        let mut segment_times_ms = vec![0.0f64; segments.len()];

        if self.config.parallel_segments && segments.len() > 1 {
            // Only safe with a thread-safe backend; off by default.
            let results: Vec<Result<(Vec<u8>, f64)>> = std::thread::scope(|scope| {
                let handles: Vec<_> = segments
                    .iter()
                    .map(|seg| {
                        let engine = Arc::clone(&engine);
                        let params = &params;
                        scope.spawn(move || {
                            let t0 = Instant::now();
                            let wav = engine.synthesize(seg, voice, params)?;
                            Ok((wav, t0.elapsed().as_secs_f64() * 1000.0))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| match h.join() {
                        Ok(result) => result,
                        Err(_) => Err(VoiceError::Tts("segment synthesis panicked".into())),
                    })
                    .collect()
            });
            for (idx, result) in results.into_iter().enumerate() {
                let (wav, elapsed_ms) = result?;
                wav_chunks[idx] = wav;
                segment_times_ms[idx] = elapsed_ms;
            }
            if self.is_cancelled(id) {
                return Ok(None);
            }
        } else if self.config.use_batch && segments.len() > 1 {
            let mut start = 0;
            while start < segments.len() {
                if self.is_cancelled(id) {
                    return Ok(None);
                }
                let end = (start + self.config.batch_size.max(1)).min(segments.len());
                let batch = &segments[start..end];
                let t0 = Instant::now();
                match engine.synthesize_batch(batch, voice, &params) {
                    Ok(wavs) => {
                        let batch_ms = t0.elapsed().as_secs_f64() * 1000.0;
                        for (offset, wav) in wavs.into_iter().enumerate() {
                            wav_chunks[start + offset] = wav;
                            segment_times_ms[start + offset] = batch_ms;
                        }
                    }
                    Err(e) => {
                        // Backend rejected list input; per-segment calls.
                        warn!("TTS job {id}: batch synthesis unavailable ({e}), per-segment fallback");
                        for idx in start..end {
                            if self.is_cancelled(id) {
                                return Ok(None);
                            }
                            let t0 = Instant::now();
                            wav_chunks[idx] = engine.synthesize(&segments[idx], voice, &params)?;
                            segment_times_ms[idx] = t0.elapsed().as_secs_f64() * 1000.0;
                        }
                    }
                }
                start = end;
            }
        } else {
            for (idx, seg) in segments.iter().enumerate() {
                if self.is_cancelled(id) {
                    return Ok(None);
                }
                let t0 = Instant::now();
                wav_chunks[idx] = engine.synthesize(seg, voice, &params)?;
                segment_times_ms[idx] = t0.elapsed().as_secs_f64() * 1000.0;
            }
        }

        let segment_durations_s: Vec<f64> = wav_chunks
            .iter()
            .map(|wav| concat::wav_duration_secs(wav))
            .collect();
        for ((idx, ms), dur) in segment_times_ms
            .iter()
            .enumerate()
            .zip(segment_durations_s.iter())
        {
            let rtf = if *dur > 1e-6 { ms / 1000.0 / dur } else { 0.0 };
            info!("TTS job {id}: seg#{} {ms:.0}ms, {dur:.2}s audio, rtf={rtf:.3}", idx + 1);
        }

        let wav = concat::concat_wavs(&wav_chunks, &pauses, self.config.crossfade_ms)?;
        let generation_ms = generation_start.elapsed().as_secs_f64() * 1000.0;
        let audio_duration_s = concat::wav_duration_secs(&wav);
        let rtf = if audio_duration_s > 1e-6 {
            generation_ms / 1000.0 / audio_duration_s
        } else {
            0.0
        };

        if self.is_cancelled(id) {
            return Ok(None);
        }

        Ok(Some((
            wav,
            JobTiming {
                generation_ms,
                segments: segments.len(),
                audio_duration_s,
                rtf,
                segment_times_ms,
                segment_durations_s,
                ..JobTiming::default()
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Synthesizes 100 ms of flat tone per input character.
    struct StubEngine {
        delay: Duration,
        supports_batch: bool,
        calls: AtomicUsize,
    }

    impl StubEngine {
        fn tone(chars: usize) -> Vec<u8> {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 16_000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::new());
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
                for _ in 0..(1600 * chars) {
                    writer.write_sample(4000i16).unwrap();
                }
                writer.finalize().unwrap();
            }
            cursor.into_inner()
        }
    }

    impl TtsEngine for StubEngine {
        fn synthesize(&self, text: &str, _voice: &str, _params: &ForwardParams) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(Self::tone(text.chars().count()))
        }

        fn synthesize_batch(
            &self,
            texts: &[String],
            voice: &str,
            params: &ForwardParams,
        ) -> Result<Vec<Vec<u8>>> {
            if !self.supports_batch {
                return Err(VoiceError::Tts("backend does not accept list input".into()));
            }
            texts
                .iter()
                .map(|t| self.synthesize(t, voice, params))
                .collect()
        }
    }

    fn manager_with(delay_ms: u64, supports_batch: bool) -> Arc<TtsManager> {
        let factory: EngineFactory = Box::new(move || {
            Ok(Arc::new(StubEngine {
                delay: Duration::from_millis(delay_ms),
                supports_batch,
                calls: AtomicUsize::new(0),
            }) as Arc<dyn TtsEngine>)
        });
        Arc::new(TtsManager::new(TtsConfig::default(), factory))
    }

    async fn wait_terminal(manager: &Arc<TtsManager>, id: Uuid) -> JobSnapshot {
        for _ in 0..200 {
            if let Some(snapshot) = manager.snapshot(id) {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not reach a terminal state");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn job_completes_with_audio_and_timing() {
        let manager = manager_with(1, true);
        let id = manager
            .start("测试一。测试二，测试三！".to_owned(), None)
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.audio_size.unwrap() > 0);
        assert!(!snapshot.audio_base64.unwrap().is_empty());

        let timing = manager.timing(id).unwrap();
        assert_eq!(timing.segments, 3);
        assert_eq!(timing.segment_durations_s.len(), 3);
        // 3 segments of 4 chars → 0.4 s each, +200+120 ms pauses, −2×60 ms.
        assert!((timing.audio_duration_s - 1.4).abs() < 0.01);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_rejection_falls_back_to_per_segment() {
        let manager = manager_with(1, false);
        let id = manager
            .start("测试一。测试二，测试三！".to_owned(), None)
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_text_is_rejected_at_submission() {
        let manager = manager_with(1, true);
        assert!(manager.start("   ".to_owned(), None).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_discards_partial_audio() {
        // Slow segments give the cancel a window.
        let manager = manager_with(150, false);
        let long_text = "第一句话。第二句话。第三句话。第四句话。".to_owned();
        let id = manager.start(long_text, None).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let outcome = manager.cancel(id);
        assert!(matches!(
            outcome,
            CancelOutcome::Cancelled | CancelOutcome::AlreadyCancelled
        ));
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(snapshot.audio_base64.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_after_completion_is_refused() {
        let manager = manager_with(1, true);
        let id = manager.start("短句。".to_owned(), None).unwrap();
        let _ = wait_terminal(&manager, id).await;
        assert_eq!(manager.cancel(id), CancelOutcome::AlreadyCompleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_only_removes_terminal_jobs() {
        let manager = manager_with(100, false);
        let id = manager.start("第一句话。第二句话。".to_owned(), None).unwrap();
        // Still pending/processing.
        assert_eq!(manager.cleanup(id), CleanupOutcome::NotTerminal);
        let _ = wait_terminal(&manager, id).await;
        assert_eq!(manager.cleanup(id), CleanupOutcome::Deleted);
        assert!(manager.snapshot(id).is_none());
        assert_eq!(manager.cleanup(id), CleanupOutcome::NotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engine_loads_once_across_jobs() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let factory: EngineFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubEngine {
                delay: Duration::from_millis(1),
                supports_batch: true,
                calls: AtomicUsize::new(0),
            }) as Arc<dyn TtsEngine>)
        });
        let manager = Arc::new(TtsManager::new(TtsConfig::default(), factory));

        let a = manager.start("第一个任务。".to_owned(), None).unwrap();
        let b = manager.start("第二个任务。".to_owned(), None).unwrap();
        let _ = wait_terminal(&manager, a).await;
        let _ = wait_terminal(&manager, b).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_job_is_not_found() {
        let manager = manager_with(1, true);
        let id = Uuid::new_v4();
        assert!(manager.snapshot(id).is_none());
        assert_eq!(manager.cancel(id), CancelOutcome::NotFound);
        assert_eq!(manager.cleanup(id), CleanupOutcome::NotFound);
    }
}
