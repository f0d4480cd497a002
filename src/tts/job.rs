//! TTS job records.

use serde::Serialize;
use std::time::Instant;

/// Lifecycle states of a synthesis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is synthesizing.
    Processing,
    /// Finished; result available.
    Completed,
    /// Cancelled before completion; partial audio discarded.
    Cancelled,
    /// Failed; error message recorded.
    Error,
}

impl JobStatus {
    /// Terminal states are the only ones cleanup may remove.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

/// Completed-job payload.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// The concatenated output WAV.
    pub wav_bytes: Vec<u8>,
    /// Base64 of `wav_bytes`, ready for the wire.
    pub audio_base64: String,
    /// Size of `wav_bytes`.
    pub audio_size: usize,
}

/// Per-stage and per-segment timing for a completed job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobTiming {
    /// Time spent queued before a worker picked the job up, in ms.
    pub thread_wait_ms: f64,
    /// Segmentation + synthesis + concatenation, in ms.
    pub generation_ms: f64,
    /// Base64 encoding, in ms.
    pub base64_ms: f64,
    /// Total from submission to completion, in ms.
    pub total_ms: f64,
    /// Number of synthesized segments.
    pub segments: usize,
    /// Output audio duration in seconds.
    pub audio_duration_s: f64,
    /// Real-time factor: generation seconds / audio seconds.
    pub rtf: f64,
    /// Per-segment synthesis wall time, in ms.
    pub segment_times_ms: Vec<f64>,
    /// Per-segment audio duration, in seconds.
    pub segment_durations_s: Vec<f64>,
}

/// One synthesis job.
#[derive(Debug)]
pub struct Job {
    /// Current status.
    pub status: JobStatus,
    /// Input text.
    pub text: String,
    /// Requested voice.
    pub voice: String,
    /// Submission wall-clock time (RFC 3339, for operators).
    pub created_at: String,
    /// Submission monotonic time (for timing).
    pub started: Instant,
    /// Result when `Completed`.
    pub result: Option<JobResult>,
    /// Error message when `Error`.
    pub error: Option<String>,
    /// Timing report when `Completed`.
    pub timing: Option<JobTiming>,
    /// Completion wall-clock time.
    pub completed_at: Option<String>,
    /// Cancellation wall-clock time.
    pub cancelled_at: Option<String>,
}

impl Job {
    /// Fresh pending job.
    #[must_use]
    pub fn new(text: String, voice: String) -> Self {
        Self {
            status: JobStatus::Pending,
            text,
            voice,
            created_at: chrono::Local::now().to_rfc3339(),
            started: Instant::now(),
            result: None,
            error: None,
            timing: None,
            completed_at: None,
            cancelled_at: None,
        }
    }
}

/// Status projection handed to the HTTP layer.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// Current status.
    pub status: JobStatus,
    /// Input text.
    pub text: String,
    /// Base64 audio when completed.
    pub audio_base64: Option<String>,
    /// Audio size in bytes when completed.
    pub audio_size: Option<usize>,
    /// Error message when failed.
    pub error: Option<String>,
}
