//! Nightingale: real-time voice front-end for a medical triage assistant.
//!
//! Two coupled services share one process:
//!
//! - **Voice channel**: per-session WebSocket pipeline —
//!   wake-word spotting → speaker enrollment → verified streaming
//!   recognition with silence endpointing → deterministic + LLM text
//!   correction.
//! - **TTS jobs**: asynchronous text-to-WAV synthesis with
//!   punctuation-aware segmentation, per-segment inference, and
//!   pause/crossfade concatenation.
//!
//! # Architecture
//!
//! Per-session state (buffers, timers, mode) is owned by that session's
//! transport task and travels through the blocking worker pool for every
//! inference-heavy step. The models themselves (streaming VAD, keyword
//! spotting, speaker-separating recognition, speaker verification, TTS
//! synthesis) are process-wide singletons behind the narrow traits in
//! [`models`], consumed through payload adapters so no caller depends on a
//! backend's raw output shape.

pub mod audio;
pub mod config;
pub mod correct;
pub mod error;
pub mod kws;
pub mod models;
pub mod server;
pub mod session;
pub mod sv;
pub mod tts;
pub mod vad;

pub use config::ServiceConfig;
pub use error::{Result, VoiceError};
pub use session::{ChunkEvent, Session, SessionMode};
pub use tts::TtsManager;
