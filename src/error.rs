//! Error types for the nightingale voice services.

/// Top-level error type for the voice pipeline and the TTS job service.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Audio decode/encode error (malformed WAV, unsupported layout).
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Keyword-spotting (wake word) error.
    #[error("KWS error: {0}")]
    Kws(String),

    /// Speech recognition / speaker separation error.
    #[error("ASR error: {0}")]
    Asr(String),

    /// Speaker verification error.
    #[error("SV error: {0}")]
    Sv(String),

    /// Text post-correction error (deterministic rules or LLM pass).
    #[error("correction error: {0}")]
    Correction(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// TTS job bookkeeping error (unknown id, invalid state transition).
    #[error("job error: {0}")]
    Job(String),

    /// Session state error.
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
