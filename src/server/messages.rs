//! Wire message models for the voice channel.
//!
//! Clients send JSON objects that may carry a control `type`, feature-flag
//! updates, and/or an audio chunk. The server replies with typed JSON
//! objects, every one carrying a `type`.

use crate::sv::{ASR_RESULT_EMPTY, SV_NOT_ACTIVATED, SV_VERIFICATION_FAILED};
use serde::Deserialize;
use serde_json::{Value, json};

/// Error code: the client sent an empty frame.
pub const ERR_EMPTY_MESSAGE: &str = "EMPTY_MESSAGE";
/// Error code: the frame is not valid JSON.
pub const ERR_INVALID_JSON: &str = "INVALID_JSON";
/// Error code: no audio field in a non-control message.
pub const ERR_MISSING_AUDIO_DATA: &str = "MISSING_AUDIO_DATA";
/// Error code: the audio payload could not be decoded.
pub const ERR_AUDIO_DECODE_ERROR: &str = "AUDIO_DECODE_ERROR";
/// Error code: session state could not be created.
pub const ERR_SESSION_CREATE_ERROR: &str = "SESSION_CREATE_ERROR";
/// Error code: chunk processing failed.
pub const ERR_PROCESSING_ERROR: &str = "PROCESSING_ERROR";

/// User-facing message for a rejected or empty utterance.
const MSG_RETRY: &str = "抱歉，请再说一遍！";
/// User-facing message for an unauthenticated speaker.
const MSG_NOT_ACTIVATED: &str = "非认证注册声音，拒绝访问。";

/// One inbound client frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    /// Control type (`start_asr`, `cancel_enrollment`, `end_conversation`).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Audio chunk, base64 WAV.
    pub wav_base64: Option<String>,
    /// Audio chunk, legacy field name.
    pub audio_data: Option<String>,
    /// Wake-requirement flag update.
    pub use_wake: Option<bool>,
    /// Speaker-verification flag update.
    pub use_sv: Option<bool>,
    /// LLM-correction flag update.
    pub use_llm: Option<bool>,
}

impl ClientMessage {
    /// The audio payload, whichever field carried it.
    #[must_use]
    pub fn audio(&self) -> Option<&str> {
        self.wav_base64
            .as_deref()
            .or(self.audio_data.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Greeting sent right after the connection is accepted.
#[must_use]
pub fn welcome(use_wake: bool, mode: &str) -> Value {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    json!({
        "type": "welcome",
        "message": "Connected to voice recognition service",
        "timestamp": timestamp,
        "use_wake": use_wake,
        "mode": mode,
    })
}

/// Wake-up notification.
#[must_use]
pub fn wakeup() -> Value {
    json!({
        "type": "wakeup",
        "status": "activated",
        "message": "系统已唤醒，等待声纹录制",
    })
}

/// Enrollment-completed notification.
#[must_use]
pub fn enrollment_completed() -> Value {
    json!({
        "type": "enrollment_completed",
        "status": "completed",
        "message": "Enrollment is completed, please close the window.",
    })
}

/// Generic status reply (`asr_started`, `enrollment_cancelled`,
/// `conversation_ended`).
#[must_use]
pub fn status(status: &str, message: &str) -> Value {
    json!({
        "type": "status",
        "status": status,
        "message": message,
    })
}

/// Finalize-in-progress notification.
#[must_use]
pub fn finalizing() -> Value {
    json!({
        "type": "processing",
        "status": "finalizing",
        "message": "正在处理音频...",
    })
}

/// Final result reply; reserved sentinels map to failures with their
/// user-facing messages.
#[must_use]
pub fn result(final_text: &str) -> Value {
    match final_text {
        SV_VERIFICATION_FAILED | ASR_RESULT_EMPTY => result_failed(MSG_RETRY),
        SV_NOT_ACTIVATED => result_failed(MSG_NOT_ACTIVATED),
        text => json!({
            "type": "result",
            "status": "completed",
            "text": text,
            "success": true,
        }),
    }
}

fn result_failed(message: &str) -> Value {
    json!({
        "type": "result",
        "status": "completed",
        "text": "",
        "success": false,
        "message": message,
    })
}

/// Typed error reply.
#[must_use]
pub fn error(message: &str, code: &str) -> Value {
    json!({
        "type": "error",
        "message": message,
        "code": code,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn audio_field_prefers_wav_base64_and_accepts_legacy() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"wav_base64": "abc", "audio_data": "def"}"#).unwrap();
        assert_eq!(msg.audio(), Some("abc"));

        let msg: ClientMessage = serde_json::from_str(r#"{"audio_data": "def"}"#).unwrap();
        assert_eq!(msg.audio(), Some("def"));

        let msg: ClientMessage = serde_json::from_str(r#"{"wav_base64": ""}"#).unwrap();
        assert_eq!(msg.audio(), None);
    }

    #[test]
    fn control_and_flags_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "start_asr", "use_sv": false}"#).unwrap();
        assert_eq!(msg.kind.as_deref(), Some("start_asr"));
        assert_eq!(msg.use_sv, Some(false));
        assert_eq!(msg.use_wake, None);
    }

    #[test]
    fn sentinels_map_to_failure_replies() {
        let reply = result(SV_VERIFICATION_FAILED);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["message"], MSG_RETRY);
        assert_eq!(reply["text"], "");

        let reply = result(SV_NOT_ACTIVATED);
        assert_eq!(reply["message"], MSG_NOT_ACTIVATED);

        let reply = result(ASR_RESULT_EMPTY);
        assert_eq!(reply["success"], false);
    }

    #[test]
    fn plain_text_is_a_success_reply() {
        let reply = result("我头疼");
        assert_eq!(reply["success"], true);
        assert_eq!(reply["text"], "我头疼");
        assert_eq!(reply["type"], "result");
    }

    #[test]
    fn welcome_carries_wake_state_and_mode() {
        let reply = welcome(true, "WAITING_FOR_WAKEUP");
        assert_eq!(reply["type"], "welcome");
        assert_eq!(reply["use_wake"], true);
        assert_eq!(reply["mode"], "WAITING_FOR_WAKEUP");
        assert!(reply["timestamp"].as_f64().unwrap() > 0.0);
    }
}
