//! HTTP-backed inferencer implementations.
//!
//! The acoustic models run in a separate inference gateway process (GPU
//! sidecar). Each trait call is one JSON POST carrying the audio as a base64
//! 16-bit WAV; the gateway's raw result payload is returned untouched so the
//! [`super::adapter`] layer stays the single place that interprets shapes.
//!
//! All calls use the blocking client: they only ever execute on the blocking
//! worker pool.

use crate::audio;
use crate::config::ModelsConfig;
use crate::error::{Result, VoiceError};
use crate::models::{
    ForwardParams, KeywordSpotter, ModelCache, SpeakerSeparator, SpeakerVerifier, StreamingVad,
    TtsEngine,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;

/// Client for the VAD/KWS/ASR/SV inference gateway.
pub struct RemoteModelGateway {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl RemoteModelGateway {
    /// Build a gateway client from config.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("cannot build gateway client: {e}")))?;
        Ok(Self {
            base_url: config.gateway_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn post(&self, path: &str, body: Value) -> std::result::Result<Value, String> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| format!("gateway request failed ({url}): {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("gateway returned {status} for {url}"));
        }
        response
            .json::<Value>()
            .map_err(|e| format!("gateway returned non-JSON body ({url}): {e}"))
    }

    fn wav_field(samples: &[f32]) -> Result<String> {
        Ok(BASE64.encode(audio::encode_wav_bytes(samples)?))
    }

    fn file_field(path: &Path) -> std::io::Result<String> {
        Ok(BASE64.encode(std::fs::read(path)?))
    }
}

impl StreamingVad for RemoteModelGateway {
    fn stream(
        &self,
        samples: &[f32],
        cache: &mut ModelCache,
        is_final: bool,
        chunk_ms: u32,
    ) -> Result<Value> {
        let body = json!({
            "audio_base64": Self::wav_field(samples)?,
            "cache": cache.raw(),
            "is_final": is_final,
            "chunk_size": chunk_ms,
        });
        let mut reply = self
            .post("/vad/stream", body)
            .map_err(VoiceError::Vad)?;
        if let Some(next) = reply.get_mut("cache").map(Value::take) {
            cache.replace(next);
        }
        Ok(reply.get_mut("result").map(Value::take).unwrap_or(reply))
    }
}

impl KeywordSpotter for RemoteModelGateway {
    fn spot(&self, window: &[f32]) -> Result<Value> {
        let body = json!({
            "audio_base64": Self::wav_field(window)?,
            "is_final": true,
        });
        let mut reply = self.post("/kws/spot", body).map_err(VoiceError::Kws)?;
        Ok(reply.get_mut("result").map(Value::take).unwrap_or(reply))
    }
}

impl SpeakerSeparator for RemoteModelGateway {
    fn separate(
        &self,
        wav: &Path,
        batch_size_s: u32,
        hotword: &str,
        disable_lm: bool,
    ) -> Result<Value> {
        let audio_base64 = Self::file_field(wav)
            .map_err(|e| VoiceError::Asr(format!("cannot read {}: {e}", wav.display())))?;
        let body = json!({
            "audio_base64": audio_base64,
            "batch_size_s": batch_size_s,
            "hotword": hotword,
            "sentence_timestamp": true,
            "disable_lm": disable_lm,
        });
        let mut reply = self.post("/asr/separate", body).map_err(VoiceError::Asr)?;
        Ok(reply.get_mut("result").map(Value::take).unwrap_or(reply))
    }
}

impl SpeakerVerifier for RemoteModelGateway {
    fn verify(&self, enroll_wav: &Path, probe_wav: &Path) -> Result<Value> {
        let enroll = Self::file_field(enroll_wav)
            .map_err(|e| VoiceError::Sv(format!("cannot read {}: {e}", enroll_wav.display())))?;
        let probe = Self::file_field(probe_wav)
            .map_err(|e| VoiceError::Sv(format!("cannot read {}: {e}", probe_wav.display())))?;
        let body = json!({
            "enroll_base64": enroll,
            "probe_base64": probe,
        });
        let mut reply = self.post("/sv/verify", body).map_err(VoiceError::Sv)?;
        Ok(reply.get_mut("result").map(Value::take).unwrap_or(reply))
    }
}

/// Client for the TTS synthesis backend.
pub struct RemoteTtsEngine {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl RemoteTtsEngine {
    /// Build a synthesis client from config.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("cannot build TTS client: {e}")))?;
        Ok(Self {
            base_url: config.gateway_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn post(&self, body: Value) -> Result<Value> {
        let url = format!("{}/tts/synthesize", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Tts(format!("synthesis request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Tts(format!("synthesis backend returned {status}")));
        }
        response
            .json::<Value>()
            .map_err(|e| VoiceError::Tts(format!("synthesis backend returned non-JSON: {e}")))
    }

    fn decode_audio(value: &Value) -> Result<Vec<u8>> {
        let b64 = value
            .as_str()
            .ok_or_else(|| VoiceError::Tts("synthesis reply lacks audio".into()))?;
        BASE64
            .decode(b64)
            .map_err(|e| VoiceError::Tts(format!("synthesis reply audio is not base64: {e}")))
    }
}

impl TtsEngine for RemoteTtsEngine {
    fn synthesize(&self, text: &str, voice: &str, params: &ForwardParams) -> Result<Vec<u8>> {
        let reply = self.post(json!({
            "text": text,
            "voice": voice,
            "forward_params": params,
        }))?;
        Self::decode_audio(&reply["audio_base64"])
    }

    fn synthesize_batch(
        &self,
        texts: &[String],
        voice: &str,
        params: &ForwardParams,
    ) -> Result<Vec<Vec<u8>>> {
        let reply = self.post(json!({
            "texts": texts,
            "voice": voice,
            "forward_params": params,
            "batch_size": texts.len(),
        }))?;
        let audios = reply["audios"]
            .as_array()
            .ok_or_else(|| VoiceError::Tts("backend does not accept list input".into()))?;
        if audios.len() != texts.len() {
            return Err(VoiceError::Tts(format!(
                "batch reply count mismatch: sent {}, got {}",
                texts.len(),
                audios.len()
            )));
        }
        audios.iter().map(Self::decode_audio).collect()
    }
}
