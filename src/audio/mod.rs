//! Audio codec for the voice channel.
//!
//! Decodes incoming base64 WAV chunks to 16 kHz mono f32 in `[-1, 1]` and
//! encodes pipeline buffers back to 16-bit PCM WAVs for the inferencers and
//! for audit dumps. No normalization or AGC anywhere: the measured peak of a
//! chunk must survive the round trip so clipping telemetry and speaker
//! verification behave identically across deployments.

use crate::error::{Result, VoiceError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Pipeline-wide sample rate. Everything downstream of ingress is 16 kHz mono.
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode a base64-encoded WAV container to 16 kHz mono f32 samples.
///
/// Accepts 8/16/24/32-bit PCM and IEEE float, any source rate, any channel
/// count. Multi-channel audio is downmixed by channel mean; other rates are
/// resampled by linear interpolation.
///
/// # Errors
///
/// Returns [`VoiceError::Audio`] on bad base64 or a malformed/unsupported
/// container. The caller drops the chunk without touching session state.
pub fn decode_base64_wav(wav_base64: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(wav_base64.trim())
        .map_err(|e| VoiceError::Audio(format!("invalid base64 audio payload: {e}")))?;
    decode_wav_bytes(&bytes)
}

/// Decode a WAV container to 16 kHz mono f32 samples.
///
/// # Errors
///
/// Returns [`VoiceError::Audio`] if the container cannot be parsed.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::Audio(format!("cannot parse WAV container: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| VoiceError::Audio(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            // Full-scale divisor per bit depth; hound exposes 8-bit
            // offset-binary samples already re-biased to signed.
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| VoiceError::Audio(format!("WAV read error: {e}")))
                        .map(|v| v as f32 / full_scale)
                })
                .collect::<Result<Vec<f32>>>()?
        }
    };

    let mono = downmix_mono(&interleaved, spec.channels);
    if spec.sample_rate == SAMPLE_RATE {
        Ok(mono)
    } else {
        Ok(resample_linear(&mono, spec.sample_rate, SAMPLE_RATE))
    }
}

/// Downmix interleaved samples to mono by channel mean.
fn downmix_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_owned();
    }
    let ch = channels as usize;
    interleaved
        .chunks(ch)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Good enough for speech ingress; the models downstream are robust to the
/// mild aliasing this introduces compared to a polyphase design.
fn resample_linear(samples: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if samples.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }
    if in_rate == out_rate {
        return samples.to_owned();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f64 * ratio;
        let idx = (src.floor() as usize).min(last);
        let frac = (src - idx as f64) as f32;
        let s0 = samples[idx];
        let s1 = samples[(idx + 1).min(last)];
        out.push(s0 + (s1 - s0) * frac);
    }
    out
}

/// Encode 16 kHz mono f32 samples as a 16-bit PCM WAV in memory.
///
/// Samples are clamped to `[-1, 1]` and scaled by 32767.
///
/// # Errors
///
/// Returns [`VoiceError::Audio`] if the writer fails (out-of-memory class).
pub fn encode_wav_bytes(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Audio(format!("cannot create WAV writer: {e}")))?;
        for &s in samples {
            let quantized = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer
                .write_sample(quantized)
                .map_err(|e| VoiceError::Audio(format!("WAV write error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Audio(format!("WAV finalize error: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Write 16 kHz mono f32 samples to a 16-bit PCM WAV file.
///
/// # Errors
///
/// Returns [`VoiceError::Audio`] if the file cannot be written.
pub fn write_wav_file(path: &Path, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = encode_wav_bytes(samples)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Buffer duration in seconds at the pipeline rate.
#[must_use]
pub fn duration_secs(samples: &[f32]) -> f32 {
    samples.len() as f32 / SAMPLE_RATE as f32
}

/// Append-only audit WAV sink.
///
/// Filenames carry a millisecond wall-clock timestamp plus a session-unique
/// discriminator. Dumps are best-effort: a failed write is logged and the
/// pipeline continues.
#[derive(Debug, Clone)]
pub struct AuditSink {
    enabled: bool,
    root: PathBuf,
}

impl AuditSink {
    /// Create a sink rooted at `root`; `enabled=false` turns every dump
    /// into a no-op without changing pipeline behavior.
    #[must_use]
    pub fn new(enabled: bool, root: PathBuf) -> Self {
        Self { enabled, root }
    }

    /// Dump a wake-detection window.
    pub fn dump_kws(&self, samples: &[f32], discriminator: &str) -> Option<PathBuf> {
        self.dump("kws", "kws", samples, discriminator)
    }

    /// Dump a finalized utterance. Always written: the speaker-separation
    /// inferencer consumes the file. The finalize path unlinks it afterwards
    /// when auditing is disabled.
    pub fn dump_utterance(&self, samples: &[f32], discriminator: &str) -> Option<PathBuf> {
        self.dump_unconditional("utterances", "utterance", samples, discriminator)
    }

    /// Whether dumped artifacts should be retained after use.
    #[must_use]
    pub fn retain_artifacts(&self) -> bool {
        self.enabled
    }

    /// Dump an accepted enrollment sample. Unlike the other dumps this one is
    /// load-bearing (SV compares against it), so the caller treats `None` as
    /// an enrollment failure.
    pub fn dump_enroll(&self, samples: &[f32], discriminator: &str) -> Option<PathBuf> {
        self.dump_unconditional("enroll", "enroll", samples, discriminator)
    }

    /// Dump a per-speaker splice used for one verification call.
    pub fn dump_speaker(&self, samples: &[f32], discriminator: &str) -> Option<PathBuf> {
        self.dump_unconditional("speakers", "speaker", samples, discriminator)
    }

    fn dump(
        &self,
        subdir: &str,
        prefix: &str,
        samples: &[f32],
        discriminator: &str,
    ) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        self.dump_unconditional(subdir, prefix, samples, discriminator)
    }

    fn dump_unconditional(
        &self,
        subdir: &str,
        prefix: &str,
        samples: &[f32],
        discriminator: &str,
    ) -> Option<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = self
            .root
            .join(subdir)
            .join(format!("{prefix}_{stamp}_{discriminator}.wav"));
        match write_wav_file(&path, samples) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("audit dump failed ({}): {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn encode_test_wav(samples: &[f32], rate: u32, channels: u16, bits: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let full_scale = (1i64 << (bits - 1)) as f32;
            for &s in samples {
                let v = (s * (full_scale - 1.0)).round() as i32;
                writer.write_sample(v).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn round_trip_is_bit_identical_after_quantization() {
        let samples: Vec<f32> = (0..6400)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.8)
            .collect();

        let quantized: Vec<f32> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() / 32768.0)
            .collect();

        let bytes = encode_wav_bytes(&samples).unwrap();
        let decoded = decode_wav_bytes(&bytes).unwrap();

        assert_eq!(decoded.len(), quantized.len());
        for (d, q) in decoded.iter().zip(quantized.iter()) {
            assert!((d - q).abs() < f32::EPSILON, "mismatch: {d} vs {q}");
        }
    }

    #[test]
    fn peak_is_preserved_no_agc() {
        let mut samples = vec![0.0f32; 1600];
        samples[800] = 0.5;
        let bytes = encode_wav_bytes(&samples).unwrap();
        let decoded = decode_wav_bytes(&bytes).unwrap();
        let peak = decoded.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.001, "peak drifted to {peak}");
    }

    #[test]
    fn stereo_is_downmixed_by_mean() {
        // L = 0.5, R = -0.5 everywhere: mean is 0.
        let interleaved: Vec<f32> = (0..200)
            .flat_map(|_| [0.5f32, -0.5f32])
            .collect();
        let bytes = encode_test_wav(&interleaved, 16_000, 2, 16);
        let decoded = decode_wav_bytes(&bytes).unwrap();
        assert_eq!(decoded.len(), 200);
        for s in decoded {
            assert!(s.abs() < 0.001);
        }
    }

    #[test]
    fn other_rates_are_resampled_to_16k() {
        let samples = vec![0.1f32; 48_000];
        let bytes = encode_test_wav(&samples, 48_000, 1, 16);
        let decoded = decode_wav_bytes(&bytes).unwrap();
        // One second of audio in, one second at 16 kHz out.
        assert!((decoded.len() as i64 - 16_000).unsigned_abs() <= 1);
    }

    #[test]
    fn eight_bit_wav_decodes() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(64i8).unwrap();
            }
            writer.finalize().unwrap();
        }
        let decoded = decode_wav_bytes(&cursor.into_inner()).unwrap();
        assert_eq!(decoded.len(), 100);
        assert!((decoded[0] - 0.5).abs() < 0.01);
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = decode_wav_bytes(b"definitely not a RIFF container").unwrap_err();
        assert!(matches!(err, VoiceError::Audio(_)));
    }

    #[test]
    fn bad_base64_is_a_decode_error() {
        let err = decode_base64_wav("!!!not-base64!!!").unwrap_err();
        assert!(matches!(err, VoiceError::Audio(_)));
    }

    #[test]
    fn audit_sink_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::new(false, dir.path().to_path_buf());
        assert!(sink.dump_kws(&[0.0; 160], "sess1").is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn audit_sink_writes_timestamped_wav() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::new(true, dir.path().to_path_buf());
        let path = sink.dump_utterance(&[0.1; 1600], "ab12cd34").unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("utterance_"));
        assert!(name.ends_with("_ab12cd34.wav"));
        let decoded = decode_wav_bytes(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(decoded.len(), 1600);
    }

    #[test]
    fn enroll_dump_ignores_disabled_flag() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::new(false, dir.path().to_path_buf());
        let path = sink.dump_enroll(&[0.1; 160], "sess1");
        assert!(path.is_some());
    }
}
