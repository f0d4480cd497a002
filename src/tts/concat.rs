//! Seamless WAV concatenation.
//!
//! Joins per-segment WAVs into one container, inserting inter-segment
//! silence and smoothing each boundary with a short linear crossfade so
//! the joins don't click. Segments whose format differs from the first are
//! still concatenated but never crossfaded; crossfading also requires
//! 16-bit samples.

use crate::error::{Result, VoiceError};
use std::io::Cursor;
use tracing::warn;

/// Format of one decoded segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcmMeta {
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
}

/// Decoded segment: format plus interleaved integer samples.
struct PcmSegment {
    meta: PcmMeta,
    samples: Vec<i32>,
}

/// Duration of a WAV container in seconds (0.0 when unreadable).
#[must_use]
pub fn wav_duration_secs(wav: &[u8]) -> f64 {
    match hound::WavReader::new(Cursor::new(wav)) {
        Ok(reader) => {
            let spec = reader.spec();
            if spec.sample_rate == 0 {
                0.0
            } else {
                f64::from(reader.duration()) / f64::from(spec.sample_rate)
            }
        }
        Err(_) => 0.0,
    }
}

/// Concatenate segment WAVs with pauses and crossfades.
///
/// `pauses_ms.len()` must be `wavs.len() - 1`; missing entries mean no
/// pause. The output carries the first segment's format.
///
/// # Errors
///
/// Returns [`VoiceError::Tts`] when there are no segments or a segment
/// cannot be decoded.
pub fn concat_wavs(wavs: &[Vec<u8>], pauses_ms: &[u32], crossfade_ms: u32) -> Result<Vec<u8>> {
    let mut segments = wavs.iter();
    let first = segments
        .next()
        .ok_or_else(|| VoiceError::Tts("no segments to concatenate".into()))?;
    let first = decode_segment(first)?;
    let meta = first.meta;

    let mut out = first.samples;
    for (index, wav) in segments.enumerate() {
        let segment = decode_segment(wav)?;
        let compatible = segment.meta == meta;
        if !compatible {
            warn!(
                "segment {} format mismatch: first={meta:?} segment={:?}, skipping crossfade",
                index + 1,
                segment.meta
            );
        }

        let pause = pauses_ms.get(index).copied().unwrap_or(0);
        if pause > 0 {
            let frames = (meta.sample_rate as usize * pause as usize) / 1000;
            out.extend(std::iter::repeat_n(0i32, frames * meta.channels as usize));
        }

        if compatible && meta.bits_per_sample == 16 && crossfade_ms > 0 {
            crossfade_append(&mut out, segment.samples, &meta, crossfade_ms);
        } else {
            out.extend(segment.samples);
        }
    }

    encode_segment(&meta, &out)
}

/// Append `next` to `out`, linearly crossfading over the boundary.
///
/// The fade region mixes the tail of `out` with the head of `next` using
/// weights `w_a = (n-1-i)/(n-1)` and `w_b = i/(n-1)`, clamped to i16.
/// Falls back to a plain append when either side is shorter than the fade.
fn crossfade_append(out: &mut Vec<i32>, next: Vec<i32>, meta: &PcmMeta, fade_ms: u32) {
    let fade_samples =
        (meta.sample_rate as usize * fade_ms as usize / 1000) * meta.channels as usize;
    if fade_samples < 2 || out.len() < fade_samples || next.len() < fade_samples {
        out.extend(next);
        return;
    }

    let tail_start = out.len() - fade_samples;
    let denom = (fade_samples - 1) as f64;
    for i in 0..fade_samples {
        let w_a = (fade_samples - 1 - i) as f64 / denom;
        let w_b = i as f64 / denom;
        let mixed = f64::from(out[tail_start + i]) * w_a + f64::from(next[i]) * w_b;
        out[tail_start + i] = (mixed as i64).clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i32;
    }
    out.extend_from_slice(&next[fade_samples..]);
}

fn decode_segment(wav: &[u8]) -> Result<PcmSegment> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))
        .map_err(|e| VoiceError::Tts(format!("cannot parse segment WAV: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int {
        return Err(VoiceError::Tts(
            "float segment WAVs are not supported for concatenation".into(),
        ));
    }
    let samples = reader
        .samples::<i32>()
        .collect::<std::result::Result<Vec<i32>, _>>()
        .map_err(|e| VoiceError::Tts(format!("segment WAV read error: {e}")))?;
    Ok(PcmSegment {
        meta: PcmMeta {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
        },
        samples,
    })
}

fn encode_segment(meta: &PcmMeta, samples: &[i32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: meta.channels,
        sample_rate: meta.sample_rate,
        bits_per_sample: meta.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Tts(format!("cannot create output WAV: {e}")))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| VoiceError::Tts(format!("output WAV write error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Tts(format!("output WAV finalize error: {e}")))?;
    }
    Ok(cursor.into_inner())
}
