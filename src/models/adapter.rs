//! Adapters from raw inferencer payloads to typed readings.
//!
//! Model backends differ in the shape of what they return: a bare dict, a
//! one-element list of dicts, alternate key names for the same field. Each
//! adapter here normalizes one payload family into a record with explicit
//! absence, so pipeline code never touches a raw payload.

use serde_json::Value;

/// One recognized sentence from the speaker-separating recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceReading {
    /// Recognized text.
    pub text: String,
    /// Sentence start, in milliseconds from utterance start.
    pub start_ms: Option<i64>,
    /// Sentence end, in milliseconds from utterance start.
    pub end_ms: Option<i64>,
    /// Speaker id assigned by the model.
    pub speaker: Option<i64>,
}

/// One speaker-verification reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvReading {
    /// Textual verdict, lowercased (`"yes"` / `"no"` when present).
    pub verdict: Option<String>,
    /// Similarity score.
    pub score: Option<f32>,
}

/// Extract the wake text from a KWS payload.
///
/// Accepts a dict or a list whose first element is a dict, reading its
/// `text` field. Returns `None` for anything else; deciding whether the
/// text means "rejected" is the caller's business.
#[must_use]
pub fn kws_text(payload: &Value) -> Option<String> {
    let item = first_dict(payload)?;
    let text = item.get("text")?.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}

/// Whether a streaming-VAD payload reports at least one speech span.
///
/// The `value` field is either a list of spans (non-empty ⇒ speech) or a
/// bare label string (`"speech"` ⇒ speech). Anything unrecognized is
/// non-speech.
#[must_use]
pub fn vad_emitted_speech(payload: &Value) -> bool {
    let Some(item) = first_dict(payload) else {
        return false;
    };
    match item.get("value") {
        Some(Value::Array(spans)) => !spans.is_empty(),
        Some(Value::String(label)) => label.eq_ignore_ascii_case("speech"),
        _ => false,
    }
}

/// Extract sentence readings from a speaker-separation payload.
///
/// Accepts either a top-level list of sentence dicts or a result dict (or
/// one-element list of dicts) carrying a `sentence_info` list. Field name
/// variants: `start`/`start_ms`, `end`/`end_ms`, `spk`/`speaker`.
#[must_use]
pub fn sentences(payload: &Value) -> Vec<SentenceReading> {
    let items: Vec<&Value> = if let Some(list) = payload.as_array() {
        if list.iter().all(|v| looks_like_sentence(v)) && !list.is_empty() {
            list.iter().collect()
        } else {
            sentence_info(payload).unwrap_or_default()
        }
    } else {
        sentence_info(payload).unwrap_or_default()
    };

    items
        .into_iter()
        .filter_map(|item| {
            let dict = item.as_object()?;
            let text = dict.get("text")?.as_str()?.trim().to_owned();
            Some(SentenceReading {
                text,
                start_ms: int_field(item, &["start", "start_ms"]),
                end_ms: int_field(item, &["end", "end_ms"]),
                speaker: int_field(item, &["spk", "speaker", "speaker_id"]),
            })
        })
        .collect()
}

/// Extract a verification reading from an SV payload.
///
/// Accepts a dict, a one-element list of dicts, a bare string (verdict), or
/// a bare number (score). Score key variants: `score`, `similarity`, `sim`.
#[must_use]
pub fn sv_reading(payload: &Value) -> SvReading {
    match payload {
        Value::String(s) => SvReading {
            verdict: normalize_verdict(s),
            score: None,
        },
        Value::Number(n) => SvReading {
            verdict: None,
            score: n.as_f64().map(|v| v as f32),
        },
        _ => {
            let Some(item) = first_dict(payload) else {
                return SvReading::default();
            };
            let verdict = item
                .get("text")
                .and_then(Value::as_str)
                .and_then(normalize_verdict);
            let score = ["score", "similarity", "sim"]
                .iter()
                .find_map(|key| item.get(*key))
                .and_then(float_value);
            SvReading { verdict, score }
        }
    }
}

/// The dict payload, unwrapping a one-element (or longer) list if needed.
fn first_dict(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Object(_) => Some(payload),
        Value::Array(list) => list.first().filter(|v| v.is_object()),
        _ => None,
    }
}

fn looks_like_sentence(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|dict| dict.contains_key("text"))
        && value.get("sentence_info").is_none()
}

fn sentence_info(payload: &Value) -> Option<Vec<&Value>> {
    let info = first_dict(payload)?.get("sentence_info")?.as_array()?;
    Some(info.iter().collect())
}

fn int_field(item: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| item.get(*key)?.as_i64())
}

fn float_value(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

fn normalize_verdict(raw: &str) -> Option<String> {
    let v = raw.trim().to_lowercase();
    if v.is_empty() { None } else { Some(v) }
}
