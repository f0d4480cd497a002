//! Punctuation-aware text segmentation for synthesis.
//!
//! Long inputs synthesize slowly and with unstable prosody; the segmenter
//! cuts text into short pieces at natural boundaries so the backend works on
//! one phrase at a time. A segment closes at any punctuation boundary;
//! unpunctuated runs are merged toward a length target (the first segment
//! gets a shorter target, which trims tail-latency outliers) and force-split
//! at the hard cap when no boundary exists at all.

use once_cell::sync::Lazy;
use regex::Regex;

/// Segment enders that demand a long inter-segment pause.
const STRONG_ENDERS: &[char] = &['。', '！', '？', '；', '\n'];
/// All punctuation that closes a running segment.
const BOUNDARY_CHARS: &[char] = &['。', '！', '？', '；', '\n', '，', '、', '：'];

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("static pattern"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").expect("static pattern"));
static NEWLINE_JOIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([^\n，。！？；\s])[ \t]*\n[ \t]*([^\n，。！？；\s])").expect("static pattern")
});
static ENUM_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d{1,2}\s*[.、:：)]\s*").expect("static pattern"));
static COMMA_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("，+").expect("static pattern"));
static EDGE_COMMAS: Lazy<Regex> = Lazy::new(|| Regex::new("^，+|，+$").expect("static pattern"));

/// Normalize input text before splitting.
///
/// Collapses whitespace, turns blank-line runs into commas, joins single
/// line breaks inside a sentence with a comma, strips leading enumeration
/// markers (`1. ` / `2、` / `3：`), and collapses comma runs.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let t = text.trim();
    if t.is_empty() {
        return String::new();
    }

    let t = t.replace("\r\n", "\n").replace('\r', "\n");
    let t = SPACES.replace_all(&t, " ");
    // Markers are line-leading; strip them while the line breaks still exist.
    let t = ENUM_MARKER.replace_all(&t, "");
    let t = BLANK_LINES.replace_all(&t, "，");
    let t = NEWLINE_JOIN.replace_all(&t, "${1}，${2}");
    let t = COMMA_RUNS.replace_all(&t, "，");
    let t = EDGE_COMMAS.replace_all(&t, "");

    t.trim().to_owned()
}

/// Split text into synthesis segments.
///
/// A segment closes at every punctuation boundary (the delimiter stays with
/// its segment). Unpunctuated runs merge up to `target` characters
/// (`first_target` for the very first segment) and are force-split at
/// `hard_max` when they carry no boundary at all. Non-final segments that
/// end without punctuation get a `，` appended to smooth prosody.
#[must_use]
pub fn split_for_tts(
    text: &str,
    target: usize,
    first_target: usize,
    hard_max: usize,
) -> Vec<String> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for atom in split_atoms(&normalized) {
        let atom_len = atom.chars().count();
        let limit = if out.is_empty() && buf.is_empty() {
            first_target
        } else {
            target
        };

        if atom_len > hard_max {
            // No boundary inside the atom at all: force-split.
            flush(&mut out, &mut buf, &mut buf_len);
            force_split(&mut out, atom, hard_max);
            continue;
        }

        // A buffered run never ends with punctuation (it would have been
        // flushed), so merging is purely a length decision.
        if !buf.is_empty() && buf_len + atom_len <= limit {
            buf.push_str(atom);
            buf_len += atom_len;
        } else {
            flush(&mut out, &mut buf, &mut buf_len);
            buf.push_str(atom);
            buf_len = atom_len;
        }

        if buf.chars().next_back().is_some_and(is_boundary) {
            flush(&mut out, &mut buf, &mut buf_len);
        }
    }
    flush(&mut out, &mut buf, &mut buf_len);

    // Non-final segments without terminal punctuation read smoother with a
    // comma appended.
    let last = out.len().saturating_sub(1);
    for segment in out.iter_mut().take(last) {
        if !segment.chars().next_back().is_some_and(is_boundary) {
            segment.push('，');
        }
    }

    out
}

/// Pause length after `segment`, by its terminal punctuation.
#[must_use]
pub fn pause_after(segment: &str, pause_hard_ms: u32, pause_soft_ms: u32) -> u32 {
    match segment.chars().next_back() {
        Some(c) if STRONG_ENDERS.contains(&c) => pause_hard_ms,
        _ => pause_soft_ms,
    }
}

/// Split into atoms, each ending at (and including) a boundary character.
fn split_atoms(text: &str) -> Vec<&str> {
    let mut atoms = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if BOUNDARY_CHARS.contains(&c) {
            let end = idx + c.len_utf8();
            atoms.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        atoms.push(&text[start..]);
    }
    atoms
}

fn is_boundary(c: char) -> bool {
    BOUNDARY_CHARS.contains(&c)
}

fn flush(out: &mut Vec<String>, buf: &mut String, buf_len: &mut usize) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_owned());
    }
    buf.clear();
    *buf_len = 0;
}

/// Emit `atom` in pieces of at most `hard_max` characters.
fn force_split(out: &mut Vec<String>, atom: &str, hard_max: usize) {
    let chars: Vec<char> = atom.chars().collect();
    for piece in chars.chunks(hard_max.max(1)) {
        let piece: String = piece.iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn split(text: &str) -> Vec<String> {
        split_for_tts(text, 18, 14, 22)
    }

    #[test]
    fn seed_input_splits_into_three_segments() {
        let segments = split("测试一。测试二，测试三！");
        assert_eq!(segments, vec!["测试一。", "测试二，", "测试三！"]);
    }

    #[test]
    fn pauses_follow_terminal_punctuation() {
        assert_eq!(pause_after("测试一。", 200, 120), 200);
        assert_eq!(pause_after("测试二，", 200, 120), 120);
        assert_eq!(pause_after("测试三！", 200, 120), 200);
        assert_eq!(pause_after("无标点", 200, 120), 120);
    }

    #[test]
    fn empty_and_whitespace_yield_no_segments() {
        assert!(split("").is_empty());
        assert!(split("   \n\t ").is_empty());
        assert!(split("，，，").is_empty());
    }

    #[test]
    fn splitting_a_short_segment_is_idempotent() {
        for segment in split("测试一。测试二，测试三！") {
            assert_eq!(split(&segment), vec![segment.clone()]);
        }
        assert_eq!(split("短句无标点"), vec!["短句无标点"]);
    }

    #[test]
    fn blank_lines_become_commas() {
        let normalized = normalize_text("第一行\n\n第二行");
        assert_eq!(normalized, "第一行，第二行");
    }

    #[test]
    fn single_newline_inside_sentence_becomes_comma() {
        assert_eq!(normalize_text("头疼\n三天"), "头疼，三天");
    }

    #[test]
    fn enumeration_markers_are_stripped() {
        let normalized = normalize_text("1. 多喝水\n2、注意休息");
        assert!(!normalized.contains("1."));
        assert!(!normalized.contains("2、"));
        assert!(normalized.contains("多喝水"));
        assert!(normalized.contains("注意休息"));
    }

    #[test]
    fn comma_runs_collapse_and_edges_trim() {
        assert_eq!(normalize_text("，，头疼，，三天，，"), "头疼，三天");
    }

    #[test]
    fn unpunctuated_run_is_force_split_at_hard_cap() {
        let long: String = std::iter::repeat('字').take(50).collect();
        let segments = split(&long);
        assert!(segments.len() >= 3);
        for segment in &segments {
            // Trailing smoothing comma may push a piece one past the cap.
            assert!(segment.chars().count() <= 23, "too long: {segment}");
        }
        // All non-final segments end with punctuation after smoothing.
        for segment in &segments[..segments.len() - 1] {
            assert!(segment.ends_with('，'));
        }
    }

    #[test]
    fn short_fragments_merge_toward_the_target() {
        // Fragments without punctuation merge; the boundary atom closes.
        let segments = split_for_tts("ab cd。", 18, 14, 22);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn mixed_input_closes_at_sentence_enders() {
        let segments = split("患者主诉头疼。建议多喝水注意休息");
        assert_eq!(segments[0], "患者主诉头疼。");
        assert_eq!(segments[1], "建议多喝水注意休息");
    }

    #[test]
    fn weak_boundaries_close_segments() {
        let segments = split("头疼、发热：三天");
        assert_eq!(segments, vec!["头疼、", "发热：", "三天"]);
    }
}
