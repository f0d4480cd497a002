//! Deterministic text post-correction.
//!
//! The recognizer's output goes through a fixed rule set before anything
//! else sees it: a whole-token homophone rule for the lone answer "无", a
//! global substitution table for domain-specific mishearings, and an
//! interjection sweep. The rules are ordered and idempotent; applying the
//! pass twice changes nothing. The optional LLM pass lives in [`llm`].

pub mod hotwords;
pub mod llm;

use once_cell::sync::Lazy;
use regex::Regex;

/// Single characters that, standing alone, mean the patient said "无".
const WU_HOMOPHONES: &[&str] = &["五", "乌", "吴", "屋", "舞", "5", "午", "吾", "芜"];

/// Ordered global substitutions. The single-character 腾/藤/滕/誊→疼 pass
/// runs before the 头疼 compounds; the compound variant list includes the
/// already-rewritten forms (脱腾 has become 脱疼 by the time it runs).
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("前妻", "前期"),
    ("黑边", "黑便"),
    ("黑变", "黑便"),
    ("腾", "疼"),
    ("藤", "疼"),
    ("滕", "疼"),
    ("誊", "疼"),
    ("壳", "咳"),
    ("气势", "前期"),
    ("串", "喘"),
    ("川", "喘"),
    ("涨", "胀"),
    ("账", "胀"),
    ("脱腾", "头疼"),
    ("拖腾", "头疼"),
    ("拖疼", "头疼"),
    ("脱疼", "头疼"),
    ("游离", "油腻"),
    ("游历", "油腻"),
    ("颜面不通", "颜面部痛"),
    ("即性", "急性"),
    ("犯罪症状", "伴随症状"),
    ("树叶", "输液"),
    ("书页", "输液"),
    ("术业", "输液"),
    ("树业", "输液"),
];

/// CJK and ASCII punctuation plus whitespace.
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "[，。！？、；：\u{201c}\u{201d}\u{2018}\u{2019}（）【】《》〈〉「」『』〔〕〖〗…—～·[:punct:]\\s]+",
    )
    .expect("static punctuation pattern")
});

/// Interjection characters, consumed in runs.
static INTERJECTIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[嗯哈哼噗砰呀嗷啊哦额呃诶唉哎呦妈]+").expect("static interjection pattern")
});

/// Apply the deterministic correction rules, in order.
#[must_use]
pub fn apply_rules(text: &str) -> String {
    // Whole-token rule: a lone homophone of 无 (after stripping punctuation
    // and whitespace) replaces the entire text.
    let bare = strip_punctuation(text);
    if WU_HOMOPHONES.contains(&bare.as_str()) {
        return "无".to_owned();
    }

    let mut corrected = text.to_owned();
    for (from, to) in SUBSTITUTIONS {
        if corrected.contains(from) {
            corrected = corrected.replace(from, to);
        }
    }

    INTERJECTIONS.replace_all(&corrected, "").into_owned()
}

/// Whether a corrected text carries no content once punctuation and
/// interjections are gone.
#[must_use]
pub fn is_effectively_empty(text: &str) -> bool {
    let without_interjections = INTERJECTIONS.replace_all(text, "");
    strip_punctuation(&without_interjections).is_empty()
}

fn strip_punctuation(text: &str) -> String {
    PUNCTUATION.replace_all(text.trim(), "").into_owned()
}
