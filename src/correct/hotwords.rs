//! Hotword list loading.
//!
//! One entry per line: `word` (default weight 20) or `word weight`. A
//! configured path wins when set; otherwise the embedded default list is
//! used. The list feeds both the recognizer (as a weighted JSON string) and
//! the LLM corrector (as plain words).

use std::path::Path;
use tracing::{info, warn};

/// Default weight for entries without an explicit one.
const DEFAULT_WEIGHT: u32 = 20;

/// Hotword list embedded at compile time.
const EMBEDDED: &str = include_str!("hotwords.txt");

/// A loaded hotword list.
#[derive(Debug, Clone, Default)]
pub struct HotwordList {
    entries: Vec<(String, u32)>,
}

impl HotwordList {
    /// Load from the configured path, falling back to the embedded default
    /// on a missing or unreadable file.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let list = Self::parse(&content);
                    info!(
                        "loaded {} hotwords from {}",
                        list.entries.len(),
                        path.display()
                    );
                    return list;
                }
                Err(e) => {
                    warn!(
                        "cannot read hotword file {}, using embedded list: {e}",
                        path.display()
                    );
                }
            }
        }
        Self::parse(EMBEDDED)
    }

    /// Parse hotword file content.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // Last whitespace-separated token is the weight when numeric;
            // otherwise the whole line is the word.
            if let Some((word, weight)) = line.rsplit_once(char::is_whitespace) {
                if let Ok(weight) = weight.trim().parse::<u32>() {
                    let word = word.trim();
                    if !word.is_empty() {
                        entries.push((word.to_owned(), weight));
                    }
                    continue;
                }
            }
            entries.push((line.to_owned(), DEFAULT_WEIGHT));
        }
        Self { entries }
    }

    /// Words without weights, for the LLM corrector.
    #[must_use]
    pub fn words(&self) -> Vec<String> {
        self.entries.iter().map(|(word, _)| word.clone()).collect()
    }

    /// Weighted JSON-object string in the recognizer's hotword format,
    /// e.g. `{"胸闷":80,"头疼":80}`. Empty string for an empty list.
    #[must_use]
    pub fn to_gateway_json(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(word, weight)| (word.clone(), serde_json::Value::from(*weight)))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
