//! LLM correction pass.
//!
//! Calls an OpenAI-compatible chat endpoint with the deterministic result
//! and the hotword list, expecting a strict JSON reply
//! `{"corrected": string, "changed": bool}`. The prompt pins the model to
//! minimal edits: no new symptoms, no new body parts, keep the semantic
//! type of every replaced word. Any failure — network, HTTP status,
//! malformed reply — keeps the deterministic result.
//!
//! Uses the blocking client: corrections run inside finalize on the worker
//! pool, never on the transport task.

use crate::config::CorrectionConfig;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "你是医疗分诊语音识别的文本纠错助手。对输入文本做最小限度的修改：\
只纠正明显的同音/近音识别错误；不得新增症状，不得新增身体部位，替换词必须与原词语义类别一致；\
优先使用热词表中的词。严格以JSON回复：{\"corrected\": \"纠正后的文本\", \"changed\": true或false}，\
不要输出任何其他内容。";

/// Client for the external correction endpoint.
pub struct LlmCorrector {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmCorrector {
    /// Build a corrector from config.
    #[must_use]
    pub fn new(config: &CorrectionConfig) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            http,
            base_url: config.llm_base_url.trim_end_matches('/').to_owned(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        }
    }

    /// Correct `text` with the hotword list as context.
    ///
    /// Returns `Some(corrected)` only when the endpoint replied with a
    /// well-formed JSON object whose `corrected` differs from the input.
    pub fn correct(&self, text: &str, hotwords: &[String]) -> Option<String> {
        let user_payload = json!({
            "text": text,
            "hotwords": hotwords,
        });
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_payload.to_string()},
            ],
            "temperature": 0.0,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let started = std::time::Instant::now();
        let response = match request.send() {
            Ok(response) => response,
            Err(e) => {
                warn!("LLM correction request failed, keeping deterministic result: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                "LLM correction endpoint returned {}, keeping deterministic result",
                response.status()
            );
            return None;
        }
        let reply: Value = match response.json() {
            Ok(reply) => reply,
            Err(e) => {
                warn!("LLM correction reply is not JSON: {e}");
                return None;
            }
        };

        let content = reply["choices"][0]["message"]["content"].as_str()?;
        let corrected = parse_reply(content, text);
        match &corrected {
            Some(new_text) => info!(
                "LLM correction applied in {:.0}ms: '{text}' -> '{new_text}'",
                started.elapsed().as_secs_f64() * 1000.0
            ),
            None => debug!(
                "LLM correction made no change ({:.0}ms)",
                started.elapsed().as_secs_f64() * 1000.0
            ),
        }
        corrected
    }
}

/// Parse the model's content into a corrected text, tolerating markdown
/// code fences around the JSON object.
fn parse_reply(content: &str, original: &str) -> Option<String> {
    let trimmed = content.trim();
    let bare = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    let parsed: Value = serde_json::from_str(bare).ok()?;
    let corrected = parsed.get("corrected")?.as_str()?.trim();
    if corrected.is_empty() || corrected == original {
        return None;
    }
    Some(corrected.to_owned())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn corrector_for(server_uri: &str) -> LlmCorrector {
        LlmCorrector::new(&CorrectionConfig {
            llm_base_url: server_uri.to_owned(),
            llm_api_key: "test-key".to_owned(),
            llm_model: "test-model".to_owned(),
            llm_timeout_secs: 2,
            hotwords_path: None,
        })
    }

    fn chat_reply(content: &str) -> Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn parse_reply_accepts_plain_and_fenced_json() {
        let original = "我头疼";
        assert_eq!(
            parse_reply(r#"{"corrected": "我头疼三天", "changed": true}"#, original),
            Some("我头疼三天".to_owned())
        );
        assert_eq!(
            parse_reply(
                "```json\n{\"corrected\": \"我头疼三天\", \"changed\": true}\n```",
                original
            ),
            Some("我头疼三天".to_owned())
        );
    }

    #[test]
    fn parse_reply_rejects_unchanged_empty_or_malformed() {
        assert_eq!(
            parse_reply(r#"{"corrected": "我头疼", "changed": false}"#, "我头疼"),
            None
        );
        assert_eq!(parse_reply(r#"{"corrected": ""}"#, "我头疼"), None);
        assert_eq!(parse_reply("抱歉，我无法纠正。", "我头疼"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn correction_round_trip_against_mock_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
                r#"{"corrected": "胸闷三天", "changed": true}"#,
            )))
            .mount(&server)
            .await;

        let uri = server.uri();
        let corrected = tokio::task::spawn_blocking(move || {
            corrector_for(&uri).correct("胸门三天", &["胸闷".to_owned()])
        })
        .await
        .unwrap();
        assert_eq!(corrected, Some("胸闷三天".to_owned()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_keeps_deterministic_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let uri = server.uri();
        let corrected =
            tokio::task::spawn_blocking(move || corrector_for(&uri).correct("胸闷", &[]))
                .await
                .unwrap();
        assert_eq!(corrected, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_json_content_keeps_deterministic_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_reply("这不是JSON回复")),
            )
            .mount(&server)
            .await;

        let uri = server.uri();
        let corrected =
            tokio::task::spawn_blocking(move || corrector_for(&uri).correct("胸闷", &[]))
                .await
                .unwrap();
        assert_eq!(corrected, None);
    }
}
