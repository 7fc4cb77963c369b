use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// The one operation the core needs from a language model: prompt in,
/// text out. No streaming.
pub trait LlmTransport {
    fn send(&self, prompt: &str) -> Result<String>;
}

/// Anthropic Messages API transport.
pub struct AnthropicClient {
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(model: &str, max_tokens: u32) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Transport("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self {
            model: model.to_string(),
            max_tokens,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

fn response_text(json: &serde_json::Value) -> Result<String> {
    let response: MessagesResponse = serde_json::from_value(json.clone())
        .map_err(|e| Error::Transport(format!("failed to parse model response: {e}")))?;
    let text: String = response
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(Error::Transport(
            "model response contained no text blocks".to_string(),
        ));
    }
    Ok(text)
}

/// Only retry rate-limits (429), overloads (529), server errors (5xx), and
/// transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

impl LlmTransport for AnthropicClient {
    fn send(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        debug!(model = %self.model, prompt_len = prompt.len(), "sending prompt");

        let mut backoff_ms = INITIAL_BACKOFF_MS;
        for attempt in 1..=MAX_RETRIES {
            match ureq::post(API_URL)
                .set("x-api-key", &self.api_key)
                .set("anthropic-version", API_VERSION)
                .set("Content-Type", "application/json")
                .send_json(&body)
            {
                Ok(response) => {
                    let json: serde_json::Value = response.into_json().map_err(|e| {
                        Error::Transport(format!("failed to read model response: {e}"))
                    })?;
                    return response_text(&json);
                }
                Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms,
                        "retrying model request after transient error"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms *= 2;
                }
                Err(e) => {
                    return Err(Error::Transport(format!("model request failed: {e}")));
                }
            }
        }
        unreachable!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_single_block() {
        let json = serde_json::json!({
            "content": [{ "type": "text", "text": "{\"fixes\": []}" }]
        });
        assert_eq!(response_text(&json).unwrap(), "{\"fixes\": []}");
    }

    #[test]
    fn test_response_text_joins_blocks_and_skips_non_text() {
        let json = serde_json::json!({
            "content": [
                { "type": "thinking", "thinking": "hmm" },
                { "type": "text", "text": "part one " },
                { "type": "text", "text": "part two" }
            ]
        });
        assert_eq!(response_text(&json).unwrap(), "part one part two");
    }

    #[test]
    fn test_response_text_empty_errors() {
        let json = serde_json::json!({ "content": [] });
        assert!(response_text(&json).is_err());
    }

    #[test]
    fn test_response_text_malformed_errors() {
        let json = serde_json::json!({ "oops": true });
        assert!(response_text(&json).is_err());
    }
}
