//! Correction provider backed by an OpenAI-compatible chat-completions API.

use std::time::Duration;

use docqa::error::{Error, Result};
use docqa::{CorrectionKind, CorrectionProvider, CorrectionRequest, CorrectionResponse};
use serde::{Deserialize, Serialize};

const BASE_PROMPT: &str = "You are an expert corrector of technical documentation in Markdown.

Rules:
1. Preserve every technical command, API call and parameter name exactly.
2. Keep the surrounding document structure and formatting.
3. Output only the corrected text, with no explanations or comments.
";

fn task_prompt(kind: CorrectionKind) -> &'static str {
    match kind {
        CorrectionKind::Recognition => {
            "Task: fix character recognition errors, spacing and punctuation. Keep IPMI, BMC and Redfish commands as they are."
        }
        CorrectionKind::Structure => {
            "Task: fix the heading hierarchy and cross-references. Keep all content."
        }
        CorrectionKind::ContentFidelity => {
            "Task: restore missing technical terminology and code blocks. Keep command syntax and parameters exact."
        }
        CorrectionKind::Formatting => {
            "Task: fix Markdown formatting: headings, tables, lists and code fences. Keep the wording."
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatAnswer,
}

#[derive(Deserialize)]
struct ChatAnswer {
    content: Option<String>,
}

/// Sends each request as one chat completion.
///
/// Chat APIs report no confidence, so every answer carries the configured one.
pub struct ChatProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    confidence: f64,
}

impl ChatProvider {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            model: model.into(),
            api_key: None,
            confidence: 0.8,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    fn user_message(request: &CorrectionRequest) -> String {
        if request.instruction.is_empty() {
            request.original_snippet.clone()
        } else {
            format!(
                "{}\n\nText to correct:\n{}",
                request.instruction, request.original_snippet
            )
        }
    }
}

/// `http://host:8000` and `http://host:8000/v1` both end up at `/v1/chat/completions`.
fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

/// Drop a code fence the model wrapped its whole answer in.
fn unwrap_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return answer;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return answer;
    };
    match body.split_once('\n') {
        // First line is the info string ("markdown", "md" or empty)
        Some((info, inner)) if !info.contains(' ') => inner.strip_suffix('\n').unwrap_or(inner),
        _ => answer,
    }
}

impl CorrectionProvider for ChatProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionResponse> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: format!("{}\n{}", BASE_PROMPT, task_prompt(request.kind)),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_message(request),
                },
            ],
            temperature: 0.1,
            max_tokens: 4096,
        };

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .map_err(|e| Error::CorrectionProvider(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::CorrectionProvider(format!(
                "{} answered HTTP {}",
                self.endpoint, status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| Error::CorrectionProvider(format!("malformed response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::CorrectionProvider("response has no choices".to_string()))?;

        log::debug!("{} answered {} chars for {} correction", self.model, content.len(), request.kind);
        Ok(CorrectionResponse::new(unwrap_fence(&content), self.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa::correction::CorrectionTarget;

    #[test]
    fn test_chat_endpoint() {
        assert_eq!(chat_endpoint("http://gpu:8000"), "http://gpu:8000/v1/chat/completions");
        assert_eq!(chat_endpoint("http://gpu:8000/v1/"), "http://gpu:8000/v1/chat/completions");
        assert_eq!(
            chat_endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_unwrap_fence() {
        assert_eq!(unwrap_fence("```markdown\n## Setup\n```"), "## Setup");
        assert_eq!(unwrap_fence("```\n## Setup\nText\n```\n"), "## Setup\nText");
        assert_eq!(unwrap_fence("## Setup"), "## Setup");
        // A snippet that is itself a code block with a sentence on the fence line stays
        assert_eq!(unwrap_fence("``` not a fence\nx\n```"), "``` not a fence\nx\n```");
    }

    #[test]
    fn test_user_message_includes_instruction() {
        let request = CorrectionRequest::new(
            CorrectionKind::Formatting,
            CorrectionTarget::Page { page: 1 },
            "##Setup",
            0.5,
        )
        .with_instruction("Insert a space after the '#' heading marker.");
        let message = ChatProvider::user_message(&request);
        assert!(message.starts_with("Insert a space"));
        assert!(message.ends_with("##Setup"));
    }

    #[test]
    fn test_unreachable_endpoint_is_provider_error() {
        let provider = ChatProvider::new("http://127.0.0.1:9", "test-model", Duration::from_millis(200)).unwrap();
        let request = CorrectionRequest::new(
            CorrectionKind::Formatting,
            CorrectionTarget::Page { page: 1 },
            "##Setup",
            0.5,
        );
        assert!(matches!(provider.correct(&request), Err(Error::CorrectionProvider(_))));
    }
}
