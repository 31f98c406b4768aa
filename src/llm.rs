use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{Report, ServiceError, Warning};
use crate::parser::blocks::ContentBlock;
use crate::retry::RetryPolicy;

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
/// Upper bound the chat endpoint accepts for `max_tokens`.
const MAX_COMPLETION_TOKENS: u32 = 4000;
const COMPLETION_TIMEOUT_SECS: u64 = 120;

/// One request to the text-structuring service.
#[derive(Debug, Clone)]
pub struct StructuringRequest {
    pub instruction: String,
    pub payload: String,
    pub max_output_tokens: u32,
    pub json_output: bool,
}

impl StructuringRequest {
    /// Instruction and payload as one user prompt.
    pub fn prompt(&self) -> String {
        format!("{}\n{}", self.instruction, self.payload)
    }
}

#[async_trait]
pub trait StructuringService: Send + Sync {
    /// Raw response text. Transport and API failures are errors; judging the
    /// text itself is left to the caller.
    async fn complete(&self, request: &StructuringRequest) -> Result<String, ServiceError>;
}

// ── Prompts ──

pub const SEGMENT_INSTRUCTION: &str = r#"Please help organize the raw contents extracted from a html into structured json blob.
The returned json keyed by "content" will be merged into a long list.

Please note:
1. The html can contain titles (h1, h2, h3), texts, codes, images (<img>), and videos.
2. If the texts themselves have ", please replace it with '.
3. Please merge consecutive code lines or paragraphs into one entry.

The json blob is expected to have the following structure:
{
    "content": [
        {"type": "h1", "text": "Section title"},
        {"type": "h2", "text": "Subsection title"},
        {"type": "text", "text": "Paragraph text"},
        {"type": "code", "text": "Code"},
        {"type": "image", "url": "https://image_url"},
        {"type": "video", "url": "https://video_url"}
    ]
}

The contents are below:"#;

const TAGGING_HINTS: &str = r#"Some suggested tags:
1. If this article is about building agent, please add the tag Agent.
2. If this article is about LLM, please add the tag LLM.
3. If this article is about deep learning in general, please add the tag Deep Learning.
4. If this article is about tech philosophy, please add the tag Tech Philosophy.
5. Please use any other tags that you think are relevant."#;

const TAGGING_FORMAT: &str = r#"Please generate the tags in the same language as the contents, and return in below json format:
{
    "tags": ["tag1", "tag2", "tag3"]
}"#;

/// Tagging prompt for the given article text. The topic hints are only
/// offered for curated article sources.
pub fn tagging_instruction(with_hints: bool) -> String {
    let mut s = String::from("Please help generate the tags based on the contents below the line.\n");
    if with_hints {
        s.push('\n');
        s.push_str(TAGGING_HINTS);
        s.push('\n');
    }
    s.push('\n');
    s.push_str(TAGGING_FORMAT);
    s.push_str("\n---");
    s
}

/// Ask the service for tags describing `blocks`. An unparsable reply yields
/// no tags and a warning; a failed call is an error.
pub async fn auto_tags(
    service: &dyn StructuringService,
    blocks: &[ContentBlock],
    with_hints: bool,
    max_output_tokens: u32,
    report: &mut Report,
) -> Result<Vec<String>, ServiceError> {
    let payload = blocks
        .iter()
        .filter_map(|b| b.text_value())
        .collect::<Vec<_>>()
        .join("\n");
    let request = StructuringRequest {
        instruction: tagging_instruction(with_hints),
        payload,
        max_output_tokens,
        json_output: true,
    };
    let raw = service.complete(&request).await?;
    match parse_tags(&raw) {
        Ok(tags) => {
            info!("Auto-generated {} tags", tags.len());
            Ok(tags)
        }
        Err(reason) => {
            report.push(Warning::TagsDiscarded { reason });
            Ok(Vec::new())
        }
    }
}

/// `{"tags": [...]}` to a list of strings. Non-string entries are dropped.
pub fn parse_tags(raw: &str) -> Result<Vec<String>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))?;
    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing \"tags\" array".to_string())?;
    Ok(tags
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

// ── OpenAI-compatible chat completions ──

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

pub struct OpenAiStructurer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenAiStructurer {
    pub fn new(api_key: impl Into<String>, settings: &Settings) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(COMPLETION_TIMEOUT_SECS))
            .build()
            .map_err(|e| ServiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            retry: settings.retry_policy(),
        })
    }

    /// Reads `OPENAI_API_KEY`.
    pub fn from_env(settings: &Settings) -> Result<Self, ServiceError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ServiceError::Config("OPENAI_API_KEY must be set".into()))?;
        Self::new(api_key, settings)
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "chat completion rejected");
            return Err(ServiceError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Api(format!("unreadable response: {}", e)))?;
        parse_completion(&value)
    }
}

#[async_trait]
impl StructuringService for OpenAiStructurer {
    async fn complete(&self, request: &StructuringRequest) -> Result<String, ServiceError> {
        let prompt = request.prompt();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: request.max_output_tokens.min(MAX_COMPLETION_TOKENS),
            temperature: self.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let start = Instant::now();
        let content = self
            .retry
            .run("chat completion", || self.send(&body))
            .await?;
        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "chat completion"
        );
        Ok(content)
    }
}

/// Pull `choices[0].message.content` out of a chat completion body.
pub fn parse_completion(value: &Value) -> Result<String, ServiceError> {
    let choice = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| ServiceError::Api("failed to parse choices from completion".into()))?;
    let message = choice
        .get("message")
        .filter(|m| !m.is_null())
        .ok_or_else(|| ServiceError::Api("failed to parse message from completion".into()))?;
    message
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Api("failed to parse content from completion".into()))
}
