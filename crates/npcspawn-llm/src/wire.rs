//! Request and response bodies for the two supported endpoint kinds.
//!
//! - `openai`: chat completions, `Authorization: Bearer`, text in
//!   `choices[0].message.content`
//! - `anthropic`: Messages API, `x-api-key` plus `anthropic-version`, system
//!   messages folded into `system`, text concatenated from `text` blocks

use serde::{Deserialize, Serialize};
use std::time::Duration;

use npcspawn_config::{BackendProfile, EndpointKind};
use npcspawn_utils::redaction::redact_error_message;

use crate::transport::TransportRequest;
use crate::types::{Message, RequestPayload, Role};

/// Default OpenAI-compatible endpoint
pub const DEFAULT_OPENAI_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default Anthropic endpoint
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Reported model name when neither payload nor profile sets one
pub const UNSPECIFIED_MODEL: &str = "default";

/// Longest slice of an error body carried into messages
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Sampling parameters used when neither payload nor profile sets them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            temperature: 0.8,
        }
    }
}

/// Parameters after applying payload > profile > defaults precedence
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ResolvedParams {
    #[must_use]
    pub fn resolve(
        payload: &RequestPayload,
        profile: &BackendProfile,
        defaults: SamplingDefaults,
    ) -> Self {
        Self {
            model: payload.model.clone().or_else(|| profile.model.clone()),
            max_tokens: payload
                .max_tokens
                .or(profile.max_tokens)
                .unwrap_or(defaults.max_tokens),
            temperature: payload
                .temperature
                .or(profile.temperature)
                .unwrap_or(defaults.temperature),
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(UNSPECIFIED_MODEL)
    }
}

/// Why a request body could not be built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    MissingModel,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingModel => write!(
                f,
                "anthropic profiles need a model; set `model` on the profile"
            ),
        }
    }
}

/// Build the HTTP request for `profile`.
///
/// `api_key` is the already-resolved secret; `None` sends no auth header,
/// which local OpenAI-compatible servers accept.
pub fn build_request(
    profile: &BackendProfile,
    params: &ResolvedParams,
    messages: &[Message],
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<TransportRequest, BuildError> {
    let mut headers = Vec::new();
    let (url, body) = match profile.kind {
        EndpointKind::OpenAi => {
            if let Some(key) = api_key {
                headers.push(("authorization".to_string(), format!("Bearer {key}")));
            }
            let body = OpenAiRequest {
                model: params.model.clone(),
                messages: messages
                    .iter()
                    .map(|m| WireMessage {
                        role: m.role.as_str(),
                        content: m.content.clone(),
                    })
                    .collect(),
                max_tokens: params.max_tokens,
                temperature: params.temperature,
                stream: false,
            };
            (DEFAULT_OPENAI_URL, to_value(&body))
        }
        EndpointKind::Anthropic => {
            let model = params.model.clone().ok_or(BuildError::MissingModel)?;
            if let Some(key) = api_key {
                headers.push(("x-api-key".to_string(), key.to_string()));
            }
            headers.push((
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ));
            let (system, messages) = split_system(messages);
            let body = AnthropicRequest {
                model,
                messages,
                max_tokens: params.max_tokens,
                temperature: params.temperature,
                system,
            };
            (DEFAULT_ANTHROPIC_URL, to_value(&body))
        }
    };

    Ok(TransportRequest {
        url: profile.base_url.clone().unwrap_or_else(|| url.to_string()),
        headers,
        body,
        proxy: profile.proxy.clone(),
        timeout,
    })
}

fn to_value<T: Serialize>(body: &T) -> serde_json::Value {
    // Plain structs of strings and numbers always serialize
    serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
}

/// Fold system messages into one string; keep the rest in order
fn split_system(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system: Option<String> = None;
    let mut rest = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => match system.as_mut() {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User | Role::Assistant => rest.push(WireMessage {
                role: msg.role.as_str(),
                content: msg.content.clone(),
            }),
        }
    }

    (system, rest)
}

/// Text and token usage pulled out of a 2xx body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub text: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

/// Extract generated text from a successful response body.
///
/// Returns a reason string when the body is not the expected shape or
/// carries no text.
pub fn parse_response(kind: EndpointKind, body: &str) -> Result<ParsedResponse, String> {
    let parsed = match kind {
        EndpointKind::OpenAi => {
            let response: OpenAiResponse = serde_json::from_str(body)
                .map_err(|e| format!("Failed to parse chat completion: {e}"))?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| "response missing choices[0]".to_string())?;
            let text = choice
                .message
                .content
                .ok_or_else(|| "response missing content in choices[0]".to_string())?;
            ParsedResponse {
                text,
                tokens_input: response.usage.as_ref().map(|u| u.prompt_tokens),
                tokens_output: response.usage.as_ref().map(|u| u.completion_tokens),
            }
        }
        EndpointKind::Anthropic => {
            let response: AnthropicResponse = serde_json::from_str(body)
                .map_err(|e| format!("Failed to parse messages response: {e}"))?;
            let text: String = response
                .content
                .iter()
                .filter(|block| block.content_type == "text")
                .filter_map(|block| block.text.as_deref())
                .collect();
            ParsedResponse {
                text,
                tokens_input: response.usage.as_ref().map(|u| u.input_tokens),
                tokens_output: response.usage.as_ref().map(|u| u.output_tokens),
            }
        }
    };

    let text = parsed.text.trim();
    if text.is_empty() {
        return Err("response contained no text".to_string());
    }
    Ok(ParsedResponse {
        text: text.to_string(),
        ..parsed
    })
}

/// Parse a `Retry-After` value given as decimal seconds.
///
/// HTTP-date values and anything negative or non-finite yield `None`; the
/// caller then falls back to exponential backoff.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<f64> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Human-readable message from an error body.
///
/// Prefers `error.message` (both providers use it), falls back to a bounded,
/// redacted slice of the raw body.
#[must_use]
pub fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message);
    let message = match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "empty response body".to_string(),
        None => body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect(),
    };
    redact_error_message(&message)
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}
