//! Provider trait: the abstraction over model serving endpoints.
//!
//! A Provider knows how to send a conversation (plus the advertised tool
//! specs) to a remote model and parse the reply into a [`ModelResponse`].
//! Endpoints are stateless across calls, so every request carries the
//! full history and the full tool set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::time::Duration;

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolSpec;

/// Per-call model settings, passed explicitly rather than read from
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Serving endpoint / model identifier
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Maximum tokens to generate per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for a single model call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_model_name() -> String {
    "databricks-claude-sonnet-4".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.1
}
fn default_timeout_seconds() -> u64 {
    30
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// One chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// The conversation so far, in order
    pub messages: Vec<Message>,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call, in registration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

impl ProviderRequest {
    /// Build a request from a config bundle, a history, and the tool specs.
    pub fn new(config: &ModelConfig, messages: Vec<Message>, tools: Vec<ToolSpec>) -> Self {
        Self {
            model: config.model_name.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            tools,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Counts come straight from endpoint replies; sums saturate at `u32::MAX`.
impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// A parsed reply from the model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Text content, if the model produced any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool invocations, in the order the model emitted them
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,

    pub finish_reason: FinishReason,

    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

impl ModelResponse {
    /// A plain text answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: String::new(),
        }
    }

    /// A reply requesting tool calls.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
            model: String::new(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assistant turn this reply contributes to the conversation.
    pub fn to_message(&self) -> Message {
        let mut msg = Message::assistant(self.content.clone().unwrap_or_default());
        msg.tool_calls = self.tool_calls.clone();
        msg
    }
}

/// The model endpoint client.
///
/// Implementations issue exactly one request per `complete` call; retry
/// policy belongs to the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ProviderError>;

    /// Health check: can we reach the endpoint?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
