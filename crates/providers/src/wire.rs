//! Chat-completions wire format.
//!
//! Pure functions between the domain types and the JSON an
//! OpenAI-compatible endpoint speaks. Nothing here touches the network,
//! so the whole codec is testable against canned fixtures.
//!
//! Tool-call arguments are a JSON *string* on the wire and structured
//! JSON in the domain. An argument string that does not parse is kept
//! verbatim as a JSON string value; schema validation then rejects it
//! and the model sees an error tool turn instead of the round failing.

use serde::{Deserialize, Serialize};
use servechat_core::error::ProviderError;
use servechat_core::message::{Content, Message, ToolCallRequest};
use servechat_core::provider::{FinishReason, ModelResponse, ProviderRequest, Usage};
use servechat_core::tool::ToolSpec;

// --- Request side ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub role: String,
    /// Plain string, or (in replies) an array of content parts
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// A JSON-encoded string per the protocol; some endpoints send an object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTool {
    pub r#type: String,
    pub function: WireToolFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

fn function_type() -> String {
    "function".into()
}

// --- Response side ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChoice {
    #[serde(default)]
    pub index: u32,
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

impl From<Usage> for WireUsage {
    fn from(u: Usage) -> Self {
        WireUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// Encode a domain request into its wire body.
pub fn encode_request(request: &ProviderRequest) -> WireRequest {
    WireRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(encode_message).collect(),
        tools: request.tools.iter().map(encode_tool).collect(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Encode one conversation turn.
pub fn encode_message(message: &Message) -> WireMessage {
    let text = message.content.to_text();
    let tool_calls: Vec<WireToolCall> = message
        .tool_calls
        .iter()
        .map(|tc| WireToolCall {
            id: Some(tc.id.clone()),
            r#type: function_type(),
            function: WireFunction {
                name: tc.name.clone(),
                arguments: serde_json::Value::String(tc.wire_arguments()),
            },
        })
        .collect();

    // Assistant turns that only call tools carry `content: null`
    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(serde_json::Value::String(text))
    };

    WireMessage {
        role: message.role.as_str().to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn encode_tool(spec: &ToolSpec) -> WireTool {
    WireTool {
        r#type: function_type(),
        function: WireToolFunction {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.input_schema.clone(),
        },
    }
}

/// Decode a raw reply body.
///
/// Anything that is not a chat-completion object with at least one
/// choice is a protocol error carrying the raw body.
pub fn decode_response(raw: &str) -> Result<ModelResponse, ProviderError> {
    let wire: WireResponse = serde_json::from_str(raw)
        .map_err(|e| ProviderError::protocol(format!("invalid chat completion: {e}"), raw))?;
    from_wire(wire).map_err(|message| ProviderError::protocol(message, raw))
}

/// Convert a parsed wire reply into the domain response.
pub fn from_wire(wire: WireResponse) -> Result<ModelResponse, String> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "reply has no choices".to_string())?;

    let role = choice.message.role.as_str();
    if role != "assistant" && !role.is_empty() {
        return Err(format!("unexpected reply role '{role}'"));
    }

    let tool_calls: Vec<ToolCallRequest> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(decode_tool_call)
        .collect();

    let content = choice
        .message
        .content
        .as_ref()
        .and_then(decode_content)
        .filter(|s| !s.is_empty());

    let finish_reason = map_finish_reason(choice.finish_reason.as_deref(), !tool_calls.is_empty());

    Ok(ModelResponse {
        content,
        tool_calls,
        finish_reason,
        usage: wire.usage.map(Usage::from).unwrap_or_default(),
        model: wire.model.unwrap_or_default(),
    })
}

fn decode_tool_call(call: WireToolCall) -> ToolCallRequest {
    let id = call
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    let raw = match &call.function.arguments {
        serde_json::Value::String(raw) if !raw.trim().is_empty() => Some(raw.clone()),
        _ => None,
    };
    let request = ToolCallRequest::new(id, call.function.name, decode_arguments(call.function.arguments));
    match raw {
        Some(raw) => request.with_raw_arguments(raw),
        None => request,
    }
}

/// Parse the argument string; keep it verbatim when it is not JSON.
pub fn decode_arguments(arguments: serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
        serde_json::Value::String(raw) => {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        }
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    }
}

/// Plain string content, or the text parts of a content-part array.
fn decode_content(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            (!text.is_empty()).then(|| text.join(""))
        }
        _ => None,
    }
}

/// Map a wire finish reason onto the domain enum.
///
/// A missing reason is inferred from whether tool calls are present.
pub fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> FinishReason {
    match reason {
        Some("stop" | "end_turn" | "stop_sequence") => FinishReason::Stop,
        Some("tool_calls" | "function_call" | "tool_use") => FinishReason::ToolCalls,
        Some("length" | "max_tokens") => FinishReason::Length,
        None if has_tool_calls => FinishReason::ToolCalls,
        None => FinishReason::Stop,
        Some(_) => FinishReason::Error,
    }
}

/// Render a domain response as a chat-completion body (used by the HTTP API).
pub fn encode_response(id: &str, response: &ModelResponse) -> WireResponse {
    let message = encode_message(&response.to_message());
    WireResponse {
        id: Some(id.to_string()),
        object: Some("chat.completion".into()),
        created: Some(chrono::Utc::now().timestamp()),
        model: Some(response.model.clone()),
        choices: vec![WireChoice {
            index: 0,
            message,
            finish_reason: Some(response.finish_reason.as_str().to_string()),
        }],
        usage: Some(response.usage.into()),
    }
}

/// Decode an inbound chat message list (`[{role, content}]`) into turns.
pub fn decode_messages(messages: &[WireMessage]) -> Result<Vec<Message>, String> {
    messages
        .iter()
        .map(|m| {
            let text = m.content.as_ref().and_then(decode_content).unwrap_or_default();
            let message = match m.role.as_str() {
                "system" => Message::system(text),
                "user" => Message::user(text),
                "assistant" => {
                    let mut msg = Message::assistant(text);
                    msg.tool_calls = m
                        .tool_calls
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .map(decode_tool_call)
                        .collect();
                    msg
                }
                "tool" => Message::tool(
                    m.tool_call_id.clone().unwrap_or_default(),
                    Content::Text(text),
                    false,
                ),
                other => return Err(format!("unknown role '{other}'")),
            };
            Ok(message)
        })
        .collect()
}
