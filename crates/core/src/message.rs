//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole system:
//! user sends a message → the tool loop extends the conversation →
//! the model endpoint sees the full history on every round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    /// The wire name of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn content: plain text, or a structured payload (tool results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Json(serde_json::Value),
}

impl Content {
    /// Render the content as text, serializing structured payloads as JSON.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Json(v) => v.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Json(v) => v.is_null(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Content {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::String(s) => Content::Text(s),
            other => Content::Json(other),
        }
    }
}

impl std::fmt::Display for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::Text(s) => f.write_str(s),
            Content::Json(v) => write!(f, "{v}"),
        }
    }
}

/// A tool invocation requested by the model inside an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation token; the matching tool turn carries it back
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as structured JSON
    pub arguments: serde_json::Value,

    /// The argument string exactly as the endpoint sent it, replayed
    /// verbatim in later rounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// Keep the wire argument string this call was decoded from.
    pub fn with_raw_arguments(mut self, raw: impl Into<String>) -> Self {
        self.raw_arguments = Some(raw.into());
        self
    }

    /// The argument string to send back to the endpoint.
    pub fn wire_arguments(&self) -> String {
        if let Some(raw) = &self.raw_arguments {
            return raw.clone();
        }
        match &self.arguments {
            // A string that never parsed goes back out exactly as received
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The content
    #[serde(default)]
    pub content: Content,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set on tool turns whose execution failed
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Content::Text(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Content::Text(content.into()))
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Content::Text(content.into()))
    }

    /// Create a tool result message.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<Content>, is_error: bool) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg.is_error = is_error;
        msg
    }

    /// Text view of the content (structured payloads rendered as JSON).
    pub fn text(&self) -> String {
        self.content.to_text()
    }
}

/// An ordered, append-only sequence of turns.
///
/// Existing turns can be read but never mutated or removed; the only way
/// to change a conversation is [`Conversation::push`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a conversation carrying prior turns forward.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut conv = Self::new();
        conv.messages.extend(messages);
        conv
    }

    /// Append a turn.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// All turns, in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the first turn is a system prompt.
    pub fn has_system_prompt(&self) -> bool {
        self.messages.first().is_some_and(|m| m.role == Role::System)
    }

    /// Put `prompt` in the leading slot unless a system turn is already there.
    ///
    /// Returns whether a turn was added. Existing turns are left untouched.
    pub fn ensure_system_prompt(&mut self, prompt: impl Into<String>) -> bool {
        if self.has_system_prompt() {
            return false;
        }
        self.updated_at = Utc::now();
        self.messages.insert(0, Message::system(prompt));
        true
    }

    /// The most recent user turn's text, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
