//! Error types for the servechat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; crates further up the
//! stack wrap these in their own (`LoopError`, `GatewayError`).

use thiserror::Error;

// --- Bounded context errors ---

/// Failures talking to a model serving endpoint.
///
/// Split into two families: transport failures (network, timeout, rate
/// limiting, server-side 5xx), which the caller may retry, and everything
/// else, which it must not.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The endpoint answered, but not in a shape we can parse.
    #[error("Malformed endpoint reply: {message}")]
    Protocol { message: String, raw: String },

    #[error("Endpoint not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Build a protocol error, keeping the raw payload for diagnosis.
    pub fn protocol(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Whether this is a transport-level failure (eligible for retry).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Whether this is a malformed-reply failure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Failures resolving or executing a tool call.
///
/// These never escape the tool loop: they are folded into the
/// conversation as error tool turns.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

impl ToolError {
    /// Convenience constructor for executor failures.
    pub fn failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}
