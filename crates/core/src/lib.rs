//! # servechat Core
//!
//! Domain types, traits, and error definitions for servechat.
//! This crate has **no HTTP or framework dependencies**: it defines the
//! conversation model, the model-endpoint contract, and the tool registry
//! that every other crate implements against.
//!
//! ## Layout
//!
//! - [`message`]: role-tagged turns and the append-only [`Conversation`]
//! - [`provider`]: the [`Provider`] trait (model endpoint client) and its
//!   request/response types
//! - [`tool`]: the [`Tool`] trait, [`ToolSpec`], and the [`ToolRegistry`]
//! - [`schema`]: argument validation against a tool's input schema

pub mod error;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use message::{Content, Conversation, ConversationId, Message, Role, ToolCallRequest};
pub use provider::{FinishReason, ModelConfig, ModelResponse, Provider, ProviderRequest, Usage};
pub use tool::{Tool, ToolRegistry, ToolResult, ToolSpec};
