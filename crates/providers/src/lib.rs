//! Model endpoint clients for servechat.
//!
//! All clients implement the `servechat_core::Provider` trait. The
//! [`wire`] module is the transport adapter: it owns the chat-completions
//! JSON shape so neither the loop nor the client depends on it.

pub mod openai_compat;
pub mod wire;

pub use openai_compat::OpenAiCompatProvider;
