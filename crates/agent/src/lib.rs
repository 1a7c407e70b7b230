//! The tool-calling loop at the heart of servechat.
//!
//! One invocation follows an **Ask → Act → Observe** cycle:
//!
//! 1. **Seed** the conversation with the system prompt if it has none
//! 2. **Ask** the model endpoint, sending the full history and every tool spec
//! 3. **If tool calls**: dispatch each one in order, append the results, go to 2
//! 4. **If text**: return it as the final answer
//!
//! The loop stops early on cancellation, on a fatal endpoint error, or when
//! the iteration cap is reached.

pub mod loop_runner;
pub mod retry;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{LoopError, LoopFailure, LoopResult, LoopStatus, ToolLoop};
pub use retry::RetryPolicy;
