//! The tool-calling loop.
//!
//! Drives round trips between the model endpoint and the tool registry:
//!
//! ```text
//! AwaitingModel ──tool calls──▶ Dispatching ──all results appended──▶ AwaitingModel
//!       │                                                               │
//!       └── no tool calls ──▶ Done          iteration cap / fatal ──▶ Failed
//! ```
//!
//! A cancellation token is checked before every transition and raced
//! against in-flight model calls, tool calls, and backoff sleeps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use servechat_config::AppConfig;
use servechat_core::error::ProviderError;
use servechat_core::message::{Conversation, Message};
use servechat_core::provider::{FinishReason, ModelConfig, ModelResponse, Provider, ProviderRequest, Usage};
use servechat_core::tool::{ToolRegistry, ToolResult};
use servechat_telemetry::{OutcomeStatus, TraceLogger};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// How a loop invocation that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Complete,
    /// Stopped by the cancellation token; the transcript is incomplete.
    Cancelled,
}

/// The outcome of one loop invocation.
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// The model's final answer (`None` when cancelled).
    pub final_content: Option<String>,
    /// The full conversation, including tool turns.
    pub transcript: Conversation,
    /// Model calls made.
    pub iterations_used: usize,
    pub usage_total: Usage,
    pub trace_id: String,
    pub status: LoopStatus,
}

impl LoopResult {
    pub fn is_complete(&self) -> bool {
        self.status == LoopStatus::Complete
    }
}

/// Why a loop invocation failed.
///
/// Tool failures never appear here: they become error tool turns.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("model endpoint unavailable after {attempts} attempts: {source}")]
    TransportExhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("{0}")]
    Protocol(ProviderError),

    #[error("model request rejected: {0}")]
    Provider(ProviderError),

    #[error("model reported an error: {message}")]
    ModelError { message: String },

    #[error("model requested unknown tool '{tool_name}' in {streak} consecutive rounds")]
    UnknownToolLimit { tool_name: String, streak: usize },

    #[error("no final answer after {iterations} model calls")]
    LoopExhausted { iterations: usize },
}

impl LoopError {
    /// Text suitable for showing the end user.
    pub fn user_message(&self) -> String {
        match self {
            LoopError::TransportExhausted { .. } => {
                "The model service is currently unavailable. Please try again in a moment.".into()
            }
            LoopError::Protocol(_) => {
                "The model service returned a response I could not understand.".into()
            }
            LoopError::Provider(ProviderError::AuthenticationFailed(_)) => {
                "The model service rejected the request. Check the endpoint credentials.".into()
            }
            LoopError::Provider(ProviderError::NotConfigured(detail)) => {
                format!("The model endpoint is not configured: {detail}")
            }
            LoopError::Provider(e) => format!("The model service rejected the request: {e}"),
            LoopError::ModelError { message } => format!("I encountered an error: {message}"),
            LoopError::UnknownToolLimit { .. } => {
                "I could not complete the request: the model kept asking for tools that do not exist."
                    .into()
            }
            LoopError::LoopExhausted { iterations } => format!(
                "I could not complete the request within {iterations} steps. \
                 Try rephrasing or splitting it into smaller questions."
            ),
        }
    }
}

/// A failed loop invocation, with what it had spent before failing.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct LoopFailure {
    pub error: LoopError,
    pub trace_id: String,
    /// Model calls made, including the one that failed.
    pub iterations_used: usize,
    /// Usage reported by the replies that did arrive.
    pub usage_total: Usage,
}

impl LoopFailure {
    pub fn user_message(&self) -> String {
        self.error.user_message()
    }
}

enum LoopState {
    AwaitingModel,
    Dispatching {
        sent: Vec<Message>,
        response: ModelResponse,
    },
}

/// Run `fut` unless `cancel` fires first. `None` means cancelled.
async fn unless_cancelled<F: Future>(cancel: Option<&CancellationToken>, fut: F) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|t| t.is_cancelled())
}

/// Orchestrates model calls and tool dispatch for one conversation at a time.
///
/// Holds only shared, read-only state, so one `ToolLoop` can serve many
/// concurrent requests.
pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: ModelConfig,
    system_prompt: Option<String>,
    max_iterations: usize,
    max_unknown_tool_streak: usize,
    retry: RetryPolicy,
    tool_timeout: Duration,
    logger: TraceLogger,
}

impl ToolLoop {
    /// Create a loop with default limits and no system prompt.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: ModelConfig) -> Self {
        Self {
            provider,
            tools,
            model,
            system_prompt: None,
            max_iterations: 10,
            max_unknown_tool_streak: 3,
            retry: RetryPolicy::default(),
            tool_timeout: Duration::from_secs(30),
            logger: TraceLogger::new(),
        }
    }

    /// Create a loop with every setting taken from config.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self::new(provider, tools, config.endpoint.model_config())
            .with_system_prompt(config.agent.system_prompt.clone())
            .with_max_iterations(config.agent.max_iterations)
            .with_max_unknown_tool_streak(config.agent.max_unknown_tool_streak)
            .with_retry_policy(RetryPolicy::from_config(&config.agent))
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_seconds))
    }

    /// Seed conversations that lack a system turn with this prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// Set the maximum number of model calls per invocation.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Consecutive rounds with an unknown tool name tolerated before failing.
    pub fn with_max_unknown_tool_streak(mut self, max: usize) -> Self {
        self.max_unknown_tool_streak = max;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Default deadline for tools that do not declare their own.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_trace_logger(mut self, logger: TraceLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the loop under a fresh trace id.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        cancel: Option<CancellationToken>,
    ) -> Result<LoopResult, LoopFailure> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        self.run_traced(conversation, &trace_id, cancel).await
    }

    /// Run the loop, recording every round under `trace_id`.
    ///
    /// `conversation` is extended in place; on failure it keeps every turn
    /// produced before the failure, and the [`LoopFailure`] carries the
    /// iteration count and usage so far.
    pub async fn run_traced(
        &self,
        conversation: &mut Conversation,
        trace_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<LoopResult, LoopFailure> {
        let cancel = cancel.as_ref();
        if let Some(prompt) = &self.system_prompt {
            conversation.ensure_system_prompt(prompt.clone());
        }

        let specs = self.tools.all_specs();
        let mut iterations = 0usize;
        let mut usage_total = Usage::default();
        let mut unknown_streak = 0usize;
        let mut state = LoopState::AwaitingModel;

        info!(
            trace_id,
            conversation_id = %conversation.id,
            messages = conversation.len(),
            tools = specs.len(),
            "Starting tool loop"
        );

        loop {
            if is_cancelled(cancel) {
                // Rounds interrupted mid-dispatch are still recorded
                if let LoopState::Dispatching { sent, response } = &state {
                    self.logger
                        .record_round(trace_id, iterations, sent, response, &[]);
                }
                return Ok(self.cancelled(conversation, trace_id, iterations, usage_total));
            }

            state = match state {
                LoopState::AwaitingModel => {
                    if iterations >= self.max_iterations {
                        warn!(trace_id, iterations, "Iteration cap reached without a final answer");
                        return Err(self.fail(
                            trace_id,
                            iterations,
                            usage_total,
                            LoopError::LoopExhausted { iterations },
                        ));
                    }
                    iterations += 1;
                    debug!(trace_id, iteration = iterations, "Awaiting model");

                    let sent = conversation.messages().to_vec();
                    let request = ProviderRequest::new(&self.model, sent.clone(), specs.clone());

                    let response = match self.call_model(request, trace_id, cancel).await {
                        Ok(Some(response)) => response,
                        Ok(None) => {
                            return Ok(self.cancelled(conversation, trace_id, iterations, usage_total));
                        }
                        Err(e) => return Err(self.fail(trace_id, iterations, usage_total, e)),
                    };
                    usage_total += response.usage;

                    if response.has_tool_calls() {
                        conversation.push(response.to_message());
                        LoopState::Dispatching { sent, response }
                    } else if response.finish_reason == FinishReason::Error {
                        self.logger
                            .record_round(trace_id, iterations, &sent, &response, &[]);
                        let message = response
                            .content
                            .clone()
                            .unwrap_or_else(|| "the model ended the turn with an error".into());
                        return Err(self.fail(
                            trace_id,
                            iterations,
                            usage_total,
                            LoopError::ModelError { message },
                        ));
                    } else {
                        conversation.push(response.to_message());
                        self.logger
                            .record_round(trace_id, iterations, &sent, &response, &[]);
                        return Ok(self.complete(
                            conversation,
                            trace_id,
                            iterations,
                            usage_total,
                            response.content,
                        ));
                    }
                }

                LoopState::Dispatching { sent, response } => {
                    let mut results: Vec<ToolResult> = Vec::with_capacity(response.tool_calls.len());
                    let mut unknown_tool = None;

                    for call in &response.tool_calls {
                        if !self.tools.contains(&call.name) {
                            warn!(trace_id, tool = %call.name, call_id = %call.id, "Model requested unknown tool");
                            if unknown_tool.is_none() {
                                unknown_tool = Some(call.name.clone());
                            }
                        }

                        let dispatched =
                            unless_cancelled(cancel, self.tools.dispatch(call, self.tool_timeout)).await;
                        let Some(result) = dispatched else {
                            self.logger
                                .record_round(trace_id, iterations, &sent, &response, &results);
                            return Ok(self.cancelled(conversation, trace_id, iterations, usage_total));
                        };

                        debug!(
                            trace_id,
                            tool = %call.name,
                            call_id = %call.id,
                            is_error = result.is_error,
                            "Tool call finished"
                        );
                        conversation.push(result.clone().into());
                        results.push(result);
                    }

                    self.logger
                        .record_round(trace_id, iterations, &sent, &response, &results);

                    match unknown_tool {
                        Some(tool_name) => {
                            unknown_streak += 1;
                            if unknown_streak > self.max_unknown_tool_streak {
                                return Err(self.fail(
                                    trace_id,
                                    iterations,
                                    usage_total,
                                    LoopError::UnknownToolLimit {
                                        tool_name,
                                        streak: unknown_streak,
                                    },
                                ));
                            }
                        }
                        None => unknown_streak = 0,
                    }

                    LoopState::AwaitingModel
                }
            };
        }
    }

    /// One logical model call: per-attempt timeout plus transport retries.
    ///
    /// `Ok(None)` means the call was cancelled.
    async fn call_model(
        &self,
        request: ProviderRequest,
        trace_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<ModelResponse>, LoopError> {
        let timeout = self.model.timeout();
        let mut attempt = 0u32;

        loop {
            let call = tokio::time::timeout(timeout, self.provider.complete(request.clone()));
            let outcome = match unless_cancelled(cancel, call).await {
                None => return Ok(None),
                Some(Ok(outcome)) => outcome,
                Some(Err(_)) => Err(ProviderError::Timeout(format!(
                    "no reply within {}s",
                    timeout.as_secs()
                ))),
            };

            let error = match outcome {
                Ok(response) => return Ok(Some(response)),
                Err(e) => e,
            };

            if error.is_protocol() {
                return Err(LoopError::Protocol(error));
            }
            if !error.is_transport() {
                return Err(LoopError::Provider(error));
            }
            if attempt >= self.retry.max_retries {
                return Err(LoopError::TransportExhausted {
                    attempts: attempt + 1,
                    source: error,
                });
            }

            let delay = self.retry.delay_after(attempt, &error);
            warn!(
                trace_id,
                provider = self.provider.name(),
                attempt = attempt + 1,
                max = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                err = %error,
                "Retrying model call after transport error"
            );
            if unless_cancelled(cancel, tokio::time::sleep(delay)).await.is_none() {
                return Ok(None);
            }
            attempt += 1;
        }
    }

    fn complete(
        &self,
        conversation: &Conversation,
        trace_id: &str,
        iterations: usize,
        usage_total: Usage,
        final_content: Option<String>,
    ) -> LoopResult {
        info!(trace_id, iterations, total_tokens = usage_total.total_tokens, "Tool loop complete");
        self.logger.record_outcome(
            trace_id,
            OutcomeStatus::Complete,
            iterations,
            usage_total,
            final_content.clone(),
            None,
        );
        LoopResult {
            final_content: Some(final_content.unwrap_or_default()),
            transcript: conversation.clone(),
            iterations_used: iterations,
            usage_total,
            trace_id: trace_id.to_string(),
            status: LoopStatus::Complete,
        }
    }

    fn cancelled(
        &self,
        conversation: &Conversation,
        trace_id: &str,
        iterations: usize,
        usage_total: Usage,
    ) -> LoopResult {
        info!(trace_id, iterations, "Tool loop cancelled");
        self.logger.record_outcome(
            trace_id,
            OutcomeStatus::Cancelled,
            iterations,
            usage_total,
            None,
            None,
        );
        LoopResult {
            final_content: None,
            transcript: conversation.clone(),
            iterations_used: iterations,
            usage_total,
            trace_id: trace_id.to_string(),
            status: LoopStatus::Cancelled,
        }
    }

    fn fail(&self, trace_id: &str, iterations: usize, usage_total: Usage, error: LoopError) -> LoopFailure {
        warn!(trace_id, iterations, error = %error, "Tool loop failed");
        self.logger.record_outcome(
            trace_id,
            OutcomeStatus::Failed,
            iterations,
            usage_total,
            None,
            Some(error.to_string()),
        );
        LoopFailure {
            error,
            trace_id: trace_id.to_string(),
            iterations_used: iterations,
            usage_total,
        }
    }
}
