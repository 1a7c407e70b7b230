//! Shared test helpers for loop tests.

use servechat_core::error::ProviderError;
use servechat_core::message::ToolCallRequest;
use servechat_core::provider::{ModelResponse, Provider, ProviderRequest, Usage};
use std::sync::Mutex;
use std::time::Duration;

/// A mock provider that replays a scripted sequence of outcomes.
///
/// Each call to `complete` returns the next outcome; once the script runs
/// out the last outcome repeats. Every request is captured.
pub struct ScriptedProvider {
    script: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(script: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        assert!(!script.is_empty(), "ScriptedProvider needs at least one outcome");
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ProviderError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.script.lock().unwrap();
        script[index.min(script.len() - 1)].clone()
    }
}

fn mock_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// A final text answer.
pub fn text_response(text: &str) -> ModelResponse {
    let mut response = ModelResponse::text(text).with_usage(mock_usage());
    response.model = "mock-model".into();
    response
}

/// A reply requesting the given tool calls.
pub fn tool_response(calls: Vec<ToolCallRequest>) -> ModelResponse {
    let mut response = ModelResponse::tool_calls(calls).with_usage(mock_usage());
    response.model = "mock-model".into();
    response
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}
