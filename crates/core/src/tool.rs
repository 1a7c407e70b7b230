//! Tool trait and registry: the capabilities the model can ask for.
//!
//! The registry serves two purposes:
//! 1. Advertise tool specs to the model (in registration order, so the
//!    same registry state always produces the same request)
//! 2. Resolve and execute the tool calls the model emits
//!
//! Executors produce data only; the caller decides how to fold results
//! into the conversation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::{Content, Message, ToolCallRequest};
use crate::schema;

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's arguments
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// The outcome of one tool call, ready to become a tool turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The request this result answers
    pub tool_call_id: String,

    pub content: Content,

    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: Content::Text(message.into()),
            is_error: true,
        }
    }

    /// Fold an execution outcome into a result the model can read.
    pub fn from_outcome(
        tool_call_id: impl Into<String>,
        outcome: &Result<Content, ToolError>,
    ) -> Self {
        match outcome {
            Ok(content) => Self::ok(tool_call_id, content.clone()),
            Err(e) => Self::error(tool_call_id, format!("Error: {e}")),
        }
    }
}

impl From<ToolResult> for Message {
    fn from(result: ToolResult) -> Self {
        Message::tool(result.tool_call_id, result.content, result.is_error)
    }
}

/// The core Tool trait.
///
/// Tools are registered in the [`ToolRegistry`] and made available to the
/// tool loop. `execute` receives arguments that already passed validation
/// against `parameters_schema`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "list_tables").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Tool-specific deadline; `None` uses the caller's default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError>;

    /// Convert this tool into the spec advertised to the model.
    fn to_spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.parameters_schema())
    }
}

type BoxedExecutor = Box<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<Content, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A tool built from a spec and a closure.
struct FnTool {
    spec: ToolSpec,
    executor: BoxedExecutor,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.spec.input_schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError> {
        (self.executor)(arguments).await
    }

    fn to_spec(&self) -> ToolSpec {
        self.spec.clone()
    }
}

/// An ordered registry of available tools.
///
/// Read-only once built; share it across concurrent loops behind an `Arc`.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Register a tool from a spec and an async executor function.
    pub fn register_fn<F, Fut>(&mut self, spec: ToolSpec, executor: F) -> Result<(), ToolError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Content, ToolError>> + Send + 'static,
    {
        self.register(Box::new(FnTool {
            spec,
            executor: Box::new(move |args| Box::pin(executor(args))),
        }))
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Result<&dyn Tool, ToolError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].as_ref())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All tool specs, in registration order.
    pub fn all_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.to_spec()).collect()
    }

    /// All tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve, validate, and execute a tool call.
    ///
    /// `default_timeout` applies unless the tool declares its own.
    pub async fn try_dispatch(
        &self,
        call: &ToolCallRequest,
        default_timeout: Duration,
    ) -> Result<Content, ToolError> {
        let tool = self.get(&call.name)?;

        schema::validate(&call.arguments, &tool.parameters_schema()).map_err(|reason| {
            ToolError::InvalidArguments {
                tool_name: call.name.clone(),
                reason,
            }
        })?;

        let deadline = tool.timeout().unwrap_or(default_timeout);
        debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        match tokio::time::timeout(deadline, tool.execute(call.arguments.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: deadline.as_secs(),
            }),
        }
    }

    /// Like [`try_dispatch`](Self::try_dispatch), but always yields a
    /// result: failures become `is_error` results the model can react to.
    pub async fn dispatch(&self, call: &ToolCallRequest, default_timeout: Duration) -> ToolResult {
        let outcome = self.try_dispatch(call, default_timeout).await;
        if let Err(e) = &outcome {
            warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
        }
        match outcome {
            Err(ToolError::NotFound(name)) => ToolResult::error(
                &call.id,
                format!(
                    "Error: Tool not found: {name}. Available tools: {}",
                    self.names().join(", ")
                ),
            ),
            other => ToolResult::from_outcome(&call.id, &other),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError> {
            Ok(Content::Text(arguments["text"].as_str().unwrap_or("").to_string()))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<Content, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Content::Text("late".into()))
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest::new("call_1", name, args)
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        assert!(registry.get("echo").is_ok());
        assert!(matches!(
            registry.get("nonexistent"),
            Err(ToolError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let err = registry.register(Box::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn specs_follow_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register_fn(ToolSpec::new(name, "", json!({})), |_| async {
                    Ok(Content::Text(String::new()))
                })
                .unwrap();
        }
        let names: Vec<String> = registry.all_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn dispatch_executes_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();

        let result = registry
            .dispatch(&call("echo", json!({"text": "hello world"})), Duration::from_secs(1))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.tool_call_id, "call_1");
        assert_eq!(result.content, Content::Text("hello world".into()));
    }

    #[tokio::test]
    async fn dispatch_missing_tool_is_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();

        let result = registry
            .dispatch(&call("nonexistent", json!({})), Duration::from_secs(1))
            .await;
        assert!(result.is_error);
        let text = result.content.to_text();
        assert!(text.contains("nonexistent"));
        assert!(text.contains("echo"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_executor() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolSpec::new(
                    "strict",
                    "",
                    json!({"type": "object", "required": ["id"]}),
                ),
                |_| async { Err(ToolError::failed("strict", "executor must not run")) },
            )
            .unwrap();

        let outcome = registry
            .try_dispatch(&call("strict", json!({})), Duration::from_secs(1))
            .await;
        assert!(matches!(outcome, Err(ToolError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn executor_error_folds_into_result() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(ToolSpec::new("boom", "", json!({})), |_| async {
                Err(ToolError::failed("boom", "disk on fire"))
            })
            .unwrap();

        let result = registry
            .dispatch(&call("boom", json!({})), Duration::from_secs(1))
            .await;
        assert!(result.is_error);
        assert!(result.content.to_text().contains("disk on fire"));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_becomes_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool)).unwrap();

        let outcome = registry
            .try_dispatch(&call("slow", json!({})), Duration::from_secs(30))
            .await;
        assert!(matches!(outcome, Err(ToolError::Timeout { .. })));
    }

    #[test]
    fn tool_result_into_message() {
        let msg: Message = ToolResult::error("call_7", "bad").into();
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
        assert!(msg.is_error);
    }
}
