//! `servechat ask`: Single-message mode.
//!
//! Runs one loop invocation, then prints the final answer and the whole
//! transcript (or a JSON document with `--json`). Ctrl-C cancels the
//! loop and prints what was gathered so far.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use servechat_agent::{LoopFailure, LoopResult, LoopStatus, ToolLoop};
use servechat_config::AppConfig;
use servechat_core::message::{Conversation, Message, Role};
use servechat_core::provider::{Provider, Usage};
use servechat_providers::OpenAiCompatProvider;
use servechat_telemetry::{JsonlTraceSink, TraceLogger};
use servechat_tools::{Catalog, default_registry};

pub const MISSING_TOKEN: &str = "No endpoint token configured. Set DATABRICKS_TOKEN (or SERVECHAT_API_KEY) \
     and DATABRICKS_HOST, or add them to the [endpoint] section of the config file.";

/// Machine-readable result of `ask --json`.
#[derive(Debug, Serialize)]
pub struct AskOutput {
    pub trace_id: String,
    pub status: &'static str,
    pub final_content: Option<String>,
    pub iterations_used: usize,
    pub usage: Usage,
    pub transcript: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AskOutput {
    pub fn from_result(result: &LoopResult) -> Self {
        Self {
            trace_id: result.trace_id.clone(),
            status: match result.status {
                LoopStatus::Complete => "complete",
                LoopStatus::Cancelled => "cancelled",
            },
            final_content: result.final_content.clone(),
            iterations_used: result.iterations_used,
            usage: result.usage_total,
            transcript: result.transcript.messages().to_vec(),
            error: None,
        }
    }

    pub fn from_failure(failure: &LoopFailure, transcript: &Conversation) -> Self {
        Self {
            trace_id: failure.trace_id.clone(),
            status: "failed",
            final_content: None,
            iterations_used: failure.iterations_used,
            usage: failure.usage_total,
            transcript: transcript.messages().to_vec(),
            error: Some(failure.user_message()),
        }
    }
}

pub async fn run(
    config: AppConfig,
    message: String,
    json: bool,
    max_iterations: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.has_token() {
        return Err(MISSING_TOKEN.into());
    }

    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(&config.endpoint)?);
    let catalog = Arc::new(Catalog::new(config.catalog.clone()));
    let tools = Arc::new(default_registry(catalog)?);

    let mut logger = TraceLogger::new();
    if config.telemetry.enabled {
        logger = logger.with_sink(Arc::new(JsonlTraceSink::open(config.telemetry.trace_path())?));
    }

    let mut tool_loop =
        ToolLoop::from_config(provider, tools, &config).with_trace_logger(logger.clone());
    if let Some(max) = max_iterations {
        tool_loop = tool_loop.with_max_iterations(max);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let trace_id = uuid::Uuid::new_v4().to_string();
    let mut conversation = Conversation::from_messages([Message::user(message)]);
    let outcome = tool_loop
        .run_traced(&mut conversation, &trace_id, Some(cancel))
        .await;
    logger.flush();

    match outcome {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&AskOutput::from_result(&result))?);
            } else {
                print!("{}", render_result(&result));
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                let output = AskOutput::from_failure(&failure, &conversation);
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                eprintln!("{}", failure.user_message());
                eprint!("{}", render_transcript(&conversation));
            }
            // Already reported; skip the generic error print in main
            std::process::exit(1);
        }
    }
}

/// Final answer, a summary line, then the transcript.
pub fn render_result(result: &LoopResult) -> String {
    let mut out = String::new();
    match result.status {
        LoopStatus::Complete => {
            out.push_str(result.final_content.as_deref().unwrap_or_default());
            out.push('\n');
        }
        LoopStatus::Cancelled => out.push_str("[cancelled before a final answer]\n"),
    }
    out.push_str(&format!(
        "\n--- trace {} | {} model call(s) | {} tokens ---\n",
        result.trace_id, result.iterations_used, result.usage_total.total_tokens
    ));
    out.push_str(&render_transcript(&result.transcript));
    out
}

/// One block per turn, tool calls and results labelled with their ids.
pub fn render_transcript(conversation: &Conversation) -> String {
    let mut out = String::new();
    for message in conversation.messages() {
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or("?");
                let marker = if message.is_error { " error" } else { "" };
                out.push_str(&format!("[tool {id}{marker}] {}\n", message.text()));
            }
            role => {
                let text = message.text();
                if !text.is_empty() {
                    out.push_str(&format!("[{role}] {text}\n"));
                }
                for call in &message.tool_calls {
                    out.push_str(&format!(
                        "[{role}] -> {}({}) #{}\n",
                        call.name, call.arguments, call.id
                    ));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use servechat_agent::LoopError;
    use servechat_core::message::ToolCallRequest;

    fn sample_transcript() -> Conversation {
        let mut call = Message::assistant("");
        call.tool_calls = vec![ToolCallRequest::new(
            "call_1",
            "list_tables",
            serde_json::json!({"schema_name": "X"}),
        )];
        Conversation::from_messages([
            Message::user("What tables are in schema X?"),
            call,
            Message::tool("call_1", serde_json::json!(["t1", "t2"]), false),
            Message::assistant("Schema X has tables t1 and t2."),
        ])
    }

    #[test]
    fn transcript_shows_calls_and_results() {
        let rendered = render_transcript(&sample_transcript());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[user] What tables are in schema X?",
                r#"[assistant] -> list_tables({"schema_name":"X"}) #call_1"#,
                r#"[tool call_1] ["t1","t2"]"#,
                "[assistant] Schema X has tables t1 and t2.",
            ]
        );
    }

    #[test]
    fn result_leads_with_final_answer() {
        let result = LoopResult {
            final_content: Some("Schema X has tables t1 and t2.".into()),
            transcript: sample_transcript(),
            iterations_used: 2,
            usage_total: Usage {
                prompt_tokens: 20,
                completion_tokens: 10,
                total_tokens: 30,
            },
            trace_id: "tr-1".into(),
            status: LoopStatus::Complete,
        };
        let rendered = render_result(&result);
        assert!(rendered.starts_with("Schema X has tables t1 and t2.\n"));
        assert!(rendered.contains("trace tr-1 | 2 model call(s) | 30 tokens"));

        let json = serde_json::to_value(AskOutput::from_result(&result)).unwrap();
        assert_eq!(json["status"], "complete");
        assert_eq!(json["transcript"].as_array().unwrap().len(), 4);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_output_carries_spend_and_user_message() {
        // Earlier history already holds assistant turns; the count comes from the failure
        let conv = sample_transcript();
        let failure = LoopFailure {
            error: LoopError::LoopExhausted { iterations: 10 },
            trace_id: "tr-2".into(),
            iterations_used: 10,
            usage_total: Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
        };
        let output = AskOutput::from_failure(&failure, &conv);
        assert_eq!(output.status, "failed");
        assert_eq!(output.trace_id, "tr-2");
        assert_eq!(output.iterations_used, 10);
        assert_eq!(output.usage.total_tokens, 150);
        assert!(output.error.unwrap().contains("10 steps"));
    }
}
