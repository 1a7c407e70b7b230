//! Fan-out trace logger.
//!
//! The loop and the HTTP API record through a [`TraceLogger`]; it
//! forwards each event to every configured sink. Recording is fire and
//! forget: a failing sink is logged with `warn!` and never surfaces to
//! the caller.

use crate::model::{
    FeedbackRecord, OutcomeRecord, OutcomeStatus, Rating, RoundRecord, TraceEvent,
};
use crate::sink::TraceSink;
use chrono::Utc;
use servechat_core::message::Message;
use servechat_core::provider::{ModelResponse, Usage};
use servechat_core::tool::ToolResult;
use std::sync::Arc;
use tracing::warn;

/// Records rounds, feedback, and outcomes to a set of sinks.
#[derive(Clone, Default)]
pub struct TraceLogger {
    sinks: Vec<Arc<dyn TraceSink>>,
}

impl TraceLogger {
    /// A logger with no sinks (records nothing).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Record one model round trip.
    pub fn record_round(
        &self,
        trace_id: &str,
        iteration: usize,
        conversation: &[Message],
        response: &ModelResponse,
        tool_results: &[ToolResult],
    ) {
        self.emit(&TraceEvent::Round(RoundRecord {
            trace_id: trace_id.to_string(),
            iteration,
            conversation: conversation.to_vec(),
            response: response.clone(),
            tool_results: tool_results.to_vec(),
            recorded_at: Utc::now(),
        }));
    }

    /// Record a user assessment against a trace.
    pub fn record_feedback(
        &self,
        trace_id: &str,
        name: &str,
        rating: Rating,
        comment: Option<String>,
    ) {
        self.emit(&TraceEvent::Feedback(FeedbackRecord {
            trace_id: trace_id.to_string(),
            name: name.to_string(),
            rating,
            comment,
            recorded_at: Utc::now(),
        }));
    }

    /// Record how a loop invocation ended.
    pub fn record_outcome(
        &self,
        trace_id: &str,
        status: OutcomeStatus,
        iterations_used: usize,
        usage_total: Usage,
        final_content: Option<String>,
        error: Option<String>,
    ) {
        self.emit(&TraceEvent::Outcome(OutcomeRecord {
            trace_id: trace_id.to_string(),
            status,
            iterations_used,
            usage_total,
            final_content,
            error,
            recorded_at: Utc::now(),
        }));
    }

    /// Wait for every sink to persist what it has been given. Failures
    /// are logged like recording failures.
    pub fn flush(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                warn!(sink = sink.name(), error = %e, "Trace sink flush failed");
            }
        }
    }

    fn emit(&self, event: &TraceEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.record(event) {
                warn!(
                    sink = sink.name(),
                    trace_id = event.trace_id(),
                    event = event.kind(),
                    error = %e,
                    "Trace sink failed; event dropped"
                );
            }
        }
    }
}
