//! Data model for round records, feedback, and assembled traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use servechat_core::message::Message;
use servechat_core::provider::{ModelResponse, Usage};
use servechat_core::tool::ToolResult;
use std::str::FromStr;

// ── Round ────────────────────────────────────────────────────────────────

/// One model round trip: what was sent, what came back, what ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub trace_id: String,
    /// 1-based model call number within the loop invocation.
    pub iteration: usize,
    /// The conversation exactly as sent to the model.
    pub conversation: Vec<Message>,
    pub response: ModelResponse,
    /// Results of the tool calls dispatched in response, in order.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    pub recorded_at: DateTime<Utc>,
}

// ── Feedback ─────────────────────────────────────────────────────────────

/// A user assessment value: thumbs up/down, a score, or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rating {
    Thumbs(bool),
    Score(f64),
    Text(String),
}

impl Rating {
    pub fn thumbs_up() -> Self {
        Self::Thumbs(true)
    }

    pub fn thumbs_down() -> Self {
        Self::Thumbs(false)
    }
}

impl FromStr for Rating {
    type Err = std::convert::Infallible;

    /// `up`/`down`/`true`/`false` become thumbs, numbers become scores,
    /// anything else is kept as text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "up" | "+1" | "true" | "yes" | "👍" => Rating::Thumbs(true),
            "down" | "-1" | "false" | "no" | "👎" => Rating::Thumbs(false),
            other => match other.parse::<f64>() {
                Ok(score) if score.is_finite() => Rating::Score(score),
                _ => Rating::Text(trimmed.to_string()),
            },
        })
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rating::Thumbs(true) => f.write_str("up"),
            Rating::Thumbs(false) => f.write_str("down"),
            Rating::Score(v) => write!(f, "{v}"),
            Rating::Text(t) => f.write_str(t),
        }
    }
}

/// One feedback action against a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub trace_id: String,
    /// Assessment name (e.g. "user_feedback", "helpfulness").
    pub name: String,
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ── Outcome ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Complete,
    Cancelled,
    Failed,
}

/// How a loop invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub trace_id: String,
    pub status: OutcomeStatus,
    pub iterations_used: usize,
    pub usage_total: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ── Events ───────────────────────────────────────────────────────────────

/// What a sink receives. One JSON line per event in the file sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Round(RoundRecord),
    Feedback(FeedbackRecord),
    Outcome(OutcomeRecord),
}

impl TraceEvent {
    pub fn trace_id(&self) -> &str {
        match self {
            TraceEvent::Round(r) => &r.trace_id,
            TraceEvent::Feedback(f) => &f.trace_id,
            TraceEvent::Outcome(o) => &o.trace_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::Round(_) => "round",
            TraceEvent::Feedback(_) => "feedback",
            TraceEvent::Outcome(_) => "outcome",
        }
    }
}

// ── Trace ────────────────────────────────────────────────────────────────

/// Everything recorded under one trace id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub rounds: Vec<RoundRecord>,
    pub feedback: Vec<FeedbackRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeRecord>,
}

impl TraceRecord {
    pub fn new(trace_id: impl Into<String>, experiment_id: Option<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            experiment_id,
            started_at: Utc::now(),
            rounds: Vec::new(),
            feedback: Vec::new(),
            outcome: None,
        }
    }

    /// Fold an event into this trace.
    pub fn apply(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::Round(r) => self.rounds.push(r.clone()),
            TraceEvent::Feedback(f) => self.feedback.push(f.clone()),
            TraceEvent::Outcome(o) => self.outcome = Some(o.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parses_common_forms() {
        assert_eq!("up".parse::<Rating>().unwrap(), Rating::Thumbs(true));
        assert_eq!("FALSE".parse::<Rating>().unwrap(), Rating::Thumbs(false));
        assert_eq!("4.5".parse::<Rating>().unwrap(), Rating::Score(4.5));
        assert_eq!(
            "too verbose".parse::<Rating>().unwrap(),
            Rating::Text("too verbose".into())
        );
    }

    #[test]
    fn rating_accepts_any_json_scalar() {
        let r: Rating = serde_json::from_str("true").unwrap();
        assert_eq!(r, Rating::thumbs_up());
        let r: Rating = serde_json::from_str("3").unwrap();
        assert_eq!(r, Rating::Score(3.0));
        let r: Rating = serde_json::from_str("\"meh\"").unwrap();
        assert_eq!(r, Rating::Text("meh".into()));
    }

    #[test]
    fn event_is_tagged() {
        let event = TraceEvent::Feedback(FeedbackRecord {
            trace_id: "tr-1".into(),
            name: "user_feedback".into(),
            rating: Rating::thumbs_down(),
            comment: None,
            recorded_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "feedback");
        assert_eq!(json["rating"], false);
        assert_eq!(event.trace_id(), "tr-1");
    }

    #[test]
    fn trace_record_collects_rounds_in_order() {
        let mut trace = TraceRecord::new("tr-1", None);
        for tokens in [10, 20] {
            trace.apply(&TraceEvent::Round(RoundRecord {
                trace_id: "tr-1".into(),
                iteration: 1,
                conversation: vec![],
                response: ModelResponse::text("x").with_usage(Usage {
                    prompt_tokens: tokens,
                    completion_tokens: 1,
                    total_tokens: tokens + 1,
                }),
                tool_results: vec![],
                recorded_at: Utc::now(),
            }));
        }
        let prompts: Vec<u32> = trace.rounds.iter().map(|r| r.response.usage.prompt_tokens).collect();
        assert_eq!(prompts, vec![10, 20]);
    }
}
