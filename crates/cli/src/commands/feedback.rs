//! `servechat feedback`: Append a rating for a trace to the trace file.

use chrono::Utc;
use servechat_config::AppConfig;
use servechat_telemetry::{FeedbackRecord, JsonlTraceSink, Rating, TraceEvent, TraceSink};

pub fn run(
    config: &AppConfig,
    trace_id: &str,
    name: &str,
    rating: Rating,
    comment: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let sink = JsonlTraceSink::open(config.telemetry.trace_path())?;
    record(&sink, trace_id, name, rating.clone(), comment)?;

    tracing::info!(trace_id, name, rating = %rating, "Feedback recorded");
    println!("Recorded {name}={rating} for trace {trace_id} in {}", sink.path().display());
    Ok(())
}

/// Write one feedback event, surfacing sink failures to the caller.
fn record(
    sink: &dyn TraceSink,
    trace_id: &str,
    name: &str,
    rating: Rating,
    comment: Option<String>,
) -> Result<(), servechat_telemetry::TelemetryError> {
    sink.record(&TraceEvent::Feedback(FeedbackRecord {
        trace_id: trace_id.to_string(),
        name: name.to_string(),
        rating,
        comment,
        recorded_at: Utc::now(),
    }))?;
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_feedback_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        let sink = JsonlTraceSink::open(&path).unwrap();

        record(&sink, "tr-1", "user_feedback", Rating::thumbs_down(), Some("wrong schema".into()))
            .unwrap();

        let events = JsonlTraceSink::read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TraceEvent::Feedback(f) => {
                assert_eq!(f.trace_id, "tr-1");
                assert_eq!(f.rating, Rating::Thumbs(false));
                assert_eq!(f.comment.as_deref(), Some("wrong schema"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
