//! In-memory trace store, queryable by trace id.

use crate::TelemetryError;
use crate::model::{TraceEvent, TraceRecord};
use crate::sink::TraceSink;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// Keeps the most recent traces in memory for the HTTP API.
///
/// Thread-safe via `RwLock`. When `capacity` is reached the oldest trace
/// is evicted.
pub struct MemoryTraceStore {
    traces: RwLock<VecDeque<TraceRecord>>,
    capacity: usize,
    experiment_id: Option<String>,
}

impl MemoryTraceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            traces: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            experiment_id: None,
        }
    }

    /// Label new traces with an experiment id.
    pub fn with_experiment(mut self, experiment_id: Option<String>) -> Self {
        self.experiment_id = experiment_id;
        self
    }

    /// Get a specific trace by id.
    pub fn get_trace(&self, trace_id: &str) -> Option<TraceRecord> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().find(|t| t.trace_id == trace_id).cloned()
    }

    pub fn contains(&self, trace_id: &str) -> bool {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().any(|t| t.trace_id == trace_id)
    }
}

impl Default for MemoryTraceStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TraceSink for MemoryTraceStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn record(&self, event: &TraceEvent) -> Result<(), TelemetryError> {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let trace_id = event.trace_id();

        if let Some(trace) = traces.iter_mut().find(|t| t.trace_id == trace_id) {
            trace.apply(event);
            return Ok(());
        }

        if traces.len() >= self.capacity {
            traces.pop_front();
        }
        let mut trace = TraceRecord::new(trace_id, self.experiment_id.clone());
        trace.apply(event);
        traces.push_back(trace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeedbackRecord, Rating};
    use chrono::Utc;

    fn feedback(trace_id: &str, rating: Rating) -> TraceEvent {
        TraceEvent::Feedback(FeedbackRecord {
            trace_id: trace_id.into(),
            name: "user_feedback".into(),
            rating,
            comment: None,
            recorded_at: Utc::now(),
        })
    }

    #[test]
    fn groups_events_by_trace() {
        let store = MemoryTraceStore::new(10).with_experiment(Some("42".into()));
        store.record(&feedback("a", Rating::thumbs_up())).unwrap();
        store.record(&feedback("b", Rating::thumbs_down())).unwrap();
        store.record(&feedback("a", Rating::Score(5.0))).unwrap();

        assert_eq!(store.traces.read().unwrap().len(), 2);
        let a = store.get_trace("a").unwrap();
        assert_eq!(a.feedback.len(), 2);
        assert_eq!(a.experiment_id.as_deref(), Some("42"));
        assert!(store.get_trace("zzz").is_none());
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let store = MemoryTraceStore::new(2);
        for id in ["a", "b", "c"] {
            store.record(&feedback(id, Rating::thumbs_up())).unwrap();
        }
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert_eq!(store.traces.read().unwrap().len(), 2);
    }
}
