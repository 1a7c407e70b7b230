//! Round-by-round tracing and user feedback for servechat.
//!
//! Every model round trip of the tool loop is mirrored here, together
//! with the dispatched tool results, the final outcome, and any feedback
//! the user gives afterwards. Recording never influences control flow.
//!
//! Sinks:
//! - [`MemoryTraceStore`]: recent traces, queryable by id (HTTP API)
//! - [`JsonlTraceSink`]: append-only JSON-lines file
//! - [`TracingSink`]: structured `tracing` log lines

pub mod logger;
pub mod model;
pub mod sink;
pub mod store;

pub use logger::TraceLogger;
pub use model::{
    FeedbackRecord, OutcomeRecord, OutcomeStatus, Rating, RoundRecord, TraceEvent, TraceRecord,
};
pub use sink::{JsonlTraceSink, TraceSink, TracingSink};
pub use store::MemoryTraceStore;

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("trace file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
