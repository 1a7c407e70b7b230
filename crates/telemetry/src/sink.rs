//! Trace sinks: where recorded events end up.

use crate::TelemetryError;
use crate::model::TraceEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// A destination for trace events.
///
/// Sinks are called synchronously from the loop and must be cheap.
/// Errors are reported to the [`TraceLogger`](crate::TraceLogger), which
/// logs and drops them.
pub trait TraceSink: Send + Sync {
    fn name(&self) -> &str;

    fn record(&self, event: &TraceEvent) -> Result<(), TelemetryError>;

    /// Block until every event recorded so far is durable.
    fn flush(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

enum WriterMsg {
    Line(String),
    Flush(Sender<std::io::Result<()>>),
}

/// Appends one JSON object per line to a file.
///
/// `record` only serializes and queues the line; a dedicated writer
/// thread owns the file, so async callers never block on disk I/O. The
/// queue is flushed whenever it drains, on [`TraceSink::flush`], and on
/// drop.
pub struct JsonlTraceSink {
    path: PathBuf,
    tx: Option<Sender<WriterMsg>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonlTraceSink {
    /// Open (or create) the file in append mode, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::channel();
        let shown = path.display().to_string();
        let writer = std::thread::Builder::new()
            .name("servechat-traces".into())
            .spawn(move || write_lines(file, rx, &shown))?;

        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every event back from a JSON-lines file, skipping blank lines.
    pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<TraceEvent>, TelemetryError> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    fn send(&self, msg: WriterMsg) -> Result<(), TelemetryError> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.send(msg).ok())
            .ok_or_else(|| TelemetryError::Unavailable("trace writer stopped".into()))
    }
}

impl TraceSink for JsonlTraceSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn record(&self, event: &TraceEvent) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        self.send(WriterMsg::Line(line))
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(WriterMsg::Flush(ack_tx))?;
        let written = ack_rx
            .recv()
            .map_err(|_| TelemetryError::Unavailable("trace writer stopped".into()))?;
        Ok(written?)
    }
}

impl Drop for JsonlTraceSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain the queue and exit
        self.tx.take();
        if let Some(writer) = self.writer.take()
            && writer.join().is_err()
        {
            tracing::warn!(path = %self.path.display(), "Trace writer panicked");
        }
    }
}

fn write_lines(file: File, rx: Receiver<WriterMsg>, path: &str) {
    let mut out = BufWriter::new(file);
    while let Ok(msg) = rx.recv() {
        apply(&mut out, msg, path);
        while let Ok(msg) = rx.try_recv() {
            apply(&mut out, msg, path);
        }
        if let Err(e) = out.flush() {
            tracing::warn!(path, error = %e, "Trace file flush failed");
        }
    }
}

fn apply(out: &mut BufWriter<File>, msg: WriterMsg, path: &str) {
    match msg {
        WriterMsg::Line(line) => {
            if let Err(e) = out.write_all(line.as_bytes()) {
                tracing::warn!(path, error = %e, "Trace line dropped");
            }
        }
        WriterMsg::Flush(ack) => {
            let _ = ack.send(out.flush());
        }
    }
}

/// Mirrors events into the `tracing` log.
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn record(&self, event: &TraceEvent) -> Result<(), TelemetryError> {
        match event {
            TraceEvent::Round(r) => tracing::info!(
                trace_id = %r.trace_id,
                iteration = r.iteration,
                messages = r.conversation.len(),
                finish_reason = %r.response.finish_reason,
                tool_calls = r.response.tool_calls.len(),
                tool_errors = r.tool_results.iter().filter(|t| t.is_error).count(),
                total_tokens = r.response.usage.total_tokens,
                "Model round"
            ),
            TraceEvent::Feedback(f) => tracing::info!(
                trace_id = %f.trace_id,
                name = %f.name,
                rating = %f.rating,
                "Feedback recorded"
            ),
            TraceEvent::Outcome(o) => tracing::info!(
                trace_id = %o.trace_id,
                status = ?o.status,
                iterations = o.iterations_used,
                total_tokens = o.usage_total.total_tokens,
                error = o.error.as_deref().unwrap_or(""),
                "Loop finished"
            ),
        }
        Ok(())
    }
}
