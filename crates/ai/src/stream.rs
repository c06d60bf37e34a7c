//! Incremental result streaming.
//!
//! [`ResultStreamer`] turns the analyzer's delta stream into the ordered event
//! sequence one client connection sees. Transport framing (SSE) lives at the edge.

use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::debug;

use crate::analysis::{parse_analysis_document, Clause, ContractAnalysis, RiskLevel};
use crate::analyzer::DeltaStream;
use crate::result::AiError;

/// One typed event on a streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Leading event carrying the id of the job being streamed.
    Job { job_id: String },
    Status { status: String, message: String },
    Progress { current: usize, total: usize, message: String },
    Clause(Clause),
    Summary {
        overall_risk: RiskLevel,
        summary: String,
        total_clauses: usize,
    },
    Complete,
    Error { error: String },
}

impl StreamEvent {
    pub fn status(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            status: status.into(),
            message: message.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Job { .. } => "job",
            StreamEvent::Status { .. } => "status",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Clause(_) => "clause",
            StreamEvent::Summary { .. } => "summary",
            StreamEvent::Complete => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete | StreamEvent::Error { .. })
    }

    /// Wire payload.
    pub fn data(&self) -> JsonValue {
        match self {
            StreamEvent::Job { job_id } => json!({ "jobId": job_id }),
            StreamEvent::Status { status, message } => {
                json!({ "status": status, "message": message })
            }
            StreamEvent::Progress {
                current,
                total,
                message,
            } => json!({ "current": current, "total": total, "message": message }),
            StreamEvent::Clause(clause) => serde_json::to_value(clause).unwrap_or(JsonValue::Null),
            StreamEvent::Summary {
                overall_risk,
                summary,
                total_clauses,
            } => json!({
                "overallRisk": overall_risk,
                "summary": summary,
                "totalClauses": total_clauses,
            }),
            StreamEvent::Complete => json!({ "status": "complete" }),
            StreamEvent::Error { error } => json!({ "error": error }),
        }
    }
}

/// Sending half of one streaming connection.
///
/// Guarantees at most one terminal event. A disconnected client is not an
/// error: the producer keeps going and events are dropped.
pub struct StreamEmitter {
    tx: mpsc::Sender<StreamEvent>,
    terminated: bool,
    disconnected: bool,
}

impl StreamEmitter {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            terminated: false,
            disconnected: false,
        }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    /// Send `event`. Returns `false` if it was not delivered.
    pub async fn emit(&mut self, event: StreamEvent) -> bool {
        if self.terminated {
            debug!(event = event.name(), "dropping event after terminal event");
            return false;
        }
        if event.is_terminal() {
            self.terminated = true;
        }
        if self.disconnected {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            debug!("stream client disconnected");
            self.disconnected = true;
            return false;
        }
        true
    }
}

/// Buffers analyzer deltas, parses the document once, then fans it out as events.
#[derive(Debug, Clone)]
pub struct ResultStreamer {
    max_buffer_bytes: usize,
}

impl Default for ResultStreamer {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ResultStreamer {
    pub fn with_max_buffer_bytes(max_buffer_bytes: usize) -> Self {
        Self { max_buffer_bytes }
    }

    /// Emit `status`/`progress`/`clause`/`summary` for one analysis.
    ///
    /// Does not emit the terminal event: the caller persists the outcome first
    /// and then sends `complete` or `error`. On `Err` nothing past the status
    /// events has been emitted.
    pub async fn run(
        &self,
        mut deltas: DeltaStream,
        emitter: &mut StreamEmitter,
    ) -> Result<ContractAnalysis, AiError> {
        let mut buffer = String::new();
        let mut receiving = false;

        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            if !receiving {
                receiving = true;
                emitter
                    .emit(StreamEvent::status("streaming", "Receiving analysis"))
                    .await;
            }
            if buffer.len() + delta.len() > self.max_buffer_bytes {
                return Err(AiError::MalformedOutput(format!(
                    "analysis output exceeded {} bytes",
                    self.max_buffer_bytes
                )));
            }
            buffer.push_str(&delta);
        }

        emitter
            .emit(StreamEvent::status("parsing", "Extracting clauses"))
            .await;
        let analysis = parse_analysis_document(&buffer)?;

        let total = analysis.clauses.len();
        for (idx, clause) in analysis.clauses.iter().enumerate() {
            emitter
                .emit(StreamEvent::Progress {
                    current: idx + 1,
                    total,
                    message: format!("Clause {} of {}: {}", idx + 1, total, clause.title),
                })
                .await;
            emitter.emit(StreamEvent::Clause(clause.clone())).await;
        }

        emitter
            .emit(StreamEvent::Summary {
                overall_risk: analysis.overall_risk,
                summary: analysis.summary.clone(),
                total_clauses: total,
            })
            .await;

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(parts: &[&str]) -> DeltaStream {
        let items: Vec<Result<String, AiError>> =
            parts.iter().map(|p| Ok(p.to_string())).collect();
        futures::stream::iter(items).boxed()
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    const DOC_PARTS: [&str; 4] = [
        "```json\n{\"overallRisk\": \"high\", \"summary\": \"Risky\", ",
        "\"clauses\": [{\"type\": \"payment\", \"title\": \"Fees\", \"risk\": \"low\"},",
        " {\"id\": \"c2\", \"type\": \"liability\", \"title\": \"Cap\", \"risk\": \"high\"}]",
        "}\n```",
    ];

    #[tokio::test]
    async fn clauses_arrive_between_status_and_summary() {
        let (mut emitter, rx) = StreamEmitter::channel(64);
        let analysis = ResultStreamer::default()
            .run(deltas(&DOC_PARTS), &mut emitter)
            .await
            .unwrap();
        emitter.emit(StreamEvent::Complete).await;
        drop(emitter);

        let names: Vec<_> = drain(rx).await.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "status", "status", "progress", "clause", "progress", "clause", "summary",
                "complete"
            ]
        );
        assert_eq!(analysis.clauses.len(), 2);
        assert!(!analysis.clauses[0].id.is_empty());
        assert_eq!(analysis.clauses[1].id, "c2");
    }

    #[tokio::test]
    async fn unparseable_output_emits_no_clauses() {
        let (mut emitter, rx) = StreamEmitter::channel(64);
        let err = ResultStreamer::default()
            .run(deltas(&["{\"overallRisk\": \"low\", \"clau"]), &mut emitter)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::MalformedOutput(_)));
        emitter.emit(StreamEvent::error(err.to_string())).await;
        drop(emitter);

        let events = drain(rx).await;
        assert!(events.iter().all(|e| !matches!(e, StreamEvent::Clause(_))));
        assert_eq!(events.iter().filter(|e| e.name() == "error").count(), 1);
        assert_eq!(events.last().map(|e| e.name()), Some("error"));
    }

    #[tokio::test]
    async fn upstream_error_stops_buffering() {
        let items: Vec<Result<String, AiError>> =
            vec![Ok("{".to_string()), Err(AiError::Timeout)];
        let (mut emitter, _rx) = StreamEmitter::channel(8);
        let err = ResultStreamer::default()
            .run(futures::stream::iter(items).boxed(), &mut emitter)
            .await
            .unwrap_err();
        assert_eq!(err, AiError::Timeout);
    }

    #[tokio::test]
    async fn oversized_output_is_rejected() {
        let (mut emitter, _rx) = StreamEmitter::channel(8);
        let err = ResultStreamer::with_max_buffer_bytes(8)
            .run(deltas(&["0123456789"]), &mut emitter)
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn only_one_terminal_event_is_sent() {
        let (mut emitter, rx) = StreamEmitter::channel(8);
        assert!(emitter.emit(StreamEvent::error("boom")).await);
        assert!(!emitter.emit(StreamEvent::Complete).await);
        assert!(!emitter.emit(StreamEvent::status("late", "ignored")).await);
        drop(emitter);
        assert_eq!(drain(rx).await, vec![StreamEvent::error("boom")]);
    }

    #[tokio::test]
    async fn disconnected_client_does_not_fail_the_producer() {
        let (mut emitter, rx) = StreamEmitter::channel(1);
        drop(rx);
        let analysis = ResultStreamer::default()
            .run(deltas(&DOC_PARTS), &mut emitter)
            .await;
        assert!(analysis.is_ok());
    }

    #[test]
    fn payloads_use_wire_names() {
        let summary = StreamEvent::Summary {
            overall_risk: RiskLevel::Medium,
            summary: "ok".into(),
            total_clauses: 3,
        };
        assert_eq!(
            summary.data(),
            json!({"overallRisk": "medium", "summary": "ok", "totalClauses": 3})
        );
        assert_eq!(StreamEvent::Complete.data(), json!({"status": "complete"}));
        assert_eq!(
            StreamEvent::Job { job_id: "j".into() }.data(),
            json!({"jobId": "j"})
        );
    }
}
