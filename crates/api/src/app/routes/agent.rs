//! Job creation endpoints.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::info;

use contractdesk_ai::StreamEvent;

use crate::app::dto::{RunRequest, RunResponse};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::ClientIdentity;

/// Events buffered between the job task and a slow SSE client.
const STREAM_BUFFER: usize = 64;

/// POST /agent/run
///
/// Persists a `queued` job and answers with its id; analysis runs in the background.
pub async fn run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(client): Extension<ClientIdentity>,
    Json(body): Json<RunRequest>,
) -> Response {
    match services
        .orchestrator
        .create_job(&body.project_id, body.input)
        .await
    {
        Ok(handle) => {
            info!(
                job_id = %handle.id,
                project_id = %body.project_id,
                client = client.as_str(),
                "job accepted"
            );
            Json(RunResponse {
                job_id: handle.id.to_string(),
            })
            .into_response()
        }
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// POST /agent/run/stream
///
/// Same job as `/agent/run`, with progress pushed as Server-Sent Events:
/// `job`, `status`, `progress`, `clause`, `summary`, then `complete` or `error`.
/// Dropping the connection does not stop the job.
pub async fn run_stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(client): Extension<ClientIdentity>,
    Json(body): Json<RunRequest>,
) -> Response {
    let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);

    let handle = match services
        .orchestrator
        .create_streaming_job(&body.project_id, body.input, tx)
        .await
    {
        Ok(handle) => handle,
        Err(e) => return errors::orchestrator_error_to_response(e),
    };
    info!(
        job_id = %handle.id,
        project_id = %body.project_id,
        client = client.as_str(),
        "streaming job accepted"
    );

    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(to_sse(&event)));
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn to_sse(event: &StreamEvent) -> SseEvent {
    SseEvent::default()
        .event(event.name())
        .data(event.data().to_string())
}
