use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    Json,
};

use contractdesk_core::JobId;

use crate::app::errors;
use crate::app::services::AppServices;

/// GET /jobs/:id
///
/// Cache first, durable store on a miss. An id that does not parse cannot exist.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(job_id) = id.parse::<JobId>() else {
        return errors::not_found("Job not found");
    };

    match services.orchestrator.get_job(job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::not_found("Job not found"),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
