use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use contractdesk_core::ProjectId;
use contractdesk_infra::persist::bounded;
use contractdesk_infra::store::MESSAGE_PAGE_LIMIT;

use crate::app::dto::{MessagesQuery, MessagesResponse};
use crate::app::errors::json_error;
use crate::app::services::AppServices;

/// GET /messages?projectId=
///
/// The project's most recent messages, newest first.
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let project_id = match ProjectId::new(query.project_id) {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    let read = bounded(
        services.config.store_timeout,
        services.store.recent_messages(&project_id, MESSAGE_PAGE_LIMIT),
    )
    .await;

    match read {
        Ok(items) => Json(MessagesResponse { items }).into_response(),
        Err(e) => {
            error!(project_id = %project_id, error = %e, "failed to read messages");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}
