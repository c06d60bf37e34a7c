use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::info;

use crate::app::errors::json_error;
use crate::app::services::AppServices;
use crate::context::ClientIdentity;

/// Fixed-window admission for job-creating routes.
///
/// Denied requests get `429` and never reach the handler. When the counter cannot be
/// consulted the request is admitted.
pub async fn admission_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let client = ClientIdentity::from_request(&req);

    let decision = services.admission.check(client.as_str()).await;
    if !decision.is_allowed() {
        info!(client = client.as_str(), ?decision, "request rejected by admission");
        return json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Rate limit exceeded",
        );
    }

    // Handlers log the admitted identity.
    req.extensions_mut().insert(client);
    next.run(req).await
}
