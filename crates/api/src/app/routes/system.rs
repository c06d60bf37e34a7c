use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use axum::{extract::Extension, Json};

use contractdesk_infra::persist::bounded;

use crate::app::dto::{HealthResponse, WelcomeResponse};
use crate::app::services::{AppServices, Backend};

pub async fn root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the contractdesk API",
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceState {
    Connected,
    Configured,
    /// `required` services degrade the report when missing.
    NotConfigured { required: bool },
    Error(String),
}

impl ServiceState {
    fn degrades(&self) -> bool {
        matches!(
            self,
            ServiceState::Error(_) | ServiceState::NotConfigured { required: true }
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Connected => f.write_str("connected"),
            ServiceState::Configured => f.write_str("configured"),
            ServiceState::NotConfigured { .. } => f.write_str("not_configured"),
            ServiceState::Error(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Default)]
struct HealthReport {
    degraded: bool,
    services: BTreeMap<&'static str, String>,
}

impl HealthReport {
    fn record(&mut self, service: &'static str, state: ServiceState) {
        self.degraded |= state.degrades();
        self.services.insert(service, state.to_string());
    }

    fn into_response(self) -> HealthResponse {
        HealthResponse {
            status: if self.degraded { "degraded" } else { "healthy" },
            services: self.services,
        }
    }
}

/// GET /health
///
/// Always `200`; the body says which dependency is unhealthy.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> Json<HealthResponse> {
    let timeout = services.config.store_timeout;
    let mut report = HealthReport::default();

    let cache = match services.cache_backend {
        Backend::InMemory => ServiceState::NotConfigured { required: false },
        Backend::External => match bounded(timeout, services.cache.ping()).await {
            Ok(()) => ServiceState::Connected,
            Err(e) => ServiceState::Error(e.to_string()),
        },
    };
    report.record("cache", cache);

    let store = match services.store_backend {
        Backend::InMemory => ServiceState::NotConfigured { required: false },
        Backend::External => match bounded(timeout, services.store.ping()).await {
            Ok(()) => ServiceState::Connected,
            Err(e) => ServiceState::Error(e.to_string()),
        },
    };
    report.record("store", store);

    let analyzer = if services.analyzer.is_configured() {
        ServiceState::Configured
    } else {
        ServiceState::NotConfigured { required: true }
    };
    report.record("analyzer", analyzer);

    Json(report.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_service_degrades() {
        let mut report = HealthReport::default();
        report.record("cache", ServiceState::NotConfigured { required: false });
        assert_eq!(report.services["cache"], "not_configured");
        assert!(!report.degraded);

        report.record("analyzer", ServiceState::NotConfigured { required: true });
        assert_eq!(report.into_response().status, "degraded");
    }

    #[test]
    fn errors_carry_their_cause() {
        let mut report = HealthReport::default();
        report.record("store", ServiceState::Error("connection refused".into()));
        let response = report.into_response();
        assert_eq!(response.status, "degraded");
        assert_eq!(response.services["store"], "error: connection refused");
    }
}
