use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use contractdesk_api::app::{build_app, AppServices};
use contractdesk_infra::{AppConfig, StaleJobSweeper, SweeperConfig};
use contractdesk_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    let log_format = config.log_format.parse::<LogFormat>().unwrap_or_else(|e| {
        eprintln!("{e}; falling back to json logs");
        LogFormat::Json
    });
    contractdesk_observability::init(log_format);

    let bind_addr = config.bind_addr;
    let stale_job_timeout = config.stale_job_timeout;

    let services = Arc::new(
        AppServices::from_config(config)
            .await
            .context("failed to connect dependencies")?,
    );
    if !services.analyzer.is_configured() {
        tracing::warn!("OPENAI_API_KEY not set; analysis jobs will fail");
    }

    let sweeper = stale_job_timeout.map(|max_age| {
        StaleJobSweeper::new(services.orchestrator.clone(), SweeperConfig::new(max_age)).spawn()
    });

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
