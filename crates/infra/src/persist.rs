//! Write helpers shared by the orchestrator and its collaborators.
//!
//! Every call into a cache, store or remote collaborator goes through [`bounded`]. Writes
//! then pick a tier: [`must_persist`] propagates failure, [`best_effort_persist`] logs and
//! drops it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;
use tracing::{error, warn};

/// Run `fut` with an upper bound; a timeout becomes the caller's error type.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Elapsed>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(elapsed) => Err(elapsed.into()),
    }
}

/// A write whose failure must reach the caller.
pub async fn must_persist<T, E, F>(what: &'static str, limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Elapsed> + Display,
{
    bounded(limit, fut).await.inspect_err(|e| {
        error!(write = what, error = %e, "required write failed");
    })
}

/// A write whose failure is logged and otherwise ignored.
pub async fn best_effort_persist<T, E, F>(what: &'static str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: From<Elapsed> + Display,
{
    match bounded(limit, fut).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(write = what, error = %e, "best-effort write failed");
            None
        }
    }
}
