//! Stale-job sweeper.
//!
//! A job whose task died with the process stays `running` in the durable store forever.
//! The sweeper finds durable `running` jobs that have not moved for longer than the
//! configured age and fails them through the normal guarded terminal transition, so a
//! late completion and the sweeper can never both win.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use contractdesk_core::JobStatus;

use crate::persist::bounded;

use super::orchestrator::JobOrchestrator;
use super::types::JobFailure;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Age after which a `running` job is considered abandoned.
    pub max_age: Duration,
    pub interval: Duration,
    /// Jobs handled per pass.
    pub batch_size: usize,
}

impl SweeperConfig {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            interval: (max_age / 4).max(Duration::from_secs(5)),
            batch_size: 100,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop after the current pass.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

pub struct StaleJobSweeper {
    orchestrator: JobOrchestrator,
    config: SweeperConfig,
}

impl StaleJobSweeper {
    /// A `max_age` that a live job could reach is raised past
    /// [`OrchestratorSettings::max_job_duration`](super::OrchestratorSettings::max_job_duration).
    pub fn new(orchestrator: JobOrchestrator, mut config: SweeperConfig) -> Self {
        let floor = orchestrator.settings().max_job_duration();
        if config.max_age <= floor {
            warn!(
                requested_secs = config.max_age.as_secs(),
                floor_secs = floor.as_secs(),
                "stale job age would catch live jobs; raising it"
            );
            config.max_age = floor + Duration::from_secs(1);
        }
        Self {
            orchestrator,
            config,
        }
    }

    /// One pass. Returns the number of jobs moved to `error`.
    pub async fn sweep_once(&self) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.config.max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let store = self.orchestrator.store();

        let stale = match bounded(
            self.orchestrator.settings().store_timeout,
            store.list_stale(JobStatus::Running, cutoff, self.config.batch_size),
        )
        .await
        {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "failed to list stale jobs");
                return 0;
            }
        };

        let mut swept = 0;
        for job in stale {
            let failure = JobFailure::Abandoned(self.config.max_age.as_secs());
            if self.orchestrator.finish(&job, Err(failure)).await.is_some() {
                swept += 1;
            }
        }
        if swept > 0 {
            info!(swept, "failed abandoned jobs");
        }
        swept
    }

    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!(max_age_secs = self.config.max_age.as_secs(), "stale job sweeper started");
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = self.sweep_once().await;
                        debug!(swept, "sweep pass done");
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("stale job sweeper stopped");
        });

        SweeperHandle { shutdown, join }
    }
}
