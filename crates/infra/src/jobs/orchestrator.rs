//! Job orchestration: lifecycle, dual-store writes and the analysis call.
//!
//! ## Write discipline
//!
//! - Creation: durable insert first (must succeed), then the cache snapshot (best effort).
//! - Transitions: guarded durable write first, then the cache snapshot carrying the
//!   durable record (and so the durable `updated_at`). A failed durable terminal write is
//!   logged and the cache still receives the local snapshot.
//! - Reads: cache first, verbatim; durable store on a miss. Never merged.
//!
//! Each job runs on its own task behind an error boundary: a panic in the job body still
//! ends in the `error` state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use contractdesk_ai::{
    truncate_chars, Analyzer, ContractAnalysis, ResultStreamer, StreamEmitter, StreamEvent,
    MAX_INPUT_CHARS,
};
use contractdesk_core::{DomainError, JobId, JobStatus, ProjectId};

use crate::cache::{CacheKeys, KeyValueCache};
use crate::documents::{DocumentSource, StandardExtractor, TextExtractor};
use crate::persist::{best_effort_persist, bounded, must_persist};
use crate::store::{JobStore, MessageRole, NewMessage, StoreError};

use super::types::{AnalysisInput, Job, JobFailure, JobOutcome};

const DEFAULT_ASSISTANT_CONTENT: &str = "Analysis complete.";

/// Caller-visible orchestrator failures.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Invalid(#[from] DomainError),

    #[error("failed to persist job: {0}")]
    Persist(#[source] StoreError),

    #[error("job store unavailable: {0}")]
    Store(#[source] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Bound on each cache or store call.
    pub store_timeout: Duration,
    /// Bound on each analysis or document call.
    pub collaborator_timeout: Duration,
    /// Expiry of cached extracted document text.
    pub document_text_ttl: Duration,
}

impl OrchestratorSettings {
    /// Upper bound on how long a live job can go without a durable update after `running`:
    /// document metadata and content plus the analysis (two bounded calls when streamed),
    /// and the cache and store calls around them.
    pub fn max_job_duration(&self) -> Duration {
        self.collaborator_timeout * 4 + self.store_timeout * 6
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(10),
            collaborator_timeout: Duration::from_secs(120),
            document_text_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// A created job and the task driving it. Dropping the handle detaches the task.
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait until the job has reached a terminal state (or its task was lost).
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}

#[derive(Clone)]
pub struct JobOrchestrator {
    cache: Arc<dyn KeyValueCache>,
    store: Arc<dyn JobStore>,
    analyzer: Arc<dyn Analyzer>,
    documents: Arc<dyn DocumentSource>,
    extractor: Arc<dyn TextExtractor>,
    keys: CacheKeys,
    settings: OrchestratorSettings,
    streamer: ResultStreamer,
}

impl JobOrchestrator {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        store: Arc<dyn JobStore>,
        analyzer: Arc<dyn Analyzer>,
        documents: Arc<dyn DocumentSource>,
    ) -> Self {
        Self {
            cache,
            store,
            analyzer,
            documents,
            extractor: Arc::new(StandardExtractor),
            keys: CacheKeys::default(),
            settings: OrchestratorSettings::default(),
            streamer: ResultStreamer::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_keys(mut self, keys: CacheKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Persist a `queued` job and start it in the background.
    ///
    /// Admission must already have passed. Returns once the durable insert completed;
    /// does not wait for the analysis.
    pub async fn create_job(
        &self,
        project_id: &str,
        input: AnalysisInput,
    ) -> Result<JobHandle, OrchestratorError> {
        let job = self.enqueue(project_id, &input).await?;
        let id = job.id;

        let this = self.clone();
        let body_job = job.clone();
        let task = self.spawn_guarded(job, None, async move {
            this.run(body_job, input).await;
        });

        Ok(JobHandle { id, task })
    }

    /// Like [`create_job`](Self::create_job), but the job reports to `emitter`.
    ///
    /// The emitter first receives a `job` event, then the analysis events, then exactly one
    /// `complete` or `error` once the outcome has been persisted. A closed emitter does not
    /// stop the job.
    pub async fn create_streaming_job(
        &self,
        project_id: &str,
        input: AnalysisInput,
        emitter: mpsc::Sender<StreamEvent>,
    ) -> Result<JobHandle, OrchestratorError> {
        let job = self.enqueue(project_id, &input).await?;
        let id = job.id;

        let this = self.clone();
        let body_job = job.clone();
        let abort_events = emitter.clone();
        let task = self.spawn_guarded(job, Some(abort_events), async move {
            this.run_streaming(body_job, input, StreamEmitter::new(emitter))
                .await;
        });

        Ok(JobHandle { id, task })
    }

    async fn enqueue(
        &self,
        project_id: &str,
        input: &AnalysisInput,
    ) -> Result<Job, OrchestratorError> {
        let project_id = ProjectId::new(project_id)?;
        let job = Job::queued(project_id, input);

        must_persist(
            "job.insert",
            self.settings.store_timeout,
            self.store.insert_job(&job),
        )
        .await
        .map_err(OrchestratorError::Persist)?;
        self.cache_snapshot(&job).await;

        info!(job_id = %job.id, project_id = %job.project_id, "job queued");
        Ok(job)
    }

    /// Run `body` on its own task; if it dies without finishing, fail the job.
    fn spawn_guarded<F>(
        &self,
        job: Job,
        abort_events: Option<mpsc::Sender<StreamEvent>>,
        body: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(join_error) = tokio::spawn(body).await {
                error!(job_id = %job.id, error = %join_error, "job task aborted");
                let failure = JobFailure::Aborted;
                let message = failure.to_string();
                this.finish(&job, Err(failure)).await;

                if let Some(tx) = abort_events {
                    StreamEmitter::new(tx)
                        .emit(StreamEvent::error(message))
                        .await;
                }
            }
        })
    }

    /// Drive one job from `queued` to a terminal state.
    pub async fn run(&self, job: Job, input: AnalysisInput) {
        self.mark_running(&job).await;

        let outcome = self.analyze(&input).await;
        if let Ok(analysis) = &outcome {
            self.record_history(&job, &input, analysis).await;
        }
        self.finish(&job, outcome).await;
    }

    /// Streaming variant of [`run`](Self::run).
    pub async fn run_streaming(&self, job: Job, input: AnalysisInput, mut emitter: StreamEmitter) {
        emitter
            .emit(StreamEvent::Job {
                job_id: job.id.to_string(),
            })
            .await;
        self.mark_running(&job).await;
        emitter
            .emit(StreamEvent::status("running", "Analysis started"))
            .await;

        let outcome = self.analyze_streaming(&input, &mut emitter).await;
        if let Ok(analysis) = &outcome {
            self.record_history(&job, &input, analysis).await;
        }

        let failure = outcome.as_ref().err().map(|e| e.to_string());
        let terminal = match (self.finish(&job, outcome).await, failure) {
            (Some(_), None) => StreamEvent::Complete,
            (Some(_), Some(message)) => StreamEvent::error(message),
            // Someone else finished the job first; report what the store holds.
            (None, _) => StreamEvent::error(self.settled_failure(job.id).await),
        };
        emitter.emit(terminal).await;
    }

    /// Error text for a job whose terminal state was written by another writer.
    async fn settled_failure(&self, id: JobId) -> String {
        match bounded(self.settings.store_timeout, self.store.get_job(id)).await {
            Ok(Some(Job {
                result: Some(JobOutcome::Failure { error }),
                ..
            })) => error,
            Ok(_) => "job was already finished".to_string(),
            Err(e) => {
                warn!(job_id = %id, error = %e, "failed to read settled job");
                "job was already finished".to_string()
            }
        }
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<ContractAnalysis, JobFailure> {
        let text = self.resolve_text(input).await?;
        let text = truncate_chars(&text, MAX_INPUT_CHARS);

        let analysis = bounded(
            self.settings.collaborator_timeout,
            self.analyzer.analyze(text, &input.options()),
        )
        .await?;
        Ok(analysis)
    }

    async fn analyze_streaming(
        &self,
        input: &AnalysisInput,
        emitter: &mut StreamEmitter,
    ) -> Result<ContractAnalysis, JobFailure> {
        if input.drive_file_id.is_some() {
            emitter
                .emit(StreamEvent::status("fetching", "Loading document"))
                .await;
        }
        let text = self.resolve_text(input).await?;
        let text = truncate_chars(&text, MAX_INPUT_CHARS);

        let deltas = bounded(
            self.settings.collaborator_timeout,
            self.analyzer.analyze_incremental(text, &input.options()),
        )
        .await?;
        let analysis = bounded(
            self.settings.collaborator_timeout,
            self.streamer.run(deltas, emitter),
        )
        .await?;
        Ok(analysis)
    }

    /// Text to analyze. A document reference takes precedence over direct text.
    pub async fn resolve_text(&self, input: &AnalysisInput) -> Result<String, JobFailure> {
        let document_id = input
            .drive_file_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let Some(document_id) = document_id else {
            return match input.text.as_deref() {
                Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
                _ => Err(JobFailure::MissingInput),
            };
        };

        let credential = input
            .access_token
            .as_ref()
            .ok_or(JobFailure::MissingCredential)?;

        let cache_key = self.keys.document_text(document_id);
        match bounded(self.settings.store_timeout, self.cache.get(&cache_key)).await {
            Ok(Some(text)) if !text.is_empty() => {
                debug!(document_id, "document text cache hit");
                return Ok(text);
            }
            Ok(_) => {}
            Err(e) => warn!(document_id, error = %e, "document text cache read failed"),
        }

        let timeout = self.settings.collaborator_timeout;
        let metadata = bounded(timeout, self.documents.get_metadata(document_id, credential)).await?;
        let bytes = bounded(timeout, self.documents.get_content(document_id, credential)).await?;

        let extractor = Arc::clone(&self.extractor);
        let mime_type = metadata.mime_type.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &mime_type))
            .await
            .map_err(|_| JobFailure::Aborted)??;

        if text.trim().is_empty() {
            return Err(JobFailure::NothingExtracted);
        }

        best_effort_persist(
            "document.text",
            self.settings.store_timeout,
            self.cache
                .set(&cache_key, &text, Some(self.settings.document_text_ttl)),
        )
        .await;

        Ok(text)
    }

    /// Cache first; durable store on a miss or unreadable cache entry.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, OrchestratorError> {
        let key = self.keys.job(id);
        match bounded(self.settings.store_timeout, self.cache.get(&key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Job>(&raw) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => warn!(job_id = %id, error = %e, "unreadable job snapshot in cache"),
            },
            Ok(None) => {}
            Err(e) => warn!(job_id = %id, error = %e, "job cache read failed"),
        }

        bounded(self.settings.store_timeout, self.store.get_job(id))
            .await
            .map_err(OrchestratorError::Store)
    }

    async fn mark_running(&self, job: &Job) {
        let durable = best_effort_persist(
            "job.running",
            self.settings.store_timeout,
            self.store.transition(job.id, JobStatus::Running, None),
        )
        .await;

        let snapshot = match durable {
            Some(stored) => stored,
            None => {
                let mut local = job.clone();
                local.status = JobStatus::Running;
                local.updated_at = Utc::now();
                local
            }
        };
        self.cache_snapshot(&snapshot).await;
        info!(job_id = %job.id, "job running");
    }

    /// Terminal transition: durable first, then cache.
    ///
    /// Returns the record that was cached, or `None` if another writer had already
    /// finished the job.
    pub(crate) async fn finish(
        &self,
        job: &Job,
        outcome: Result<ContractAnalysis, JobFailure>,
    ) -> Option<Job> {
        let (status, result) = match outcome {
            Ok(analysis) => (JobStatus::Done, JobOutcome::Analysis(analysis)),
            Err(failure) => {
                info!(job_id = %job.id, error = %failure, "job failed");
                (JobStatus::Error, JobOutcome::failure(&failure))
            }
        };

        let snapshot = match self.durable_terminal(job.id, status, result.clone()).await {
            Ok(stored) => stored,
            Err(StoreError::Conflict { current, .. }) if current.is_terminal() => {
                warn!(job_id = %job.id, %current, attempted = %status, "job already finished");
                if let Ok(Some(stored)) =
                    bounded(self.settings.store_timeout, self.store.get_job(job.id)).await
                {
                    self.cache_snapshot(&stored).await;
                }
                return None;
            }
            Err(e) => {
                error!(job_id = %job.id, status = %status, error = %e, "durable terminal write lost");
                let mut local = job.clone();
                local.status = status;
                local.result = Some(result);
                local.updated_at = Utc::now();
                local
            }
        };

        self.cache_snapshot(&snapshot).await;
        info!(job_id = %job.id, status = %status, "job finished");
        Some(snapshot)
    }

    async fn durable_terminal(
        &self,
        id: JobId,
        status: JobStatus,
        result: JobOutcome,
    ) -> Result<Job, StoreError> {
        let timeout = self.settings.store_timeout;
        match bounded(timeout, self.store.transition(id, status, Some(result.clone()))).await {
            // The best-effort `running` write never landed; replay it, then finish.
            Err(StoreError::Conflict {
                current: JobStatus::Queued,
                ..
            }) => {
                bounded(timeout, self.store.transition(id, JobStatus::Running, None)).await?;
                bounded(timeout, self.store.transition(id, status, Some(result))).await
            }
            other => other,
        }
    }

    async fn record_history(&self, job: &Job, input: &AnalysisInput, analysis: &ContractAnalysis) {
        let job_id = job.id.to_string();
        let timeout = self.settings.store_timeout;

        best_effort_persist(
            "message.user",
            timeout,
            self.store.append_message(NewMessage {
                project_id: job.project_id.clone(),
                role: MessageRole::User,
                content: input.history_content(),
                meta: serde_json::json!({ "jobId": job_id }),
            }),
        )
        .await;

        let content = if analysis.summary.trim().is_empty() {
            DEFAULT_ASSISTANT_CONTENT.to_string()
        } else {
            analysis.summary.clone()
        };
        best_effort_persist(
            "message.assistant",
            timeout,
            self.store.append_message(NewMessage {
                project_id: job.project_id.clone(),
                role: MessageRole::Assistant,
                content,
                meta: serde_json::json!({ "jobId": job_id, "risk": analysis.overall_risk }),
            }),
        )
        .await;
    }

    async fn cache_snapshot(&self, job: &Job) {
        let raw = match serde_json::to_string(job) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job snapshot not serializable");
                return;
            }
        };
        best_effort_persist(
            "job.snapshot",
            self.settings.store_timeout,
            self.cache.set(&self.keys.job(job.id), &raw, None),
        )
        .await;
    }
}
