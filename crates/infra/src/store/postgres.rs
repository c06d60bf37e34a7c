//! Postgres-backed job store.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | StoreError |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `AlreadyExists` (insert only) |
//! | Database (other) | any | `Storage` |
//! | PoolTimedOut | n/a | `Timeout` |
//! | Row decode failure | n/a | `Corrupt` |
//! | Other | n/a | `Storage` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use contractdesk_core::{JobId, JobStatus, MessageId, ProjectId};

use super::{JobStore, Message, MessageRole, NewMessage, StoreError};
use crate::jobs::{Job, JobKind, JobOutcome};

const SCHEMA: &str = include_str!("schema.sql");

const JOB_COLUMNS: &str =
    "id, project_id, kind, status, payload, result, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn current_status(&self, id: JobId) -> Result<Option<JobStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?;

        row.map(|row| {
            let status: String = row
                .try_get("status")
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            parse_status(&status)
        })
        .transpose()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    fn name(&self) -> &str {
        "postgres"
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let payload = to_json(&job.payload)?;
        let result = job.result.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, project_id, kind, status, payload, result, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.project_id.as_str())
        .bind(job.kind.as_str())
        .bind(job.status.as_str())
        .bind(payload)
        .bind(result)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("insert_job", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self, result), fields(job_id = %id, to = %to), err)]
    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        result: Option<JobOutcome>,
    ) -> Result<Job, StoreError> {
        let allowed: Vec<String> = to
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let result = result.as_ref().map(to_json).transpose()?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = $2, result = COALESCE($3, result), updated_at = now()
            WHERE id = $1 AND status = ANY($4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(result)
        .bind(allowed)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.current_status(id).await? {
                Some(current) => Err(StoreError::Conflict { id, current, to }),
                None => Err(StoreError::NotFound(id)),
            },
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stale", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self, message), fields(project_id = %message.project_id, role = message.role.as_str()), err)]
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = MessageId::new();
        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, project_id, role, content, meta)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(message.project_id.as_str())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.meta)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_message", e))?;

        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(Message {
            id,
            project_id: message.project_id,
            role: message.role,
            content: message.content,
            meta: message.meta,
            created_at,
        })
    }

    async fn recent_messages(
        &self,
        project_id: &ProjectId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, role, content, meta, created_at
            FROM messages
            WHERE project_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(project_id.as_str())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_messages", e))?;

        rows.iter()
            .map(|row| {
                MessageRow::from_row(row)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?
                    .try_into()
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Storage(format!("serialize: {e}")))
}

fn parse_status(s: &str) -> Result<JobStatus, StoreError> {
    s.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status {s:?}")))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    JobRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?
        .try_into()
}

struct JobRow {
    id: Uuid,
    project_id: String,
    kind: String,
    status: String,
    payload: JsonValue,
    result: Option<JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "contract_review" => JobKind::ContractReview,
            other => return Err(StoreError::Corrupt(format!("unknown job kind {other:?}"))),
        };
        let corrupt = |e: serde_json::Error| StoreError::Corrupt(format!("job {}: {e}", row.id));

        Ok(Job {
            id: JobId::from_uuid(row.id),
            project_id: ProjectId::new(row.project_id)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            kind,
            status: parse_status(&row.status)?,
            payload: serde_json::from_value(row.payload).map_err(corrupt)?,
            result: row
                .result
                .map(serde_json::from_value)
                .transpose()
                .map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct MessageRow {
    id: Uuid,
    project_id: String,
    role: String,
    content: String,
    meta: JsonValue,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MessageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MessageRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            meta: row.try_get("meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::from_uuid(row.id),
            project_id: ProjectId::new(row.project_id)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            role: MessageRole::parse(&row.role)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role {:?}", row.role)))?,
            content: row.content,
            meta: row.meta,
            created_at: row.created_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Runs against a real database when `DATABASE_URL` is set; skipped otherwise.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::AnalysisInput;

    async fn store() -> Option<PostgresJobStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PostgresJobStore::connect(&url).await.ok()?;
        store.ensure_schema().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn guarded_transitions_against_postgres() {
        let Some(store) = store().await else {
            return;
        };

        let job = Job::queued(ProjectId::new("pg-test").unwrap(), &AnalysisInput::from_text("t"));
        store.insert_job(&job).await.unwrap();
        assert_eq!(
            store.insert_job(&job).await,
            Err(StoreError::AlreadyExists(job.id))
        );

        assert!(matches!(
            store.transition(job.id, JobStatus::Done, None).await,
            Err(StoreError::Conflict {
                current: JobStatus::Queued,
                ..
            })
        ));
        store.transition(job.id, JobStatus::Running, None).await.unwrap();
        let done = store
            .transition(job.id, JobStatus::Error, Some(JobOutcome::failure("boom")))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Error);
        assert_eq!(done.result, Some(JobOutcome::failure("boom")));

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Error);
        store.ping().await.unwrap();
    }
}
