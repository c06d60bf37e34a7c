//! Durable job and message storage.
//!
//! The durable store is the source of truth. Status changes are guarded: a write only
//! lands if the stored status is one of the allowed predecessors of the target.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use contractdesk_core::{JobId, JobStatus, MessageId, ProjectId};

use crate::jobs::{Job, JobOutcome};

mod memory;
mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Upper bound on messages returned by one history read.
pub const MESSAGE_PAGE_LIMIT: usize = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store call timed out")]
    Timeout,

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("job {id} is {current}; cannot move to {to}")]
    Conflict {
        id: JobId,
        current: JobStatus,
        to: JobStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("stored record is unreadable: {0}")]
    Corrupt(String),
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StoreError::Timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// Message to append. `meta` is opaque to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub project_id: ProjectId,
    pub role: MessageRole,
    pub content: String,
    pub meta: serde_json::Value,
}

/// A stored history message. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub project_id: ProjectId,
    pub role: MessageRole,
    pub content: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Short backend name for health output.
    fn name(&self) -> &str;

    /// Insert a new job. Fails with `AlreadyExists` if the id is taken.
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Guarded status change. Stamps `updated_at` with store time and returns the stored
    /// record. `result` is only written when `Some`.
    ///
    /// Fails with `Conflict` when the current status is not a predecessor of `to`.
    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        result: Option<JobOutcome>,
    ) -> Result<Job, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Jobs in `status` not updated since `updated_before`, oldest first.
    async fn list_stale(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Most recent messages for `project_id`, newest first.
    async fn recent_messages(
        &self,
        project_id: &ProjectId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
