//! In-memory durable store for tests/dev.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use contractdesk_core::{DomainError, JobId, JobStatus, MessageId, ProjectId};

use super::{JobStore, Message, NewMessage, StoreError};
use crate::jobs::{Job, JobOutcome};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    messages: RwLock<Vec<Message>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All messages in insertion order.
    pub async fn all_messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        result: Option<JobOutcome>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        job.advance(to, result, Utc::now()).map_err(|e| match e {
            DomainError::InvalidTransition { from, to } => StoreError::Conflict {
                id,
                current: from,
                to,
            },
            other => StoreError::Storage(other.to_string()),
        })?;
        Ok(job.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut stale: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == status && j.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let stored = Message {
            id: MessageId::new(),
            project_id: message.project_id,
            role: message.role,
            content: message.content,
            meta: message.meta,
            created_at: Utc::now(),
        };
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        project_id: &ProjectId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        // Insertion order is creation order; walk it backwards for newest first.
        Ok(messages
            .iter()
            .rev()
            .filter(|m| &m.project_id == project_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::AnalysisInput;
    use crate::store::MessageRole;

    fn project() -> ProjectId {
        ProjectId::new("p-1").unwrap()
    }

    async fn queued(store: &InMemoryJobStore) -> Job {
        let job = Job::queued(project(), &AnalysisInput::from_text("contract"));
        store.insert_job(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = queued(&store).await;
        assert_eq!(
            store.insert_job(&job).await,
            Err(StoreError::AlreadyExists(job.id))
        );
    }

    #[tokio::test]
    async fn only_one_terminal_write_wins() {
        let store = InMemoryJobStore::new();
        let job = queued(&store).await;

        store.transition(job.id, JobStatus::Running, None).await.unwrap();
        let done = store
            .transition(job.id, JobStatus::Error, Some(JobOutcome::failure("first")))
            .await
            .unwrap();
        assert!(done.updated_at >= job.updated_at);

        let late = store
            .transition(job.id, JobStatus::Done, Some(JobOutcome::failure("second")))
            .await;
        assert!(matches!(
            late,
            Err(StoreError::Conflict {
                current: JobStatus::Error,
                to: JobStatus::Done,
                ..
            })
        ));

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.result, Some(JobOutcome::failure("first")));
    }

    #[tokio::test]
    async fn unknown_job_transition_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        assert_eq!(
            store.transition(id, JobStatus::Running, None).await,
            Err(StoreError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn stale_listing_filters_by_status_and_age() {
        let store = InMemoryJobStore::new();
        let running = queued(&store).await;
        store
            .transition(running.id, JobStatus::Running, None)
            .await
            .unwrap();
        let _still_queued = queued(&store).await;

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = store
            .list_stale(JobStatus::Running, cutoff, 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, running.id);

        let none = store
            .list_stale(JobStatus::Running, cutoff - chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn recent_messages_are_newest_first_and_scoped() {
        let store = InMemoryJobStore::new();
        for i in 0..3 {
            store
                .append_message(NewMessage {
                    project_id: project(),
                    role: MessageRole::User,
                    content: format!("m{i}"),
                    meta: serde_json::json!({}),
                })
                .await
                .unwrap();
        }
        store
            .append_message(NewMessage {
                project_id: ProjectId::new("other").unwrap(),
                role: MessageRole::Assistant,
                content: "elsewhere".into(),
                meta: serde_json::json!({}),
            })
            .await
            .unwrap();

        let recent = store.recent_messages(&project(), 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1"]);
    }
}
