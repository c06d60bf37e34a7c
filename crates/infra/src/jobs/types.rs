//! Job record, request input and outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use contractdesk_ai::{truncate_chars, AiError, AnalysisOptions, ContractAnalysis};
use contractdesk_core::{DomainResult, JobId, JobStatus, ProjectId};

use crate::documents::DocumentError;

/// Longest request text kept verbatim in the stored history message.
pub const HISTORY_TEXT_LIMIT: usize = 1000;
const REDACTED: &str = "***";
const TRUNCATION_MARKER: &str = " (truncated)";

/// Job kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ContractReview,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ContractReview => "contract_review",
        }
    }
}

/// Bearer credential for the document provider.
///
/// Never serialized and never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Contract-review request input as submitted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisInput {
    #[serde(default)]
    pub drive_file_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub access_token: Option<Credential>,
}

impl AnalysisInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn from_document(drive_file_id: impl Into<String>, token: Option<Credential>) -> Self {
        Self {
            drive_file_id: Some(drive_file_id.into()),
            access_token: token,
            ..Default::default()
        }
    }

    pub fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            questions: self.questions.clone(),
        }
    }

    /// The input as persisted on the job record: the credential is dropped.
    pub fn to_payload(&self) -> JobPayload {
        JobPayload::ContractReview(ReviewRequest {
            drive_file_id: self.drive_file_id.clone(),
            text: self.text.clone(),
            questions: self.questions.clone(),
        })
    }

    /// The input as stored in the `user` history message.
    ///
    /// The credential is masked and long text is cut to [`HISTORY_TEXT_LIMIT`] characters.
    pub fn history_content(&self) -> String {
        let text = self.text.as_deref().map(|text| {
            let kept = truncate_chars(text, HISTORY_TEXT_LIMIT);
            if kept.len() < text.len() {
                format!("{kept}{TRUNCATION_MARKER}")
            } else {
                kept.to_string()
            }
        });

        serde_json::json!({
            "driveFileId": self.drive_file_id,
            "text": text,
            "questions": self.questions,
            "accessToken": self.access_token.as_ref().map(|_| REDACTED),
        })
        .to_string()
    }
}

/// Sanitized request kept on the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Typed job payload; one variant per job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobPayload {
    ContractReview(ReviewRequest),
}

/// Result attached to a terminal job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Analysis(ContractAnalysis),
    Failure { error: String },
}

impl JobOutcome {
    pub fn failure(error: impl std::fmt::Display) -> Self {
        JobOutcome::Failure {
            error: error.to_string(),
        }
    }
}

/// A contract-review job as stored in the cache and the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: JobPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn queued(project_id: ProjectId, input: &AnalysisInput) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id,
            kind: JobKind::ContractReview,
            status: JobStatus::Queued,
            payload: input.to_payload(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting anything the lifecycle does not allow.
    pub fn advance(
        &mut self,
        next: JobStatus,
        result: Option<JobOutcome>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.status.check_transition(next)?;
        self.status = next;
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = at;
        Ok(())
    }
}

/// Why a job ended in `error`. The display text is what clients see in `result.error`.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("missing input: provide either text or a driveFileId")]
    MissingInput,

    #[error("driveFileId provided but no access token")]
    MissingCredential,

    #[error("no text could be extracted from the document")]
    NothingExtracted,

    #[error("document retrieval failed: {0}")]
    Document(#[from] DocumentError),

    #[error("{0}")]
    Analysis(#[from] AiError),

    #[error("job execution aborted unexpectedly")]
    Aborted,

    #[error("job abandoned: no progress within {0} seconds")]
    Abandoned(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_never_carries_the_credential() {
        let input: AnalysisInput = serde_json::from_value(serde_json::json!({
            "driveFileId": "file-1",
            "questions": ["Is there a non-compete?"],
            "accessToken": "ya29.secret"
        }))
        .unwrap();

        let job = Job::queued(ProjectId::new("p").unwrap(), &input);
        let stored = serde_json::to_string(&job).unwrap();
        assert!(!stored.contains("ya29.secret"));
        assert!(stored.contains("\"driveFileId\":\"file-1\""));
        assert!(stored.contains("\"kind\":\"contract_review\""));
        assert!(stored.contains("\"status\":\"queued\""));
        assert!(!stored.contains("\"result\""));

        assert_eq!(format!("{:?}", input.access_token), "Some(Credential(***))");
    }

    #[test]
    fn history_content_masks_token_and_truncates_text() {
        let mut input = AnalysisInput::from_text("x".repeat(HISTORY_TEXT_LIMIT + 50));
        input.access_token = Some(Credential::new("ya29.secret"));

        let content = input.history_content();
        assert!(!content.contains("ya29.secret"));

        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["accessToken"], "***");
        let text = value["text"].as_str().unwrap();
        assert!(text.ends_with("(truncated)"));
        assert_eq!(text.len(), HISTORY_TEXT_LIMIT + TRUNCATION_MARKER.len());
    }

    #[test]
    fn short_text_is_kept_verbatim() {
        let content = AnalysisInput::from_text("short contract").history_content();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["text"], "short contract");
        assert!(value["accessToken"].is_null());
    }

    #[test]
    fn outcomes_round_trip_untagged() {
        let failure = JobOutcome::failure(JobFailure::MissingInput);
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"error": "missing input: provide either text or a driveFileId"})
        );
        let back: JobOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn advance_enforces_the_lifecycle() {
        let mut job = Job::queued(ProjectId::new("p").unwrap(), &AnalysisInput::from_text("t"));
        assert!(job.advance(JobStatus::Done, None, Utc::now()).is_err());
        job.advance(JobStatus::Running, None, Utc::now()).unwrap();
        job.advance(JobStatus::Error, Some(JobOutcome::failure("boom")), Utc::now())
            .unwrap();
        assert!(job.advance(JobStatus::Done, None, Utc::now()).is_err());
        assert_eq!(job.result, Some(JobOutcome::failure("boom")));
    }
}
