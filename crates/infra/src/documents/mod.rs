//! Document retrieval and text extraction.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::jobs::Credential;

mod drive;
mod extract;

pub use drive::GoogleDriveClient;
pub use extract::{StandardExtractor, TextExtractor, GOOGLE_DOC_MIME, DOCX_MIME, PDF_MIME};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document request timed out")]
    Timeout,

    #[error("access to the document was denied (missing or expired credential): {0}")]
    Unauthorized(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("document provider unreachable: {0}")]
    Connection(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),
}

impl From<tokio::time::error::Elapsed> for DocumentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DocumentError::Timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub mime_type: String,
}

/// Remote file provider.
#[async_trait]
pub trait DocumentSource: Send + Sync + 'static {
    async fn get_metadata(
        &self,
        document_id: &str,
        credential: &Credential,
    ) -> Result<DocumentMetadata, DocumentError>;

    async fn get_content(
        &self,
        document_id: &str,
        credential: &Credential,
    ) -> Result<Vec<u8>, DocumentError>;
}
