//! Google Drive v3 REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, instrument};

use super::extract::GOOGLE_DOC_MIME;
use super::{DocumentError, DocumentMetadata, DocumentSource};
use crate::jobs::Credential;

pub const DEFAULT_DRIVE_URL: &str = "https://www.googleapis.com/drive/v3";
const METADATA_FIELDS: &str = "id,name,mimeType,size,createdTime";

pub struct GoogleDriveClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Default for GoogleDriveClient {
    fn default() -> Self {
        Self::new(DEFAULT_DRIVE_URL)
    }
}

impl GoogleDriveClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `{base}/files/{document_id}[/{suffix}]`, the id encoded as one path segment.
    fn file_url(&self, document_id: &str, suffix: Option<&str>) -> Result<Url, DocumentError> {
        let invalid =
            |reason: String| DocumentError::Connection(format!("bad drive url {}: {reason}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| invalid("base cannot carry a path".to_string()))?;
            segments.pop_if_empty().push("files").push(document_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn fetch(
        &self,
        url: Url,
        query: &[(&str, &str)],
        document_id: &str,
        credential: &Credential,
    ) -> Result<reqwest::Response, DocumentError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(credential.expose())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DocumentError::Timeout
                } else {
                    DocumentError::Connection(e.to_string())
                }
            })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(DocumentError::Unauthorized(document_id.to_string()))
            }
            StatusCode::NOT_FOUND => Err(DocumentError::NotFound(document_id.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DocumentError::Provider {
                    status: status.as_u16(),
                    message: body.chars().take(300).collect(),
                })
            }
        }
    }
}

#[async_trait]
impl DocumentSource for GoogleDriveClient {
    #[instrument(skip(self, credential), err)]
    async fn get_metadata(
        &self,
        document_id: &str,
        credential: &Credential,
    ) -> Result<DocumentMetadata, DocumentError> {
        let url = self.file_url(document_id, None)?;
        let response = self
            .fetch(url, &[("fields", METADATA_FIELDS)], document_id, credential)
            .await?;
        response
            .json::<DocumentMetadata>()
            .await
            .map_err(|e| DocumentError::Provider {
                status: 200,
                message: format!("unreadable metadata: {e}"),
            })
    }

    #[instrument(skip(self, credential), err)]
    async fn get_content(
        &self,
        document_id: &str,
        credential: &Credential,
    ) -> Result<Vec<u8>, DocumentError> {
        let metadata = self.get_metadata(document_id, credential).await?;

        // Native Google Docs have no binary content; export them as plain text.
        let response = if metadata.mime_type == GOOGLE_DOC_MIME {
            let url = self.file_url(document_id, Some("export"))?;
            self.fetch(url, &[("mimeType", "text/plain")], document_id, credential)
                .await?
        } else {
            let url = self.file_url(document_id, None)?;
            self.fetch(url, &[("alt", "media")], document_id, credential)
                .await?
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocumentError::Connection(e.to_string()))?;
        debug!(document_id, mime_type = %metadata.mime_type, size = bytes.len(), "downloaded document");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_urls_keep_the_id_in_one_segment() {
        let drive = GoogleDriveClient::default();
        assert_eq!(
            drive.file_url("1AbC-xyz", None).unwrap().as_str(),
            "https://www.googleapis.com/drive/v3/files/1AbC-xyz"
        );
        assert_eq!(
            drive.file_url("../a/b?c#d", Some("export")).unwrap().as_str(),
            "https://www.googleapis.com/drive/v3/files/..%2Fa%2Fb%3Fc%23d/export"
        );
    }

    #[test]
    fn file_urls_work_against_a_bare_host() {
        let drive = GoogleDriveClient::new("http://127.0.0.1:9/");
        assert_eq!(
            drive.file_url("doc 1", None).unwrap().as_str(),
            "http://127.0.0.1:9/files/doc%201"
        );
    }

    #[test]
    fn unusable_base_url_is_a_connection_error() {
        let drive = GoogleDriveClient::new("not a url");
        assert!(matches!(
            drive.file_url("doc", None),
            Err(DocumentError::Connection(_))
        ));
    }
}
