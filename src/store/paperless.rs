//! Paperless-ngx REST client.
//!
//! Endpoints used:
//!
//! | Operation      | Request                                              |
//! |----------------|------------------------------------------------------|
//! | list           | `GET  /api/documents/?page_size=100&tags__id__none=…` |
//! | get_metadata   | `GET  /api/documents/{id}/`                          |
//! | download       | `GET  /api/documents/{id}/download/`                 |
//! | replace_file   | `POST /api/documents/{id}/replace_document/`         |
//! | patch          | `PATCH /api/documents/{id}/`                         |

use super::{DocumentId, DocumentPatch, DocumentStore, DocumentSummary, ListFilter, ListPage};
use crate::config::PipelineConfig;
use crate::error::{truncate_body, PipelineError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const PAGE_SIZE: u32 = 100;

/// Client for a Paperless-ngx instance authenticated by API token.
#[derive(Debug, Clone)]
pub struct PaperlessClient {
    base_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct DocumentListResponse {
    #[serde(default)]
    count: u64,
    next: Option<String>,
    #[serde(default)]
    results: Vec<DocumentSummary>,
}

impl PaperlessClient {
    /// Build a client from the store section of the config.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Token {}", config.store_token))
            .map_err(|e| PipelineError::InvalidConfig(format!("store token: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.store_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.store_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn document_url(&self, id: DocumentId) -> String {
        format!("{}/api/documents/{}/", self.base_url, id)
    }

    /// URL of the first listing page for `filter`.
    pub fn list_url(&self, filter: ListFilter) -> String {
        let mut url = format!("{}/api/documents/?page_size={}", self.base_url, PAGE_SIZE);
        if let Some(tag) = filter.exclude_tag {
            url.push_str(&format!("&tags__id__none={tag}"));
        }
        if let Some(tag) = filter.include_tag {
            url.push_str(&format!("&tags__id__all={tag}"));
        }
        url
    }
}

fn request_error(operation: &str, err: reqwest::Error) -> PipelineError {
    PipelineError::StoreRequest {
        operation: operation.to_string(),
        detail: err.to_string(),
    }
}

/// Turn a non-2xx response into [`PipelineError::StoreStatus`].
async fn ensure_success(operation: &str, response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = truncate_body(response.text().await.unwrap_or_default());
    Err(PipelineError::StoreStatus {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DocumentStore for PaperlessClient {
    async fn list(
        &self,
        filter: ListFilter,
        cursor: Option<String>,
    ) -> Result<ListPage, PipelineError> {
        let url = cursor.unwrap_or_else(|| self.list_url(filter));
        debug!("Listing documents: {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error("list", e))?;
        let page: DocumentListResponse = ensure_success("list", response)
            .await?
            .json()
            .await
            .map_err(|e| request_error("list", e))?;

        Ok(ListPage {
            total: page.count,
            documents: page.results,
            next: page.next,
        })
    }

    async fn get_metadata(&self, id: DocumentId) -> Result<DocumentSummary, PipelineError> {
        let response = self
            .http
            .get(self.document_url(id))
            .send()
            .await
            .map_err(|e| request_error("get_metadata", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::DocumentNotFound { id });
        }
        ensure_success("get_metadata", response)
            .await?
            .json()
            .await
            .map_err(|e| request_error("get_metadata", e))
    }

    async fn download(&self, id: DocumentId) -> Result<Vec<u8>, PipelineError> {
        let url = format!("{}/api/documents/{}/download/", self.base_url, id);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_error("download", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::DocumentNotFound { id });
        }
        let bytes = ensure_success("download", response)
            .await?
            .bytes()
            .await
            .map_err(|e| request_error("download", e))?;
        debug!("Downloaded document {}: {} bytes", id, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn replace_file(&self, id: DocumentId, pdf: Vec<u8>) -> Result<(), PipelineError> {
        let url = format!("{}/api/documents/{}/replace_document/", self.base_url, id);
        let part = Part::bytes(pdf)
            .file_name("ocr_fixed.pdf")
            .mime_str("application/pdf")
            .map_err(|e| request_error("replace_file", e))?;
        let form = Form::new().part("document", part);

        let response = self
            .http
            .post(url)
            .header("Origin", &self.base_url)
            .header("Referer", format!("{}/", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error("replace_file", e))?;
        ensure_success("replace_file", response).await?;
        Ok(())
    }

    async fn patch(&self, id: DocumentId, patch: DocumentPatch) -> Result<(), PipelineError> {
        let response = self
            .http
            .patch(self.document_url(id))
            .json(&patch)
            .send()
            .await
            .map_err(|e| request_error("patch", e))?;
        ensure_success("patch", response).await?;
        Ok(())
    }
}
