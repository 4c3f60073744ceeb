//! Document-conversion backend: one docling-serve call per document.
//!
//! The whole source document is uploaded to `{base}/v1/convert/file` with
//! OCR forced on; the Markdown rendition comes back in
//! `document.md_content`. Figures are requested as placeholders, and any
//! base64 image payload that still slips through is replaced by
//! [`IMAGE_PLACEHOLDER`](super::sanitize::IMAGE_PLACEHOLDER).

use super::sanitize::{clean_text, strip_inline_images};
use super::{http_client, BackendInput, ExtractedText, OcrBackend, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::{truncate_body, BackendError, PipelineError};
use crate::pipeline::job::{Job, JobPayload};
use crate::store::DocumentId;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    document: Option<ConvertedDocument>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConvertedDocument {
    md_content: Option<String>,
}

/// [`OcrBackend`] backed by a docling-serve instance.
#[derive(Debug, Clone)]
pub struct ConversionBackend {
    client: reqwest::Client,
    endpoint: String,
    ocr_engine: String,
    languages: Vec<String>,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl ConversionBackend {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(config.backend_timeout_secs)?,
            endpoint: convert_endpoint(&config.backend_url),
            ocr_engine: config.ocr_engine.clone(),
            languages: config.languages.clone(),
            timeout_secs: config.backend_timeout_secs,
            retry: RetryPolicy::from_config(config),
        })
    }

    fn form(&self, id: DocumentId, bytes: &[u8]) -> Result<Form, BackendError> {
        let file = Part::bytes(bytes.to_vec())
            .file_name(format!("{id}.pdf"))
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let mut form = Form::new()
            .part("files", file)
            .text("to_formats", "md")
            .text("do_ocr", "true")
            .text("force_ocr", "true")
            .text("ocr_engine", self.ocr_engine.clone())
            .text("image_export_mode", "placeholder");
        for lang in &self.languages {
            form = form.text("ocr_lang", lang.clone());
        }
        Ok(form)
    }

    async fn convert(&self, id: DocumentId, bytes: &[u8]) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(self.form(id, bytes)?)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_body(text),
            });
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout_secs))?;
        markdown_from(parsed)
    }
}

fn convert_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1/convert/file") {
        base.to_string()
    } else {
        format!("{base}/v1/convert/file")
    }
}

fn markdown_from(response: ConvertResponse) -> Result<String, BackendError> {
    if response.status.as_deref() == Some("failure") {
        return Err(BackendError::InvalidResponse(format!(
            "conversion failed: {}",
            serde_json::Value::Array(response.errors)
        )));
    }
    response
        .document
        .and_then(|d| d.md_content)
        .ok_or_else(|| BackendError::InvalidResponse("missing document.md_content".into()))
}

#[async_trait]
impl OcrBackend for ConversionBackend {
    fn name(&self) -> &str {
        "conversion"
    }

    fn input(&self) -> BackendInput {
        BackendInput::SourceDocument
    }

    async fn extract(&self, job: &Job) -> Result<ExtractedText, BackendError> {
        let JobPayload::Document(bytes) = &job.payload else {
            return Err(BackendError::UnsupportedPayload {
                id: job.id,
                expected: "document",
            });
        };

        let start = Instant::now();
        let what = format!("Document {}", job.id);
        let markdown = self
            .retry
            .run(&what, || self.convert(job.id, bytes))
            .await?;
        let text = clean_text(&strip_inline_images(&markdown));
        info!(
            "{}: converted {} bytes → {} chars in {:?}",
            what,
            bytes.len(),
            text.chars().count(),
            start.elapsed()
        );

        Ok(ExtractedText {
            segments: vec![text],
        })
    }
}
