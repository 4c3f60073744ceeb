//! Vision-model backend: one Ollama `/api/generate` call per page image.
//!
//! Pages are base64-encoded PNGs sent with `stream: false`, so the whole
//! answer arrives in the `response` field of a single JSON object. Pages are
//! processed sequentially; concurrency comes from running several workers.

use super::sanitize::clean_text;
use super::{http_client, BackendInput, ExtractedText, OcrBackend, RetryPolicy};
use crate::config::PipelineConfig;
use crate::error::{truncate_body, BackendError, PipelineError};
use crate::pipeline::job::{Job, JobPayload};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// [`OcrBackend`] backed by a local vision model.
#[derive(Debug, Clone)]
pub struct VisionBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    prompt: String,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl VisionBackend {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(config.backend_timeout_secs)?,
            url: config.backend_url.clone(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            timeout_secs: config.backend_timeout_secs,
            retry: RetryPolicy::from_config(config),
        })
    }

    fn request_body(&self, png: &[u8]) -> GenerateRequest<'_> {
        let b64 = STANDARD.encode(png);
        debug!("Encoded page image → {} bytes base64", b64.len());
        GenerateRequest {
            model: &self.model,
            prompt: &self.prompt,
            images: vec![b64],
            stream: false,
        }
    }

    async fn generate(&self, body: &GenerateRequest<'_>) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
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

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout_secs))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl OcrBackend for VisionBackend {
    fn name(&self) -> &str {
        "vision"
    }

    fn input(&self) -> BackendInput {
        BackendInput::PageImages
    }

    async fn extract(&self, job: &Job) -> Result<ExtractedText, BackendError> {
        let JobPayload::Pages(pages) = &job.payload else {
            return Err(BackendError::UnsupportedPayload {
                id: job.id,
                expected: "page-image",
            });
        };

        let mut segments = Vec::with_capacity(pages.len());
        for (idx, png) in pages.iter().enumerate() {
            let start = Instant::now();
            let body = self.request_body(png);
            let what = format!("Document {} page {}", job.id, idx + 1);
            let raw = self.retry.run(&what, || self.generate(&body)).await?;
            let text = clean_text(&raw);
            info!(
                "{}: {} chars in {:?}",
                what,
                text.chars().count(),
                start.elapsed()
            );
            segments.push(text);
        }

        Ok(ExtractedText { segments })
    }
}
