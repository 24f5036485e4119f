//! Docling sidecar OCR backend.

use super::{Document, OcrBackend, Recognition};
use anyhow::Context;
use serde::Deserialize;
use tracing::info;

/// Docling does not report a score; this is the nominal confidence we assign.
const DOCLING_CONFIDENCE: f64 = 95.0;

/// Docling sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DoclingResponse {
    markdown: String,
    #[serde(default)]
    total_pages: u32,
}

pub struct DoclingBackend {
    url: String,
    client: reqwest::Client,
}

impl DoclingBackend {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }
}

#[async_trait::async_trait]
impl OcrBackend for DoclingBackend {
    fn name(&self) -> &str {
        "docling"
    }

    async fn recognize(&self, document: &Document, _language: &str) -> anyhow::Result<Recognition> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(document.data.clone())
            .file_name(document.filename.clone())
            .mime_str(document.mime_type())?;

        let form = Form::new().part("file", part);

        info!("DoclingBackend: converting {} ({} bytes)", document.filename, document.data.len());

        let response = self
            .client
            .post(format!("{}/convert", self.url.trim_end_matches('/')))
            .multipart(form)
            .send()
            .await
            .context("Failed to reach Docling sidecar")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Docling sidecar error ({}): {}", status, error_text);
        }

        let docling: DoclingResponse = response
            .json()
            .await
            .context("Failed to parse Docling response")?;

        info!("DoclingBackend: {} pages converted", docling.total_pages);

        Ok(Recognition {
            text: docling.markdown,
            confidence: DOCLING_CONFIDENCE,
        })
    }
}
