//! Mistral OCR backend (uses Mistral's OCR API).

use super::{Document, DocumentKind, OcrBackend, Recognition};
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const MISTRAL_OCR_URL: &str = "https://api.mistral.ai/v1/ocr";

/// Mistral OCR does not report a score; this is the nominal confidence we assign.
const MISTRAL_CONFIDENCE: f64 = 92.0;

pub struct MistralOcrBackend {
    api_key: String,
    client: reqwest::Client,
}

impl MistralOcrBackend {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self { api_key, client }
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    model: String,
    document: DocumentSource,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum DocumentSource {
    #[serde(rename = "document_url")]
    Document { document_url: String },
    #[serde(rename = "image_url")]
    Image { image_url: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<MistralPage>,
}

#[derive(Deserialize)]
struct MistralPage {
    markdown: String,
}

/// Inline the document as a base64 data URL.
fn document_source(document: &Document) -> DocumentSource {
    let data_url = format!(
        "data:{};base64,{}",
        document.mime_type(),
        BASE64.encode(&document.data)
    );
    match document.kind {
        DocumentKind::Image => DocumentSource::Image { image_url: data_url },
        _ => DocumentSource::Document {
            document_url: data_url,
        },
    }
}

// ── Backend implementation ──────────────────────────────────────────────────

#[async_trait::async_trait]
impl OcrBackend for MistralOcrBackend {
    fn name(&self) -> &str {
        "mistral_ocr"
    }

    async fn recognize(&self, document: &Document, _language: &str) -> anyhow::Result<Recognition> {
        let body = OcrRequest {
            model: "mistral-ocr-latest".to_string(),
            document: document_source(document),
        };

        info!("MistralOcrBackend: calling OCR API for {}", document.filename);

        let resp = self
            .client
            .post(MISTRAL_OCR_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach Mistral OCR API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mistral OCR API error ({}): {}", status, text);
        }

        let raw_text = resp.text().await?;
        debug!(
            "MistralOcrBackend: raw response ({} bytes): {}",
            raw_text.len(),
            raw_text.chars().take(500).collect::<String>()
        );
        let ocr: OcrResponse =
            serde_json::from_str(&raw_text).context("Failed to parse Mistral OCR response")?;

        let text = ocr
            .pages
            .iter()
            .map(|p| p.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(Recognition {
            text,
            confidence: MISTRAL_CONFIDENCE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images_use_image_url() {
        let doc = Document::new("a.png", DocumentKind::Image, vec![1, 2, 3]);
        let json = serde_json::to_value(document_source(&doc)).unwrap();
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"], "data:image/png;base64,AQID");
    }

    #[test]
    fn test_pdfs_use_document_url() {
        let doc = Document::new("a.pdf", DocumentKind::Pdf, vec![1, 2, 3]);
        let json = serde_json::to_value(document_source(&doc)).unwrap();
        assert_eq!(json["type"], "document_url");
        assert_eq!(json["document_url"], "data:application/pdf;base64,AQID");
    }
}
