//! Embedded text layer of a PDF, read with lopdf.
//!
//! No recognition happens here; born-digital PDFs carry exact text, so a
//! non-empty layer is reported with full confidence.

use super::{Document, DocumentKind, OcrBackend, Recognition};
use anyhow::Result;
use lopdf::Document as PdfDocument;
use std::io::Cursor;
use tracing::debug;

pub struct PdfTextBackend;

#[async_trait::async_trait]
impl OcrBackend for PdfTextBackend {
    fn name(&self) -> &str {
        "pdf_text"
    }

    fn supports(&self, kind: DocumentKind) -> bool {
        kind == DocumentKind::Pdf
    }

    async fn recognize(&self, document: &Document, _language: &str) -> Result<Recognition> {
        let data = document.data.clone();
        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&data)).await??;

        if text.trim().is_empty() {
            anyhow::bail!("PDF has no embedded text layer");
        }

        Ok(Recognition {
            text,
            confidence: 100.0,
        })
    }
}

/// Concatenate the text of every page, one page per paragraph.
fn extract_pdf_text(data: &[u8]) -> Result<String> {
    let doc = PdfDocument::load_from(Cursor::new(data))
        .map_err(|e| anyhow::anyhow!("Failed to load PDF: {}", e))?;

    let pages = doc.get_pages();
    debug!("pdf_text: {} pages", pages.len());

    let mut texts = Vec::with_capacity(pages.len());
    for (page_num, _) in pages {
        if let Ok(content) = doc.extract_text(&[page_num]) {
            let content = content.trim();
            if !content.is_empty() {
                texts.push(content.to_string());
            }
        }
    }

    Ok(texts.join("\n\n"))
}
