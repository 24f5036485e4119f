//! Manual transcripts produced by third-party OCR tools (ABBYY FineReader,
//! Readiris, ...). Nothing is recognized; the supplied text is taken as-is.

use super::{Document, EngineResult, OcrEngine, EXTERNAL_ENGINE_ID};
use tracing::{info, warn};

pub const DEFAULT_TOOL_NAME: &str = "External OCR";

pub struct ExternalTranscript {
    name: String,
    confidence: f64,
}

impl ExternalTranscript {
    /// `confidence` is the user-declared score; out-of-range values are clamped.
    pub fn new(tool_name: Option<&str>, confidence: f64) -> Self {
        let tool = tool_name
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TOOL_NAME);
        Self {
            name: format!("{}:{}", EXTERNAL_ENGINE_ID, tool),
            confidence,
        }
    }
}

#[async_trait::async_trait]
impl OcrEngine for ExternalTranscript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, document: &Document, language: &str) -> EngineResult {
        let text = match String::from_utf8(document.data.clone()) {
            Ok(text) => text,
            Err(e) => {
                warn!("{}: transcript is not valid UTF-8, decoding lossily", self.name);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        info!("{}: accepted transcript of {} chars", self.name, text.len());
        EngineResult::success(&self.name, language, text, self.confidence)
    }
}
