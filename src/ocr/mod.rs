//! OCR engine abstraction.
//!
//! Every recognition attempt, automated or manual, is surfaced through the
//! [`OcrEngine`] trait and normalized into an [`EngineResult`]. Concrete
//! backends (Tesseract, Docling sidecar, Mistral OCR, PDF text layer) implement
//! the narrower [`OcrBackend`] trait and are wrapped by [`RecognitionAdapter`],
//! which owns error capture, timeouts and normalization.

pub mod docling;
pub mod external;
pub mod mistral;
pub mod pdf_text;
pub mod tesseract;

use crate::config::ServiceConfig;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Identifier of the manual-transcript engine.
pub const EXTERNAL_ENGINE_ID: &str = "external";

/// Extensions accepted by the pipeline, in display order.
pub const SUPPORTED_FORMATS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "pdf", "txt"];

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Image,
    Pdf,
    Text,
}

impl DocumentKind {
    /// Classify a file by its extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "tiff" | "tif" => Some(Self::Image),
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

/// A document submitted for recognition.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub kind: DocumentKind,
    pub data: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, kind: DocumentKind, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            kind,
            data,
        }
    }

    /// MIME type derived from the file extension.
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .filename
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "tif" | "tiff" => "image/tiff",
            "pdf" => "application/pdf",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }

    /// Lowercased extension, used when staging the document on disk.
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_else(|| "bin".to_string())
    }
}

// ============================================================================
// Engine results
// ============================================================================

/// Normalized output of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineResult {
    pub engine_name: String,
    /// Language tag requested for this attempt (not detected).
    pub language: String,
    pub word_count: usize,
    #[serde(flatten)]
    pub outcome: EngineOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineOutcome {
    Success { text: String, confidence: f64 },
    Failed { error: String },
}

impl EngineResult {
    pub fn success(
        engine_name: impl Into<String>,
        language: impl Into<String>,
        text: String,
        confidence: f64,
    ) -> Self {
        Self {
            engine_name: engine_name.into(),
            language: language.into(),
            word_count: word_count(&text),
            outcome: EngineOutcome::Success {
                text,
                confidence: clamp_confidence(confidence),
            },
        }
    }

    pub fn failed(
        engine_name: impl Into<String>,
        language: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            engine_name: engine_name.into(),
            language: language.into(),
            word_count: 0,
            outcome: EngineOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, EngineOutcome::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            EngineOutcome::Success { text, .. } => Some(text),
            EngineOutcome::Failed { .. } => None,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match &self.outcome {
            EngineOutcome::Success { confidence, .. } => Some(*confidence),
            EngineOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            EngineOutcome::Failed { error } => Some(error),
            EngineOutcome::Success { .. } => None,
        }
    }
}

/// Engine results keyed by engine name, kept in request order.
///
/// Serializes as a JSON object whose keys follow insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineResults(Vec<EngineResult>);

impl EngineResults {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a result, replacing any earlier entry with the same engine name.
    pub fn insert(&mut self, result: EngineResult) {
        match self
            .0
            .iter_mut()
            .find(|r| r.engine_name == result.engine_name)
        {
            Some(existing) => *existing = result,
            None => self.0.push(result),
        }
    }

    pub fn get(&self, engine_name: &str) -> Option<&EngineResult> {
        self.0.iter().find(|r| r.engine_name == engine_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineResult> {
        self.0.iter()
    }

    pub fn successful(&self) -> impl Iterator<Item = &EngineResult> {
        self.0.iter().filter(|r| r.is_success())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<EngineResult> for EngineResults {
    fn from_iter<I: IntoIterator<Item = EngineResult>>(iter: I) -> Self {
        let mut results = Self::new();
        for result in iter {
            results.insert(result);
        }
        results
    }
}

impl Serialize for EngineResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for result in &self.0 {
            map.serialize_entry(&result.engine_name, result)?;
        }
        map.end()
    }
}

/// Count whitespace-separated, non-empty tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Clamp a confidence score into `[0, 100]`. NaN maps to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

// ============================================================================
// Engine traits
// ============================================================================

/// The single capability every engine exposes. Implementations never fail:
/// errors are reported as `Failed` results.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, document: &Document, language: &str) -> EngineResult;
}

/// Raw output of a recognition backend, before normalization.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    pub confidence: f64,
}

/// A concrete OCR backend. May fail; [`RecognitionAdapter`] contains the failure.
#[async_trait::async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: DocumentKind) -> bool {
        kind != DocumentKind::Text
    }

    async fn recognize(&self, document: &Document, language: &str)
        -> anyhow::Result<Recognition>;
}

/// Wraps an [`OcrBackend`] into an infallible [`OcrEngine`].
pub struct RecognitionAdapter {
    backend: Box<dyn OcrBackend>,
    timeout: Duration,
}

impl RecognitionAdapter {
    pub fn new(backend: impl OcrBackend + 'static, timeout: Duration) -> Self {
        Self {
            backend: Box::new(backend),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl OcrEngine for RecognitionAdapter {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn run(&self, document: &Document, language: &str) -> EngineResult {
        let name = self.backend.name();

        if !self.backend.supports(document.kind) {
            return EngineResult::failed(
                name,
                language,
                format!("{} cannot process {:?} documents", name, document.kind),
            );
        }

        match tokio::time::timeout(self.timeout, self.backend.recognize(document, language)).await
        {
            Ok(Ok(recognition)) => {
                info!(
                    "{}: recognized {} chars (confidence {:.1})",
                    name,
                    recognition.text.len(),
                    recognition.confidence
                );
                EngineResult::success(name, language, recognition.text, recognition.confidence)
            }
            Ok(Err(e)) => {
                warn!("{}: recognition failed: {:#}", name, e);
                EngineResult::failed(name, language, format!("{:#}", e))
            }
            Err(_) => {
                warn!("{}: recognition timed out after {:?}", name, self.timeout);
                EngineResult::failed(
                    name,
                    language,
                    format!("Recognition timed out after {:?}", self.timeout),
                )
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Engines available to this process. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn OcrEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn OcrEngine>) {
        self.engines.push(engine);
    }

    /// Probe and register every backend the configuration enables.
    pub async fn from_config(config: &ServiceConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        let timeout = config.engine_timeout;

        let tesseract = tesseract::TesseractBackend::new(config.tesseract.clone());
        match tesseract.probe().await {
            Ok(version) => {
                info!("Tesseract OCR is available ({})", version);
                registry.register(Arc::new(RecognitionAdapter::new(tesseract, timeout)));
            }
            Err(e) => warn!("Could not initialize Tesseract: {:#}", e),
        }

        registry.register(Arc::new(RecognitionAdapter::new(
            pdf_text::PdfTextBackend,
            timeout,
        )));

        if let Some(url) = &config.docling_url {
            info!("Docling sidecar configured at {}", url);
            registry.register(Arc::new(RecognitionAdapter::new(
                docling::DoclingBackend::new(url.clone(), client.clone()),
                timeout,
            )));
        }

        if let Some(key) = &config.mistral_api_key {
            info!("Mistral OCR configured");
            registry.register(Arc::new(RecognitionAdapter::new(
                mistral::MistralOcrBackend::new(key.clone(), client),
                timeout,
            )));
        }

        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OcrEngine>> {
        self.engines.iter().find(|e| e.name() == name).cloned()
    }

    /// Identifiers callers may request, in registration order. The manual
    /// transcript engine is always listed last.
    pub fn available(&self) -> Vec<String> {
        self.engines
            .iter()
            .map(|e| e.name().to_string())
            .chain(std::iter::once(EXTERNAL_ENGINE_ID.to_string()))
            .collect()
    }
}
