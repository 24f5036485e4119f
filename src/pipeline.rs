//! Pipeline orchestrator: engines → combiner → optional corrector.
//!
//! The orchestrator is stateless across calls. It borrows the process-wide
//! engine registry and corrector, and everything it builds per request is
//! owned by that request until the response is returned.

use crate::combiner::{combine, CombinationMethod, CombinedResult};
use crate::corrector::{CorrectedResult, Corrector};
use crate::error::ConfigurationError;
use crate::ocr::external::ExternalTranscript;
use crate::ocr::{
    Document, DocumentKind, EngineRegistry, EngineResults, OcrEngine, EXTERNAL_ENGINE_ID,
};
use crate::runner::run_engines;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Request-independent defaults resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineDefaults {
    pub language: String,
    pub external_confidence: f64,
}

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub document: Document,
    /// Requested engine identifiers. Ignored for plain-text transcripts.
    pub engines: Vec<String>,
    pub language: Option<String>,
    pub ai_correction: bool,
    pub combination_method: CombinationMethod,
    pub context: Option<String>,
    /// Declared tool name for a manual transcript.
    pub external_engine: Option<String>,
    /// User-asserted confidence for a manual transcript.
    pub confidence: Option<f64>,
    pub correction_timeout: Option<Duration>,
}

impl PipelineRequest {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            engines: Vec::new(),
            language: None,
            ai_correction: false,
            combination_method: CombinationMethod::default(),
            context: None,
            external_engine: None,
            confidence: None,
            correction_timeout: None,
        }
    }
}

/// Echo of the resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub engines: Vec<String>,
    pub language: String,
    pub ai_correction: bool,
    pub combination_method: CombinationMethod,
}

/// Top-level response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub success: bool,
    pub request_id: String,
    pub filename: String,
    pub ocr_results: EngineResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_result: Option<CombinedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_correction: Option<CorrectedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,
    pub settings: Settings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<EngineRegistry>,
    corrector: Corrector,
    defaults: PipelineDefaults,
}

impl Pipeline {
    pub fn new(registry: Arc<EngineRegistry>, corrector: Corrector, defaults: PipelineDefaults) -> Self {
        Self {
            registry,
            corrector,
            defaults,
        }
    }

    pub fn available_engines(&self) -> Vec<String> {
        self.registry.available()
    }

    pub fn corrector(&self) -> &Corrector {
        &self.corrector
    }

    pub fn default_language(&self) -> &str {
        &self.defaults.language
    }

    /// Run the full pipeline. Only configuration problems are returned as
    /// errors; engine and correction failures are reported in the response.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineResponse, ConfigurationError> {
        let started = Instant::now();

        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.defaults.language)
            .to_string();
        validate_language(&language)?;

        let engines = self.resolve_engines(&request)?;
        let settings = Settings {
            engines: engines.iter().map(|e| e.name().to_string()).collect(),
            language: language.clone(),
            ai_correction: request.ai_correction,
            combination_method: request.combination_method,
        };

        info!(
            "Pipeline: {} ({} bytes, {:?}) with engines {:?}, language={}",
            request.document.filename,
            request.document.data.len(),
            request.document.kind,
            settings.engines,
            language
        );

        let filename = request.document.filename.clone();
        let ocr_results = run_engines(&engines, Arc::new(request.document), &language).await;

        let mut response = PipelineResponse {
            success: false,
            request_id: uuid::Uuid::new_v4().to_string(),
            filename,
            ocr_results,
            combined_result: None,
            ai_correction: None,
            final_text: None,
            settings,
            error: None,
            elapsed_ms: 0,
        };

        debug!("Pipeline: combining with {}", request.combination_method);
        let Some(combined) = combine(&response.ocr_results, request.combination_method) else {
            let error = aggregate_error(&response.ocr_results);
            warn!("Pipeline: {}", error);
            response.error = Some(error);
            response.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(response);
        };

        info!(
            "Pipeline: combined result from {} (confidence {:.1})",
            combined.source_engine, combined.confidence
        );

        let mut final_text = combined.text.clone();
        if request.ai_correction {
            let correction = self
                .corrector
                .correct(
                    &combined.text,
                    &language,
                    request.context.as_deref(),
                    request.correction_timeout,
                )
                .await;
            if let Some(text) = correction.text() {
                final_text = text.to_string();
            }
            response.ai_correction = Some(correction);
        }

        response.success = true;
        response.combined_result = Some(combined);
        response.final_text = Some(final_text);
        response.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    /// Pick the adapters for this request, in request order without duplicates.
    fn resolve_engines(&self, request: &PipelineRequest) -> Result<Vec<Arc<dyn OcrEngine>>, ConfigurationError> {
        if request.document.kind == DocumentKind::Text {
            if !request.engines.is_empty() {
                debug!("Pipeline: text transcript submitted, ignoring requested engines");
            }
            let confidence = request
                .confidence
                .unwrap_or(self.defaults.external_confidence);
            let engine = ExternalTranscript::new(request.external_engine.as_deref(), confidence);
            return Ok(vec![Arc::new(engine) as Arc<dyn OcrEngine>]);
        }

        let mut names: Vec<&str> = Vec::new();
        for name in request.engines.iter().map(|e| e.trim()) {
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Err(ConfigurationError::NoEngines);
        }

        names
            .into_iter()
            .map(|name| {
                if name == EXTERNAL_ENGINE_ID {
                    return Err(ConfigurationError::TranscriptRequired {
                        engine: name.to_string(),
                        filename: request.document.filename.clone(),
                    });
                }
                self.registry
                    .get(name)
                    .ok_or_else(|| ConfigurationError::UnknownEngine {
                        name: name.to_string(),
                        available: self.registry.available(),
                    })
            })
            .collect()
    }
}

/// Accepts Tesseract-style tags such as `eng`, `chi_sim`, `eng+ara`, or `mixed`.
pub fn validate_language(tag: &str) -> Result<(), ConfigurationError> {
    let valid = !tag.is_empty()
        && tag.split('+').all(|part| {
            !part.is_empty()
                && part.len() <= 16
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidLanguage(tag.to_string()))
    }
}

fn aggregate_error(results: &EngineResults) -> String {
    let details = results
        .iter()
        .filter_map(|r| r.error().map(|e| format!("{}: {}", r.engine_name, e)))
        .collect::<Vec<_>>()
        .join("; ");
    format!("All OCR engines failed ({})", details)
}
