//! Error taxonomy for the OCR pipeline.
//!
//! Only [`ConfigurationError`] ever escapes the orchestrator. Engine and
//! correction failures are recorded as data inside the response.

use std::time::Duration;

/// Invalid request configuration. Raised before any engine runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("No OCR engines requested")]
    NoEngines,

    #[error("Unknown OCR engine: {name}. Available: {available:?}")]
    UnknownEngine {
        name: String,
        available: Vec<String>,
    },

    #[error("Invalid language tag: {0:?}")]
    InvalidLanguage(String),

    #[error("Unknown combination method: {0}. Expected best_confidence or longest_text")]
    UnknownCombinationMethod(String),

    #[error("File type not supported: {0}. Allowed types: png, jpg, jpeg, tiff, tif, pdf, txt")]
    UnsupportedFileType(String),

    #[error("Engine {engine} needs a plain-text transcript (.txt), got {filename}")]
    TranscriptRequired { engine: String, filename: String },
}

/// Why an AI correction did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("AI correction not available - no correction backend configured")]
    Unavailable,

    #[error("Correction backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("Correction backend returned no confidence score")]
    MissingConfidence,

    #[error("Correction backend returned an empty text")]
    EmptyResponse,

    #[error("Correction backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}
