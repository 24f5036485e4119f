//! Service configuration.
//!
//! Read once at startup from the environment (a `.env` file is loaded first by
//! `main`). Credentials are optional: a missing key simply leaves the engine or
//! correction backend it gates unavailable.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CORRECTION_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_CORRECTION_MODEL: &str = "openai/gpt-4o-mini";

/// Resolved configuration for the whole process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    pub tesseract: TesseractConfig,
    pub docling_url: Option<String>,
    pub mistral_api_key: Option<String>,
    pub correction: CorrectionConfig,
    pub engine_timeout: Duration,
    pub default_language: String,
    pub external_default_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub command: String,
    pub pdftoppm_command: String,
    pub dpi: u32,
    /// Parent of per-request scratch directories. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// API key for the chat-completions endpoint. `None` disables AI correction.
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl ServiceConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_upload_mb: usize = parse_or(&get, "MAX_UPLOAD_MB", 50)?;
        let correction_timeout = parse_timeout(&get, "CORRECTION_TIMEOUT_SECS", 60)?;
        let engine_timeout = parse_timeout(&get, "ENGINE_TIMEOUT_SECS", 300)?;
        let external_default_confidence: f64 =
            parse_or(&get, "EXTERNAL_DEFAULT_CONFIDENCE", 85.0)?;

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            tesseract: TesseractConfig {
                command: get("TESSERACT_CMD").unwrap_or_else(|| "tesseract".to_string()),
                pdftoppm_command: get("PDFTOPPM_CMD").unwrap_or_else(|| "pdftoppm".to_string()),
                dpi: parse_or(&get, "TESSERACT_DPI", 300)?,
                scratch_dir: get("OCR_SCRATCH_DIR").map(PathBuf::from),
            },
            docling_url: get("DOCLING_URL"),
            mistral_api_key: get("MISTRAL_API_KEY"),
            correction: CorrectionConfig {
                api_key: get("OPENROUTER_API_KEY"),
                api_url: get("CORRECTION_API_URL")
                    .unwrap_or_else(|| DEFAULT_CORRECTION_API_URL.to_string()),
                model: get("CORRECTION_MODEL")
                    .unwrap_or_else(|| DEFAULT_CORRECTION_MODEL.to_string()),
                timeout: correction_timeout,
            },
            engine_timeout,
            default_language: get("DEFAULT_LANGUAGE").unwrap_or_else(|| "eng+ara".to_string()),
            external_default_confidence,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_timeout<G>(get: &G, key: &str, default_secs: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, key, default_secs)?;
    if secs == 0 {
        anyhow::bail!("Invalid value for {}: timeout must be at least 1 second", key);
    }
    Ok(Duration::from_secs(secs))
}
