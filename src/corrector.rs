//! AI correction of OCR text.
//!
//! The [`Corrector`] wraps an optional [`CorrectionBackend`] (an LLM). It
//! builds the prompt, enforces the timeout, normalizes confidence and makes
//! sure the reported change list is consistent with the rewritten text. Every
//! failure is folded into the returned result; nothing propagates.

use crate::diff::{apply_changes, diff_changes, CorrectionChange};
use crate::error::CorrectionError;
use crate::ocr::clamp_confidence;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CORRECTION_SYSTEM_PROMPT: &str = "You are an expert text corrector specializing in fixing OCR errors in Arabic and English texts. You maintain the original meaning while fixing spelling, grammar, and OCR-specific errors.";

const SUGGESTION_SYSTEM_PROMPT: &str = "You are a text quality analyst. Provide specific, actionable suggestions for text improvement.";

// ============================================================================
// Backend contract
// ============================================================================

/// Messages sent to the correction backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionPrompt {
    pub system: String,
    pub user: String,
}

/// An edit as reported by the backend, without position information.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportedChange {
    pub original: String,
    pub corrected: String,
}

/// Raw backend reply to a correction prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendCorrection {
    pub corrected_text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub changes: Option<Vec<ReportedChange>>,
}

/// A proposed edit that is not applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub original: String,
    pub suggestion: String,
    #[serde(default)]
    pub reason: String,
}

/// An AI service that can rewrite OCR text and propose edits.
#[async_trait::async_trait]
pub trait CorrectionBackend: Send + Sync {
    /// Model identifier reported as `model_used`.
    fn model(&self) -> &str;

    async fn correct(&self, prompt: &CorrectionPrompt) -> anyhow::Result<BackendCorrection>;

    async fn suggest(&self, prompt: &CorrectionPrompt) -> anyhow::Result<Vec<Suggestion>>;
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectedResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(flatten)]
    pub outcome: CorrectionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CorrectionOutcome {
    Success {
        text: String,
        confidence: f64,
        changes: Vec<CorrectionChange>,
    },
    Failed {
        error: String,
    },
    Skipped {
        reason: String,
    },
}

impl CorrectedResult {
    fn failed(model_used: Option<String>, error: &CorrectionError) -> Self {
        Self {
            model_used,
            outcome: CorrectionOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            model_used: None,
            outcome: CorrectionOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// Corrected text, only when the correction succeeded.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            CorrectionOutcome::Success { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn changes(&self) -> &[CorrectionChange] {
        match &self.outcome {
            CorrectionOutcome::Success { changes, .. } => changes,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(flatten)]
    pub outcome: SuggestionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SuggestionOutcome {
    Success { suggestions: Vec<Suggestion> },
    Failed { error: String },
    Skipped { reason: String },
}

// ============================================================================
// Corrector
// ============================================================================

/// Process-wide corrector. Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct Corrector {
    backend: Option<Arc<dyn CorrectionBackend>>,
    timeout: Duration,
}

impl Corrector {
    pub fn new(backend: Option<Arc<dyn CorrectionBackend>>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// A corrector with no backend; every call is skipped.
    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Correct `text`. `timeout` overrides the configured default.
    pub async fn correct(
        &self,
        text: &str,
        language: &str,
        context: Option<&str>,
        timeout: Option<Duration>,
    ) -> CorrectedResult {
        let Some(backend) = &self.backend else {
            return CorrectedResult::skipped(CorrectionError::Unavailable.to_string());
        };
        let model = Some(backend.model().to_string());

        if text.trim().is_empty() {
            return CorrectedResult {
                model_used: model,
                outcome: CorrectionOutcome::Success {
                    text: text.to_string(),
                    confidence: 100.0,
                    changes: Vec::new(),
                },
            };
        }

        let prompt = build_correction_prompt(text, language, context);
        let timeout = timeout.unwrap_or(self.timeout);

        info!(
            "Corrector: sending {} chars to {} (timeout {:?})",
            text.len(),
            backend.model(),
            timeout
        );

        match self.run_correction(backend.as_ref(), &prompt, text, timeout).await {
            Ok((corrected, confidence, changes)) => {
                info!(
                    "Corrector: {} changes, confidence {:.1}",
                    changes.len(),
                    confidence
                );
                CorrectedResult {
                    model_used: model,
                    outcome: CorrectionOutcome::Success {
                        text: corrected,
                        confidence,
                        changes,
                    },
                }
            }
            Err(e) => {
                warn!("Corrector: correction failed: {}", e);
                CorrectedResult::failed(model, &e)
            }
        }
    }

    async fn run_correction(
        &self,
        backend: &dyn CorrectionBackend,
        prompt: &CorrectionPrompt,
        input: &str,
        timeout: Duration,
    ) -> Result<(String, f64, Vec<CorrectionChange>), CorrectionError> {
        let reply = tokio::time::timeout(timeout, backend.correct(prompt))
            .await
            .map_err(|_| CorrectionError::Timeout(timeout))??;

        let confidence = reply.confidence.ok_or(CorrectionError::MissingConfidence)?;
        let corrected = reply.corrected_text;
        if corrected.trim().is_empty() {
            return Err(CorrectionError::EmptyResponse);
        }

        let changes = resolve_changes(input, &corrected, reply.changes);
        Ok((corrected, clamp_confidence(confidence), changes))
    }

    /// Propose edits for `text` without rewriting it.
    pub async fn suggest(
        &self,
        text: &str,
        language: &str,
        timeout: Option<Duration>,
    ) -> SuggestionResult {
        let Some(backend) = &self.backend else {
            return SuggestionResult {
                model_used: None,
                outcome: SuggestionOutcome::Skipped {
                    reason: CorrectionError::Unavailable.to_string(),
                },
            };
        };
        let model = Some(backend.model().to_string());

        if text.trim().is_empty() {
            return SuggestionResult {
                model_used: model,
                outcome: SuggestionOutcome::Success {
                    suggestions: Vec::new(),
                },
            };
        }

        let prompt = build_suggestion_prompt(text, language);
        let timeout = timeout.unwrap_or(self.timeout);

        let outcome = match tokio::time::timeout(timeout, backend.suggest(&prompt)).await {
            Ok(Ok(suggestions)) => {
                info!("Corrector: {} suggestions", suggestions.len());
                SuggestionOutcome::Success { suggestions }
            }
            Ok(Err(e)) => {
                let e = CorrectionError::Backend(e);
                warn!("Corrector: suggestion failed: {}", e);
                SuggestionOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => SuggestionOutcome::Failed {
                error: CorrectionError::Timeout(timeout).to_string(),
            },
        };

        SuggestionResult {
            model_used: model,
            outcome,
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn is_arabic(language: &str) -> bool {
    let lower = language.to_lowercase();
    lower.split('+').any(|l| l == "ara") || lower.contains("arabic")
}

pub fn build_correction_prompt(text: &str, language: &str, context: Option<&str>) -> CorrectionPrompt {
    let mut user = format!(
        r#"Please correct the following OCR-extracted text. Fix spelling errors, grammar mistakes, and typical OCR errors while preserving the original meaning and structure.

Text to correct:
{}

Instructions:
- Fix obvious OCR errors (like 'rn' instead of 'm', '0' instead of 'O', etc.)
- Correct spelling and grammar mistakes
- Maintain the original language and meaning
- Keep the same paragraph structure
- If the text contains both Arabic and English, preserve both languages"#,
        text
    );

    if is_arabic(language) {
        user.push_str(
            r#"
- Pay special attention to Arabic text direction (RTL)
- Fix common Arabic OCR errors (ة/ه, ي/ى, همزة forms)
- Correct Arabic diacritics if clearly wrong"#,
        );
    }

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        user.push_str(&format!("\n- Context: {}", context));
    }

    user.push_str(
        r#"

Respond with JSON only:
{
  "corrected_text": "the full corrected text",
  "confidence": 0-100 (your confidence in the correction),
  "changes": [{"original": "text before", "corrected": "text after"}]
}
List changes in the order they appear in the text. If nothing needs fixing, return the text unchanged with an empty changes list."#,
    );

    CorrectionPrompt {
        system: CORRECTION_SYSTEM_PROMPT.to_string(),
        user,
    }
}

pub fn build_suggestion_prompt(text: &str, language: &str) -> CorrectionPrompt {
    let mut user = format!(
        r#"Analyze the following text and suggest specific improvements for clarity, grammar, and style. Focus on:
1. Grammar and syntax errors
2. Word choice improvements
3. Sentence structure enhancements
4. OCR-related errors that might have been missed

Text to analyze:
{}"#,
        text
    );

    if is_arabic(language) {
        user.push_str("\n\nThe text may contain Arabic; keep suggestions in the language of the original passage.");
    }

    user.push_str(
        r#"

Respond with JSON only:
{"suggestions": [{"original": "exact passage", "suggestion": "improved passage", "reason": "why"}]}"#,
    );

    CorrectionPrompt {
        system: SUGGESTION_SYSTEM_PROMPT.to_string(),
        user,
    }
}

// ============================================================================
// Change resolution
// ============================================================================

/// Decide which change list to report for `input` → `corrected`.
///
/// Backend-reported edits are kept only if they can be located in `input` in
/// order, without overlap, and replaying them yields exactly `corrected`.
/// Otherwise the list is computed with a span-level diff.
pub fn resolve_changes(
    input: &str,
    corrected: &str,
    reported: Option<Vec<ReportedChange>>,
) -> Vec<CorrectionChange> {
    if input == corrected {
        return Vec::new();
    }

    if let Some(reported) = reported.filter(|r| !r.is_empty()) {
        match locate_reported(input, &reported) {
            Some(located) if apply_changes(input, &located).as_deref() == Some(corrected) => {
                debug!("Corrector: using {} backend-reported changes", located.len());
                return located;
            }
            _ => debug!("Corrector: backend-reported changes inconsistent, diffing instead"),
        }
    }

    diff_changes(input, corrected)
}

fn locate_reported(input: &str, reported: &[ReportedChange]) -> Option<Vec<CorrectionChange>> {
    let mut cursor = 0;
    let mut located = Vec::with_capacity(reported.len());
    for change in reported {
        if change.original.is_empty() || change.original == change.corrected {
            return None;
        }
        let offset = cursor + input.get(cursor..)?.find(&change.original)?;
        cursor = offset + change.original.len();
        located.push(CorrectionChange {
            original: change.original.clone(),
            corrected: change.corrected.clone(),
            offset,
        });
    }
    Some(located)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn reported(pairs: &[(&str, &str)]) -> Vec<ReportedChange> {
        pairs
            .iter()
            .map(|(o, c)| ReportedChange {
                original: o.to_string(),
                corrected: c.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_prompt_includes_arabic_guidance_and_context() {
        let prompt = build_correction_prompt("نص", "eng+ara", Some("  invoice from Dubai "));
        assert!(prompt.user.contains("Text to correct:\nنص\n"));
        assert!(prompt.user.contains("Arabic text direction (RTL)"));
        assert!(prompt.user.contains("- Context: invoice from Dubai"));
        assert!(prompt.user.contains("\"corrected_text\""));
        assert_eq!(prompt.system, CORRECTION_SYSTEM_PROMPT);
    }

    #[test]
    fn test_prompt_omits_arabic_guidance_and_blank_context() {
        let prompt = build_correction_prompt("text", "eng", Some("   "));
        assert!(!prompt.user.contains("RTL"));
        assert!(!prompt.user.contains("Context:"));
    }

    #[test]
    fn test_is_arabic() {
        assert!(is_arabic("ara"));
        assert!(is_arabic("eng+ara"));
        assert!(is_arabic("Arabic"));
        assert!(!is_arabic("eng"));
        assert!(!is_arabic("mixed"));
    }

    #[test]
    fn test_resolve_uses_consistent_reported_changes() {
        let changes = resolve_changes(
            "Tbe qnick fox",
            "The quick fox",
            Some(reported(&[("Tbe", "The"), ("qnick", "quick")])),
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].offset, 0);
        assert_eq!(changes[1].offset, 4);
    }

    #[test]
    fn test_resolve_falls_back_to_diff_on_inconsistent_report() {
        // Reported out of order, and missing an edit.
        let changes = resolve_changes(
            "Tbe qnick fox",
            "The quick fox",
            Some(reported(&[("qnick", "quick")])),
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].original, "Tbe");

        let changes = resolve_changes(
            "Tbe qnick fox",
            "The quick fox",
            Some(reported(&[("qnick", "quick"), ("Tbe", "The")])),
        );
        assert_eq!(changes[0].original, "Tbe");
        assert_eq!(changes[1].original, "qnick");
    }

    #[test]
    fn test_resolve_ignores_report_when_text_unchanged() {
        let changes = resolve_changes("same", "same", Some(reported(&[("same", "other")])));
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_successful_correction_reports_diff() {
        let (corrector, backend) = corrector(FakeBackend::replying("The quick fox", Some(88.0)));
        let result = corrector.correct("Tbe qnick fox", "eng", None, None).await;
        assert_eq!(result.model_used.as_deref(), Some("fake-model"));
        match &result.outcome {
            CorrectionOutcome::Success {
                text,
                confidence,
                changes,
            } => {
                assert_eq!(text, "The quick fox");
                assert_eq!(*confidence, 88.0);
                assert_eq!(changes.len(), 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_correction_of_clean_text_is_idempotent() {
        let (corrector, _) = corrector(FakeBackend::echo());
        let first = corrector.correct("All good here.", "eng", None, None).await;
        let second = corrector
            .correct(first.text().unwrap(), "eng", None, None)
            .await;
        assert!(first.changes().is_empty());
        assert!(second.changes().is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let (corrector, _) = corrector(FakeBackend::replying("fixed", Some(250.0)));
        let result = corrector.correct("fxied", "eng", None, None).await;
        match result.outcome {
            CorrectionOutcome::Success { confidence, .. } => assert_eq!(confidence, 100.0),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_confidence_fails() {
        let (corrector, _) = corrector(FakeBackend::replying("fixed", None));
        let result = corrector.correct("fxied", "eng", None, None).await;
        match result.outcome {
            CorrectionOutcome::Failed { error } => assert!(error.contains("no confidence")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_error_degrades_to_failed() {
        let (corrector, _) = corrector(FakeBackend::failing("502 bad gateway"));
        let result = corrector.correct("text", "eng", None, None).await;
        assert_eq!(result.model_used.as_deref(), Some("fake-model"));
        match result.outcome {
            CorrectionOutcome::Failed { error } => assert!(error.contains("502 bad gateway")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_failed() {
        let (corrector, _) = corrector(
            FakeBackend::replying("late", Some(90.0)).with_delay(Duration::from_secs(10)),
        );
        let result = corrector
            .correct("text", "eng", None, Some(Duration::from_millis(20)))
            .await;
        match result.outcome {
            CorrectionOutcome::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_input_skips_backend() {
        let (corrector, backend) = corrector(FakeBackend::replying("x", Some(10.0)));
        let result = corrector.correct("   ", "eng", None, None).await;
        assert_eq!(result.text(), Some("   "));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_skipped() {
        let result = Corrector::disabled().correct("text", "eng", None, None).await;
        assert!(matches!(result.outcome, CorrectionOutcome::Skipped { .. }));
        assert!(result.model_used.is_none());
    }

    #[tokio::test]
    async fn test_context_reaches_backend() {
        let (corrector, backend) = corrector(FakeBackend::replying("ok", Some(90.0)));
        corrector.correct("0k", "eng", Some("medical report"), None).await;
        let prompt = backend.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.user.contains("Context: medical report"));
    }

    #[tokio::test]
    async fn test_suggestions() {
        let mut fake = FakeBackend::replying("", Some(90.0));
        fake.suggestions = vec![Suggestion {
            original: "teh".into(),
            suggestion: "the".into(),
            reason: "spelling".into(),
        }];
        let (corrector, _) = corrector(fake);
        let result = corrector.suggest("teh cat", "eng", None).await;
        match result.outcome {
            SuggestionOutcome::Success { suggestions } => {
                assert_eq!(suggestions.len(), 1);
                assert_eq!(suggestions[0].suggestion, "the");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let disabled = Corrector::disabled().suggest("teh cat", "eng", None).await;
        assert!(matches!(disabled.outcome, SuggestionOutcome::Skipped { .. }));
    }
}
