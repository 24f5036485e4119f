//! Picks one engine's output as the authoritative text.
//!
//! Text is never merged across engines: the combined result is always a
//! verbatim copy of a single successful engine result.

use crate::error::ConfigurationError;
use crate::ocr::{EngineResult, EngineResults};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMethod {
    #[default]
    BestConfidence,
    LongestText,
}

impl FromStr for CombinationMethod {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "best_confidence" => Ok(Self::BestConfidence),
            "longest_text" => Ok(Self::LongestText),
            other => Err(ConfigurationError::UnknownCombinationMethod(other.to_string())),
        }
    }
}

impl fmt::Display for CombinationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BestConfidence => "best_confidence",
            Self::LongestText => "longest_text",
        })
    }
}

/// The pipeline's best answer before correction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedResult {
    pub text: String,
    pub confidence: f64,
    pub source_engine: String,
    pub method: CombinationMethod,
    /// Every engine that succeeded, in request order.
    pub engines_used: Vec<String>,
}

/// Select one successful result under `method`. Ties go to the engine
/// requested first. Returns `None` when no engine succeeded.
pub fn combine(results: &EngineResults, method: CombinationMethod) -> Option<CombinedResult> {
    let score = |r: &EngineResult| -> f64 {
        match method {
            CombinationMethod::BestConfidence => r.confidence().unwrap_or(0.0),
            CombinationMethod::LongestText => {
                r.text().map(|t| t.chars().count()).unwrap_or(0) as f64
            }
        }
    };

    let mut best: Option<(&EngineResult, f64)> = None;
    for candidate in results.successful() {
        let candidate_score = score(candidate);
        match best {
            Some((_, best_score)) if candidate_score <= best_score => {}
            _ => best = Some((candidate, candidate_score)),
        }
    }

    let (chosen, _) = best?;
    Some(CombinedResult {
        text: chosen.text().unwrap_or_default().to_string(),
        confidence: chosen.confidence().unwrap_or(0.0),
        source_engine: chosen.engine_name.clone(),
        method,
        engines_used: results
            .successful()
            .map(|r| r.engine_name.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(name: &str, text: &str, confidence: f64) -> EngineResult {
        EngineResult::success(name, "eng", text.to_string(), confidence)
    }

    fn failed(name: &str) -> EngineResult {
        EngineResult::failed(name, "eng", "crashed")
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(
            "best_confidence".parse::<CombinationMethod>().unwrap(),
            CombinationMethod::BestConfidence
        );
        assert_eq!(
            "longest_text".parse::<CombinationMethod>().unwrap(),
            CombinationMethod::LongestText
        );
        assert!("majority_vote".parse::<CombinationMethod>().is_err());
    }

    #[test]
    fn test_best_confidence_tie_goes_to_first_requested() {
        let results: EngineResults = vec![
            ok("A", "alpha", 70.0),
            ok("B", "bravo", 95.0),
            ok("C", "charlie", 95.0),
        ]
        .into_iter()
        .collect();
        let combined = combine(&results, CombinationMethod::BestConfidence).unwrap();
        assert_eq!(combined.source_engine, "B");
        assert_eq!(combined.text, "bravo");
        assert_eq!(combined.confidence, 95.0);
        assert_eq!(combined.engines_used, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_longest_text_counts_characters() {
        let results: EngineResults = vec![
            ok("A", &"a".repeat(10), 99.0),
            ok("B", &"b".repeat(25), 10.0),
            ok("C", &"c".repeat(25), 50.0),
        ]
        .into_iter()
        .collect();
        let combined = combine(&results, CombinationMethod::LongestText).unwrap();
        assert_eq!(combined.source_engine, "B");
        assert_eq!(combined.confidence, 10.0);
    }

    #[test]
    fn test_longest_text_uses_chars_not_bytes() {
        // 5 Arabic letters are 10 bytes but only 5 characters.
        let results: EngineResults = vec![ok("A", "سلامم", 50.0), ok("B", "hello!", 50.0)]
            .into_iter()
            .collect();
        let combined = combine(&results, CombinationMethod::LongestText).unwrap();
        assert_eq!(combined.source_engine, "B");
    }

    #[test]
    fn test_failed_results_are_ignored() {
        let results: EngineResults = vec![failed("A"), ok("B", "only one", 12.0)]
            .into_iter()
            .collect();
        for method in [CombinationMethod::BestConfidence, CombinationMethod::LongestText] {
            let combined = combine(&results, method).unwrap();
            assert_eq!(combined.source_engine, "B");
            assert_eq!(combined.engines_used, vec!["B"]);
        }
    }

    #[test]
    fn test_no_success_yields_none() {
        let results: EngineResults = vec![failed("A"), failed("B")].into_iter().collect();
        assert!(combine(&results, CombinationMethod::BestConfidence).is_none());
        assert!(combine(&EngineResults::new(), CombinationMethod::LongestText).is_none());
    }

    #[test]
    fn test_empty_text_can_win() {
        let results: EngineResults = vec![ok("A", "", 40.0)].into_iter().collect();
        let combined = combine(&results, CombinationMethod::LongestText).unwrap();
        assert_eq!(combined.text, "");
    }
}
