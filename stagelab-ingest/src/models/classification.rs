//! Stage vocabulary, filename-parsing guesses and classification results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Categorical label produced by the classification service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Proestrus,
    Estrus,
    Metestrus,
    Diestrus,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Proestrus, Stage::Estrus, Stage::Metestrus, Stage::Diestrus];

    /// Capitalized display form ("Metestrus")
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Proestrus => "Proestrus",
            Stage::Estrus => "Estrus",
            Stage::Metestrus => "Metestrus",
            Stage::Diestrus => "Diestrus",
        }
    }

    /// Parse a full stage name, a recognized abbreviation, or a known misspelling
    ///
    /// Case-insensitive. Returns `None` for anything else.
    pub fn parse(token: &str) -> Option<Stage> {
        match token.trim().to_ascii_uppercase().as_str() {
            "PROESTRUS" | "PROESTTRUS" | "PRO" => Some(Stage::Proestrus),
            "ESTRUS" | "EST" => Some(Stage::Estrus),
            "METESTRUS" | "MET" => Some(Stage::Metestrus),
            "DIESTRUS" | "DI" | "DIE" => Some(Stage::Diestrus),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject/stage/date guesses derived from a filename
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFilenameInfo {
    pub subject_id_guess: Option<String>,
    pub ground_truth_stage_guess: Option<Stage>,
    pub date_guess: Option<String>,
    /// 0.0 ..= 1.0
    pub confidence: f32,
}

impl ParsedFilenameInfo {
    /// Zero-confidence result used when the assist service cannot answer
    pub fn unresolved() -> Self {
        Self {
            subject_id_guess: None,
            ground_truth_stage_guess: None,
            date_guess: None,
            confidence: 0.0,
        }
    }
}

/// Output of the remote classification job, as observed through polling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Primary stage name; empty when the model produced no prediction
    #[serde(default)]
    pub primary_stage: String,

    /// Per-stage confidence
    #[serde(default)]
    pub confidence_scores: BTreeMap<String, f64>,

    #[serde(default)]
    pub reasoning: String,

    #[serde(default)]
    pub internal_notes: String,

    /// Feature observations; only string values are carried into log records
    #[serde(default)]
    pub features: BTreeMap<String, serde_json::Value>,
}

impl ClassificationResult {
    pub fn has_prediction(&self) -> bool {
        !self.primary_stage.trim().is_empty()
    }

    /// Primary stage in canonical form when it is part of the vocabulary,
    /// otherwise the trimmed raw value
    pub fn canonical_stage(&self) -> String {
        Stage::parse(&self.primary_stage)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| self.primary_stage.trim().to_string())
    }

    /// Confidence map with stage keys canonicalized; unknown keys kept verbatim
    pub fn normalized_scores(&self) -> BTreeMap<String, f64> {
        self.confidence_scores
            .iter()
            .map(|(key, value)| {
                let key = Stage::parse(key)
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| key.clone());
                (key, *value)
            })
            .collect()
    }

    /// Confidence of the primary stage, 0.0 when absent from the map
    pub fn primary_confidence(&self) -> f64 {
        let primary = self.canonical_stage();
        self.normalized_scores()
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&primary))
            .map(|(_, value)| *value)
            .unwrap_or(0.0)
    }

    /// String-valued subset of `features`
    pub fn string_features(&self) -> BTreeMap<String, String> {
        self.features
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|s| (key.clone(), s.to_string())))
            .collect()
    }
}
