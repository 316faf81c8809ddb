//! Filename assist client
//!
//! `POST {base}/parse-filenames` with `{filenames: [...]}` answers
//! `{results: [...]}`, one entry per filename in request order. Stage guesses
//! are free text and go through the same vocabulary parser as local guesses;
//! confidences are clamped to 0..=1.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagelab_common::Result;

use super::ServiceClient;
use crate::models::{ParsedFilenameInfo, Stage};
use crate::types::FilenameAssist;

#[derive(Serialize)]
struct ParseRequest<'a> {
    filenames: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    results: Vec<WireGuess>,
}

#[derive(Debug, Deserialize)]
struct WireGuess {
    #[serde(default)]
    subject_id_guess: Option<String>,
    #[serde(default)]
    ground_truth_stage_guess: Option<String>,
    #[serde(default)]
    date_guess: Option<String>,
    #[serde(default)]
    confidence: f32,
}

impl From<WireGuess> for ParsedFilenameInfo {
    fn from(wire: WireGuess) -> Self {
        let confidence = if wire.confidence.is_finite() {
            wire.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ParsedFilenameInfo {
            subject_id_guess: wire
                .subject_id_guess
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            ground_truth_stage_guess: wire.ground_truth_stage_guess.as_deref().and_then(Stage::parse),
            date_guess: wire.date_guess,
            confidence,
        }
    }
}

pub struct AssistClient {
    client: ServiceClient,
}

impl AssistClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FilenameAssist for AssistClient {
    async fn parse(&self, filenames: &[String]) -> Result<Vec<ParsedFilenameInfo>> {
        let request = self
            .client
            .post("parse-filenames")?
            .json(&ParseRequest { filenames });
        let response: ParseResponse = self.client.send_json(request).await?;

        tracing::debug!(requested = filenames.len(), returned = response.results.len(), "Filename assist answered");
        Ok(response.results.into_iter().map(ParsedFilenameInfo::from).collect())
    }
}
