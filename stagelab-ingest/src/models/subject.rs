//! Subjects and the persistent log records written at commit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Individual entity (e.g. an animal) a classified image is attributed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub name: String,
}

/// One persistent stage log, built from a committed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogRecord {
    pub collection_id: Uuid,
    pub subject_id: Uuid,
    pub session_id: Option<Uuid>,
    /// Remote item the log was derived from
    pub item_id: Option<Uuid>,
    pub stage: String,
    pub confidence: f64,
    pub features: BTreeMap<String, String>,
    pub reasoning: String,
    /// Raw per-stage confidence map and internal notes
    pub payload: serde_json::Value,
    pub image_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
