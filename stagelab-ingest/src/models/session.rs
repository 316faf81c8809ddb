//! Ingestion session
//!
//! Created on first file drop, or resumed by fetching the most recent pending
//! session for (collection, owner). Moves to `completed` only after a
//! successful commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagelab_common::SessionStatus;
use uuid::Uuid;

/// One user's ingestion run against a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub owner_id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// New pending session
    pub fn new(collection_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection_id,
            owner_id,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SessionStatus::Pending
    }
}
