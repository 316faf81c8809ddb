//! Item and session status values
//!
//! The observable item statuses are exactly
//! `pending | uploading | uploaded | analyzing | complete | error | saved`.
//!
//! **Item state machine:**
//! ```text
//! pending → uploading → uploaded → analyzing → complete → saved
//!               ↘ error              ↘ error
//!                          uploaded ← analyzing   (dispatch rejected)
//! ```
//! Any realized status sequence is a subsequence of
//! `pending, uploading, {uploaded|error}, analyzing, {complete|error}, saved`,
//! with the single back-edge `analyzing → uploaded`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Lifecycle status of one ingested image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Registered, waiting for upload
    Pending,
    /// Transfer in flight
    Uploading,
    /// Object stored, waiting for analysis
    Uploaded,
    /// Remote classification job running
    Analyzing,
    /// Classification result available
    Complete,
    /// Upload or analysis failed
    Error,
    /// Committed to persistent log records
    Saved,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 7] = [
        ItemStatus::Pending,
        ItemStatus::Uploading,
        ItemStatus::Uploaded,
        ItemStatus::Analyzing,
        ItemStatus::Complete,
        ItemStatus::Error,
        ItemStatus::Saved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Uploaded => "uploaded",
            ItemStatus::Analyzing => "analyzing",
            ItemStatus::Complete => "complete",
            ItemStatus::Error => "error",
            ItemStatus::Saved => "saved",
        }
    }

    /// Position along the forward pipeline. `Error` has no fixed rank.
    fn rank(&self) -> Option<u8> {
        match self {
            ItemStatus::Pending => Some(0),
            ItemStatus::Uploading => Some(1),
            ItemStatus::Uploaded => Some(2),
            ItemStatus::Analyzing => Some(3),
            ItemStatus::Complete => Some(4),
            ItemStatus::Saved => Some(5),
            ItemStatus::Error => None,
        }
    }

    /// Whether `self → next` is a legal forward move (the dispatch revert excluded)
    pub fn can_advance_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (*self, next) {
            (Error, _) | (Saved, _) => false,
            (_, Saved) => *self == Complete,
            (from, Error) => matches!(from, Uploading | Uploaded | Analyzing),
            (Complete, _) => false,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    /// The explicit revert used when analysis dispatch is rejected
    pub fn is_dispatch_revert(&self, next: ItemStatus) -> bool {
        *self == ItemStatus::Analyzing && next == ItemStatus::Uploaded
    }

    /// Statuses that keep the reconciliation poller running
    pub fn is_awaiting_analysis(&self) -> bool {
        matches!(self, ItemStatus::Uploaded | ItemStatus::Analyzing)
    }

    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Error | ItemStatus::Saved)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("Unknown item status: {}", s)))
    }
}

/// Lifecycle status of an ingestion session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(Error::InvalidInput(format!("Unknown session status: {}", other))),
        }
    }
}
