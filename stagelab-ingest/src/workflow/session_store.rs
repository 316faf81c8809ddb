//! Session store
//!
//! One active ingestion session per (collection, owner): the most recent
//! pending session is resumed, otherwise a new one is created.

use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::Session;
use crate::types::PersistenceService;

/// Result of [`ensure_session`]
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: Session,
    /// True when an existing pending session was picked up
    pub resumed: bool,
}

/// Resume the caller's pending session for a collection or create one
///
/// Failure is reported as [`PipelineError::Session`], a retryable alert. A
/// failed lookup is not followed by a create, so a flaky read never produces
/// duplicate pending sessions.
pub async fn ensure_session(
    persistence: &dyn PersistenceService,
    collection_id: Uuid,
    owner_id: Uuid,
) -> Result<SessionOutcome, PipelineError> {
    let existing = persistence
        .fetch_pending_session(collection_id, owner_id)
        .await
        .map_err(|e| PipelineError::Session(format!("Pending session lookup failed: {}", e)))?;

    if let Some(session) = existing.filter(Session::is_pending) {
        tracing::info!(
            session_id = %session.id,
            collection_id = %collection_id,
            "Resuming pending ingestion session"
        );
        return Ok(SessionOutcome {
            session,
            resumed: true,
        });
    }

    let session = persistence
        .create_session(collection_id, owner_id)
        .await
        .map_err(|e| PipelineError::Session(format!("Session creation failed: {}", e)))?;

    tracing::info!(
        session_id = %session.id,
        collection_id = %collection_id,
        "Created ingestion session"
    );

    Ok(SessionOutcome {
        session,
        resumed: false,
    })
}
