//! Server-Sent Events stream of pipeline events

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use stagelab_common::events::IngestEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// GET /events query
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only events of this session (plus session-less events)
    pub session_id: Option<Uuid>,
}

impl EventFilter {
    fn accepts(&self, event: &IngestEvent) -> bool {
        match (self.session_id, event.session_id()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

/// GET /events
///
/// Streams every [`IngestEvent`] as a named SSE event with a JSON body.
/// Lagging subscribers skip the missed events and keep streaming.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(session_id = ?filter.session_id, "SSE client connected");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !filter.accepts(&event) {
                        continue;
                    }
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!(event_type, "SSE: forwarding event");
                            yield Ok(Event::default().event(event_type).data(json));
                        }
                        Err(e) => warn!(event_type, error = %e, "SSE: failed to serialize event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
