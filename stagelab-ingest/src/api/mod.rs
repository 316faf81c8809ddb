//! HTTP API handlers for stagelab-ingest
//!
//! REST endpoints drive one [`IngestPipeline`](crate::workflow::IngestPipeline)
//! per session; `/events` streams pipeline events over SSE.

pub mod health;
pub mod sessions;
pub mod sse;

pub use health::health_routes;
pub use sessions::session_routes;
pub use sse::event_stream;
