//! Analysis job dispatcher client
//!
//! `POST {base}/jobs` with `{session_id}`; any 2xx means the job was accepted.

use async_trait::async_trait;
use serde_json::json;
use stagelab_common::Result;
use uuid::Uuid;

use super::ServiceClient;
use crate::types::JobDispatcher;

pub struct JobClient {
    client: ServiceClient,
}

impl JobClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobDispatcher for JobClient {
    async fn trigger(&self, session_id: Uuid) -> Result<()> {
        let request = self.client.post("jobs")?.json(&json!({ "session_id": session_id }));
        self.client.send(request).await?;
        tracing::debug!(session_id = %session_id, "Analysis job accepted");
        Ok(())
    }
}
