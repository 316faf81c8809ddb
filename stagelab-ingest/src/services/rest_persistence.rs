//! Remote persistence service client
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create session | `POST sessions` `{collection_id, owner_id}` |
//! | pending session | `GET sessions/pending?collection_id=&owner_id=` (404 → none) |
//! | create items | `POST sessions/{id}/items` `{items}` |
//! | update item | `PATCH items/{id}` (unset fields omitted) |
//! | list items | `GET sessions/{id}/items` |
//! | find-or-create subject | `POST collections/{id}/subjects` `{name}` |
//! | insert logs | `POST logs` `{records}` → `{inserted}` |
//! | session status | `PATCH sessions/{id}` `{status}` |

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use stagelab_common::{Error, Result, SessionStatus};
use uuid::Uuid;

use super::ServiceClient;
use crate::models::{NewLogRecord, Session, Subject};
use crate::types::{ItemUpdate, NewRemoteItem, PersistenceService, RemoteItem};

#[derive(Deserialize)]
struct InsertedCount {
    inserted: usize,
}

pub struct RestPersistence {
    client: ServiceClient,
}

impl RestPersistence {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PersistenceService for RestPersistence {
    async fn create_session(&self, collection_id: Uuid, owner_id: Uuid) -> Result<Session> {
        let request = self.client.post("sessions")?.json(&json!({
            "collection_id": collection_id,
            "owner_id": owner_id,
        }));
        self.client.send_json(request).await
    }

    async fn fetch_pending_session(
        &self,
        collection_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Session>> {
        let response = self
            .client
            .get("sessions/pending")?
            .query(&[
                ("collection_id", collection_id.to_string()),
                ("owner_id", owner_id.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::remote(self.client.service(), format!("request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(self.client.service(), format!("{} {}", status, body.trim())));
        }

        response
            .json::<Option<Session>>()
            .await
            .map_err(|e| Error::remote(self.client.service(), format!("invalid response body: {}", e)))
    }

    async fn create_items(
        &self,
        session_id: Uuid,
        items: &[NewRemoteItem],
    ) -> Result<Vec<RemoteItem>> {
        let request = self
            .client
            .post(&format!("sessions/{}/items", session_id))?
            .json(&json!({ "items": items }));
        self.client.send_json(request).await
    }

    async fn update_item(&self, item_id: Uuid, update: &ItemUpdate) -> Result<()> {
        let request = self.client.patch(&format!("items/{}", item_id))?.json(update);
        self.client.send(request).await?;
        Ok(())
    }

    async fn list_items(&self, session_id: Uuid) -> Result<Vec<RemoteItem>> {
        let request = self.client.get(&format!("sessions/{}/items", session_id))?;
        self.client.send_json(request).await
    }

    async fn find_or_create_subject(&self, collection_id: Uuid, name: &str) -> Result<Subject> {
        let request = self
            .client
            .post(&format!("collections/{}/subjects", collection_id))?
            .json(&json!({ "name": name }));
        self.client.send_json(request).await
    }

    async fn insert_logs(&self, logs: &[NewLogRecord]) -> Result<usize> {
        let request = self.client.post("logs")?.json(&json!({ "records": logs }));
        let count: InsertedCount = self.client.send_json(request).await?;
        Ok(count.inserted)
    }

    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        let request = self
            .client
            .patch(&format!("sessions/{}", session_id))?
            .json(&json!({ "status": status }));
        self.client.send(request).await?;
        Ok(())
    }
}
