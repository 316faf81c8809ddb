//! Object storage client
//!
//! `POST {base}/destinations` with `{filename, content_type}` issues a
//! [`WriteDestination`]; the bytes are then `PUT` to its `write_ref`, which is
//! pre-authorized and sent without credentials.

use async_trait::async_trait;
use serde::Serialize;
use stagelab_common::{Error, Result};
use std::time::Duration;

use super::ServiceClient;
use crate::types::{ObjectStorage, WriteDestination};

#[derive(Serialize)]
struct DestinationRequest<'a> {
    filename: &'a str,
    content_type: &'a str,
    /// Requested validity window in seconds
    ttl_secs: u64,
}

pub struct StorageClient {
    client: ServiceClient,
    destination_ttl: Duration,
}

impl StorageClient {
    pub fn new(client: ServiceClient, destination_ttl: Duration) -> Self {
        Self {
            client,
            destination_ttl,
        }
    }
}

#[async_trait]
impl ObjectStorage for StorageClient {
    async fn issue_write_destination(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<WriteDestination> {
        let request = self.client.post("destinations")?.json(&DestinationRequest {
            filename,
            content_type,
            ttl_secs: self.destination_ttl.as_secs(),
        });
        let destination: WriteDestination = self.client.send_json(request).await?;

        if destination.write_ref.is_empty() || destination.read_ref.is_empty() {
            return Err(Error::remote(
                self.client.service(),
                "destination without write or read reference",
            ));
        }
        Ok(destination)
    }

    async fn write(
        &self,
        destination: &WriteDestination,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size = bytes.len();
        let request = self
            .client
            .put_absolute(&destination.write_ref)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        self.client.send(request).await?;

        tracing::debug!(read_ref = %destination.read_ref, size, "Object written");
        Ok(())
    }
}
