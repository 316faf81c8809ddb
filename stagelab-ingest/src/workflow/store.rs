//! Local item store
//!
//! A reconciled cache of the server's authoritative item records for one
//! session. Status changes go through [`ItemStore::transition`] (forward moves)
//! or [`ItemStore::revert_dispatch`] (the single back-edge); both emit
//! `ItemStatusChanged` on the event bus.

use chrono::Utc;
use stagelab_common::events::{EventBus, IngestEvent};
use stagelab_common::ItemStatus;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Item, Session, StatusCounts};

/// Store shared between the pipeline and its background tasks
pub type SharedStore = Arc<RwLock<ItemStore>>;

/// Items of one session, in ingestion order
pub struct ItemStore {
    session: Session,
    items: Vec<Item>,
    events: EventBus,
}

impl ItemStore {
    pub fn new(session: Session, events: EventBus) -> Self {
        Self {
            session,
            items: Vec::new(),
            events,
        }
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, local_id: Uuid) -> Option<&Item> {
        self.items.iter().find(|item| item.local_id == local_id)
    }

    /// Mutable access for non-status fields
    pub(crate) fn get_mut(&mut self, local_id: Uuid) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.local_id == local_id)
    }

    pub fn find_by_remote(&self, remote_id: Uuid) -> Option<&Item> {
        self.items.iter().find(|item| item.remote_id == Some(remote_id))
    }

    pub fn insert(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Local ids of all items currently in `status`, in ingestion order
    pub fn ids_with_status(&self, status: ItemStatus) -> Vec<Uuid> {
        self.items
            .iter()
            .filter(|item| item.status() == status)
            .map(|item| item.local_id)
            .collect()
    }

    /// True while any item is `uploaded` or `analyzing`
    pub fn has_awaiting_analysis(&self) -> bool {
        self.items.iter().any(|item| item.status().is_awaiting_analysis())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for item in &self.items {
            counts.record(item.status());
        }
        counts
    }

    /// Move an item forward along the status state machine
    ///
    /// Returns the previous status. A move to the current status is rejected
    /// like any other illegal edge.
    pub fn transition(
        &mut self,
        local_id: Uuid,
        next: ItemStatus,
    ) -> Result<ItemStatus, PipelineError> {
        let item = self
            .get_mut(local_id)
            .ok_or(PipelineError::ItemNotFound(local_id))?;
        let previous = item.status();

        if !previous.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                local_id,
                from: previous,
                to: next,
            });
        }

        item.set_status(next);
        let remote_id = item.remote_id;
        self.emit_status_change(local_id, remote_id, previous, next);
        Ok(previous)
    }

    /// Undo an optimistic `analyzing` flip after the dispatcher rejected the job
    pub fn revert_dispatch(&mut self, local_id: Uuid) -> Result<(), PipelineError> {
        let item = self
            .get_mut(local_id)
            .ok_or(PipelineError::ItemNotFound(local_id))?;
        let previous = item.status();

        if !previous.is_dispatch_revert(ItemStatus::Uploaded) {
            return Err(PipelineError::InvalidTransition {
                local_id,
                from: previous,
                to: ItemStatus::Uploaded,
            });
        }

        item.set_status(ItemStatus::Uploaded);
        let remote_id = item.remote_id;
        self.emit_status_change(local_id, remote_id, previous, ItemStatus::Uploaded);
        Ok(())
    }

    /// Assign the durable remote id; immutable once set
    pub fn set_remote_id(&mut self, local_id: Uuid, remote_id: Uuid) -> Result<(), PipelineError> {
        let item = self
            .get_mut(local_id)
            .ok_or(PipelineError::ItemNotFound(local_id))?;

        match item.remote_id {
            Some(existing) if existing == remote_id => Ok(()),
            Some(existing) => Err(PipelineError::RemoteIdConflict { local_id, existing }),
            None => {
                item.remote_id = Some(remote_id);
                Ok(())
            }
        }
    }

    /// User edit of the subject fields
    ///
    /// A typed name is remembered so resolver guesses never overwrite it.
    pub fn set_subject(
        &mut self,
        local_id: Uuid,
        assigned_subject_id: Option<Uuid>,
        new_subject_name: Option<String>,
    ) -> Result<(), PipelineError> {
        let item = self
            .get_mut(local_id)
            .ok_or(PipelineError::ItemNotFound(local_id))?;

        if assigned_subject_id.is_some() {
            item.assigned_subject_id = assigned_subject_id;
        }
        if let Some(name) = new_subject_name {
            let name = name.trim().to_string();
            item.new_subject_name = (!name.is_empty()).then_some(name);
            item.subject_name_user_set = true;
        }
        Ok(())
    }

    /// Drop all items (session discarded)
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn emit_status_change(
        &self,
        local_id: Uuid,
        remote_id: Option<Uuid>,
        old_status: ItemStatus,
        new_status: ItemStatus,
    ) {
        tracing::debug!(
            session_id = %self.session.id,
            local_id = %local_id,
            old_status = %old_status,
            new_status = %new_status,
            "Item status changed"
        );

        self.events.emit_lossy(IngestEvent::ItemStatusChanged {
            session_id: self.session.id,
            local_id,
            remote_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
        });
    }
}
