//! Client side of a shared event: typed reads, participant-scoped partial
//! writes, and a live stream of decoded event states.
//!
//! Writes from different participants touch disjoint paths and never
//! conflict. Writes to the same participant key (one person in two tabs)
//! are ordered by arrival at the store and the later one silently wins;
//! there is no versioning.

mod session;
mod view;

pub use session::Session;
pub use view::{DragPaint, LocalView, SnapshotDiff, toggle_target};

use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt, future};
use thiserror::Error;

use crate::document::{Document, Fields, Patch, Value};
use crate::limits::MAX_PARTICIPANTS_PER_EVENT;
use crate::model::{
    DecodeError, EventId, EventState, NewEvent, PARTICIPANTS_FIELD, ParticipantKey,
    ValidationError, cell_patch, participant_path,
};
use crate::store::{DocumentStore, SetOptions, StoreError, Subscription};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Corrupt(#[from] DecodeError),
    #[error("session not started")]
    NotStarted,
    #[error("no participant identity, join first")]
    NotJoined,
    #[error("cell ({row}, {col}) is outside the event grid")]
    CellOutOfRange { row: usize, col: usize },
    #[error("subscription closed")]
    Closed,
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::NotFound(_)))
    }
}

/// Typed operations over any [`DocumentStore`].
pub struct SyncClient<S: DocumentStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DocumentStore + ?Sized> Clone for SyncClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore + ?Sized> SyncClient<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Mint an id and write the new event with no participants.
    pub async fn create_event(&self, event: NewEvent) -> Result<EventId, SyncError> {
        let id = EventId::generate();
        let state = EventState::new(event.into_metadata(Utc::now()));
        self.store
            .set(&id, state.to_document(), SetOptions::REPLACE)
            .await?;
        tracing::info!(event_id = %id, title = state.metadata.title(), "event created");
        Ok(id)
    }

    pub async fn fetch(&self, id: &EventId) -> Result<EventState, SyncError> {
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(EventState::from_document(&doc)?)
    }

    pub async fn subscribe(&self, id: &EventId) -> Result<EventStream, SyncError> {
        let subscription = self.store.subscribe(id).await?;
        Ok(EventStream { subscription })
    }

    /// Register `name` as a participant. Existing cells under the same
    /// normalized key are kept, so joining twice is harmless.
    pub async fn join(&self, id: &EventId, name: &str) -> Result<ParticipantKey, SyncError> {
        let key = ParticipantKey::normalize(name)?;
        let state = self.fetch(id).await?;
        check_room(state.participants.contains_key(&key), state.participants.len())?;

        let mut participants = Fields::new();
        participants.insert(key.as_str().to_string(), Value::empty_map());
        let mut doc = Document::new();
        doc.insert(PARTICIPANTS_FIELD.into(), Value::Map(participants));
        self.store.set(id, doc, SetOptions::MERGE).await?;

        tracing::debug!(event_id = %id, participant = %key, "joined");
        Ok(key)
    }

    /// Write one cell of one participant.
    pub async fn set_cell(
        &self,
        id: &EventId,
        key: &ParticipantKey,
        row: usize,
        col: usize,
        value: bool,
    ) -> Result<(), SyncError> {
        self.admit(id, key).await?;
        self.store
            .update(id, vec![cell_patch(key, row, col, value)])
            .await?;
        Ok(())
    }

    /// Write the same value to many cells of one participant in one update.
    pub async fn paint(
        &self,
        id: &EventId,
        key: &ParticipantKey,
        cells: &[(usize, usize)],
        value: bool,
    ) -> Result<(), SyncError> {
        if cells.is_empty() {
            return Ok(());
        }
        self.admit(id, key).await?;
        let patches = cells
            .iter()
            .map(|&(row, col)| cell_patch(key, row, col, value))
            .collect();
        self.store.update(id, patches).await?;
        Ok(())
    }

    /// Delete the participant's whole record. Removing an absent key succeeds.
    pub async fn remove_participant(
        &self,
        id: &EventId,
        key: &ParticipantKey,
    ) -> Result<(), SyncError> {
        self.store
            .update(id, vec![Patch::delete(participant_path(key))])
            .await?;
        tracing::info!(event_id = %id, participant = %key, "participant removed");
        Ok(())
    }

    /// A cell write under an unknown key creates that participant, so it is
    /// held to the same limit as `join`.
    async fn admit(&self, id: &EventId, key: &ParticipantKey) -> Result<(), SyncError> {
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let participants = doc.get(PARTICIPANTS_FIELD).and_then(Value::as_map);
        check_room(
            participants.is_some_and(|p| p.contains_key(key.as_str())),
            participants.map_or(0, |p| p.len()),
        )
    }
}

fn check_room(known: bool, participants: usize) -> Result<(), SyncError> {
    if !known && participants >= MAX_PARTICIPANTS_PER_EVENT {
        return Err(StoreError::LimitExceeded("too many participants").into());
    }
    Ok(())
}

/// Decoded event states from a store subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventStream {
    subscription: Subscription,
}

impl EventStream {
    pub fn event_id(&self) -> &EventId {
        self.subscription.event_id()
    }

    /// Next snapshot, decoded. `None` once the store side closes.
    pub async fn next_snapshot(&mut self) -> Option<Result<EventState, DecodeError>> {
        let snapshot = self.subscription.recv().await?;
        Some(EventState::from_document(&snapshot))
    }

    /// Next decodable state; snapshots that fail to decode are skipped.
    pub async fn next_state(&mut self) -> Option<EventState> {
        loop {
            match self.next_snapshot().await? {
                Ok(state) => return Some(state),
                Err(e) => {
                    tracing::warn!(event_id = %self.event_id(), "skipping snapshot: {e}");
                }
            }
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }

    pub fn into_stream(self) -> impl Stream<Item = EventState> + Send + 'static {
        self.subscription
            .filter_map(|snapshot| future::ready(EventState::from_document(&snapshot).ok()))
    }
}
