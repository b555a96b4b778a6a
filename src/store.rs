//! Document store contract consumed by the sync layer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;

use crate::document::{Document, Patch};
use crate::model::EventId;

/// Full document as seen by subscribers.
pub type Snapshot = Arc<Document>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("event not found: {0}")]
    NotFound(EventId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("invalid field path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Deep-merge into the existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    pub const REPLACE: Self = Self { merge: false };
    pub const MERGE: Self = Self { merge: true };
}

/// A live document store.
///
/// `update` paths are applied independently, so writers touching different
/// paths never clobber each other. Two writes to the same path are ordered by
/// arrival; the later one wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &EventId) -> Result<Option<Document>, StoreError>;

    async fn set(&self, id: &EventId, doc: Document, options: SetOptions) -> Result<(), StoreError>;

    /// Targeted field writes. Fails with `NotFound` if the document does not exist.
    async fn update(&self, id: &EventId, patches: Vec<Patch>) -> Result<(), StoreError>;

    /// Current snapshot first, then one snapshot per change.
    /// Fails with `NotFound` if the document does not exist.
    async fn subscribe(&self, id: &EventId) -> Result<Subscription, StoreError>;
}

/// Push stream of snapshots. Dropping it (or [`Subscription::unsubscribe`])
/// stops delivery and releases the underlying channel.
pub struct Subscription {
    id: EventId,
    inner: BoxStream<'static, Snapshot>,
}

impl Subscription {
    pub fn new(id: EventId, inner: BoxStream<'static, Snapshot>) -> Self {
        Self { id, inner }
    }

    pub fn event_id(&self) -> &EventId {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.inner.next().await
    }

    pub fn unsubscribe(self) {
        tracing::debug!(event_id = %self.id, "unsubscribed");
    }
}

impl Stream for Subscription {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Snapshot>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
