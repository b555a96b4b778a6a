use futures::StreamExt;
use futures::stream;

use crate::document::Document;
use crate::model::EventId;
use crate::store::{StoreError, Subscription};

use super::Engine;

impl Engine {
    pub async fn get_document(&self, id: &EventId) -> Option<Document> {
        let slot = self.slot(id)?;
        let guard = slot.read().await;
        guard.clone()
    }

    /// Ids of every existing document, sorted.
    pub async fn list_documents(&self) -> Vec<EventId> {
        let slots: Vec<_> = self
            .docs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut ids = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            if slot.read().await.is_some() {
                ids.push(id);
            }
        }
        ids.sort();
        ids
    }

    /// Current snapshot, then every later one. The listener is registered
    /// under the slot read lock; snapshots are sent under the write lock, so
    /// the stream never repeats or regresses past its initial state.
    pub async fn subscribe_document(&self, id: &EventId) -> Result<Subscription, StoreError> {
        let slot = self.slot(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let (listener, initial) = {
            let guard = slot.read().await;
            let initial = guard.clone().ok_or_else(|| StoreError::NotFound(id.clone()))?;
            (self.notify.subscribe(id), initial)
        };

        let updates = stream::unfold(listener, |mut listener| async move {
            listener.recv().await.map(|snapshot| (snapshot, listener))
        });
        let snapshots = stream::once(async move { std::sync::Arc::new(initial) }).chain(updates);

        tracing::debug!(event_id = %id, "subscribed");
        Ok(Subscription::new(id.clone(), snapshots.boxed()))
    }
}
