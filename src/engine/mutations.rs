use std::sync::Arc;

use tokio::sync::oneshot;

use crate::document::{Document, Patch};
use crate::limits::*;
use crate::model::{EventId, Record};
use crate::store::StoreError;

use super::validate::{validate_event_id, validate_patches};
use super::{Engine, WalCommand};

impl Engine {
    /// Create or overwrite a document; with `merge`, deep-merge into it.
    pub async fn set_document(
        &self,
        id: &EventId,
        doc: Document,
        merge: bool,
    ) -> Result<(), StoreError> {
        validate_event_id(id)?;
        if !self.docs.contains_key(id) && self.docs.len() >= MAX_DOCUMENTS {
            return Err(StoreError::LimitExceeded("too many documents"));
        }

        let _gate = self.write_gate.read().await;
        let slot = self.slot_or_create(id);
        let mut guard = slot.write().await;
        let created = guard.is_none();

        let record = Record::DocumentSet {
            id: id.clone(),
            doc,
            merge,
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &record).await {
            drop(guard);
            if created {
                self.discard_empty_slot(id, &slot);
            }
            return Err(e);
        }

        let op = if merge { "merge" } else { "set" };
        metrics::counter!(crate::observability::STORE_WRITES_TOTAL, "op" => op).increment(1);
        if created {
            tracing::info!(event_id = %id, "document created");
        } else {
            tracing::debug!(event_id = %id, merge, "document written");
        }
        Ok(())
    }

    /// Drop a slot whose creating write failed, unless another writer
    /// already holds it or filled it.
    fn discard_empty_slot(&self, id: &EventId, slot: &super::DocumentSlot) {
        self.docs.remove_if(id, |_, s| {
            Arc::ptr_eq(s, slot)
                && Arc::strong_count(s) == 2
                && s.try_read().is_ok_and(|doc| doc.is_none())
        });
    }

    /// Apply targeted field writes to an existing document, in order.
    pub async fn update_document(&self, id: &EventId, patches: Vec<Patch>) -> Result<(), StoreError> {
        validate_patches(&patches)?;

        let _gate = self.write_gate.read().await;
        let slot = self.slot(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut guard = slot.write().await;
        if guard.is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        if patches.is_empty() {
            return Ok(());
        }

        let count = patches.len();
        let record = Record::DocumentUpdated {
            id: id.clone(),
            patches,
        };
        self.persist_and_apply(&mut guard, &record).await?;

        metrics::counter!(crate::observability::STORE_WRITES_TOTAL, "op" => "update").increment(1);
        tracing::debug!(event_id = %id, patches = count, "document updated");
        Ok(())
    }

    /// Rewrite the WAL as one `DocumentSet` per live document.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;

        let slots: Vec<(EventId, super::DocumentSlot)> = self
            .docs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut records = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            if let Some(doc) = slot.read().await.as_ref() {
                records.push(Record::DocumentSet {
                    id,
                    doc: doc.clone(),
                    merge: false,
                });
            }
        }
        let count = records.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!(documents = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
