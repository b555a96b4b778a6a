//! In-process document store: documents in memory, mutations in a WAL,
//! snapshots fanned out through the notify hub.

mod mutations;
mod queries;
mod validate;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::document::{Document, Patch, apply_patch, merge_into};
use crate::model::{EventId, Record};
use crate::notify::NotifyHub;
use crate::store::{DocumentStore, SetOptions, StoreError, Subscription};
use crate::wal::Wal;

/// One document slot. `None` until the first successful `set`.
pub type DocumentSlot = Arc<RwLock<Option<Document>>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that arrive together share one fsync:
/// take the first, drain whatever else is queued, flush once, answer all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!(path = %wal.path().display(), "WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} records: {e}", batch.len());
        metrics::counter!(crate::observability::STORE_WRITE_FAILURES_TOTAL).increment(batch.len() as u64);
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Record, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(record, _)| wal.append_buffered(record));
    // Flush even after an append error so half-written bytes don't bleed
    // into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply a record to a slot (caller holds the lock). `DocumentSet` creates
/// the document; `DocumentUpdated` on an empty slot is ignored.
fn apply_record(slot: &mut Option<Document>, record: &Record) {
    match record {
        Record::DocumentSet { doc, merge, .. } => match slot {
            Some(existing) if *merge => merge_into(existing, doc.clone()),
            _ => *slot = Some(doc.clone()),
        },
        Record::DocumentUpdated { patches, .. } => {
            if let Some(existing) = slot {
                for patch in patches {
                    apply_patch(existing, patch);
                }
            }
        }
    }
}

pub struct Engine {
    pub(super) docs: DashMap<EventId, DocumentSlot>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Writers hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an in-flight append.
    pub(super) write_gate: RwLock<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let records = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            docs: DashMap::new(),
            wal_tx,
            notify,
            write_gate: RwLock::new(()),
        };

        // Sole owner during replay: try_write never contends. blocking_write
        // would panic if this runs inside an async context.
        for record in &records {
            let slot = engine.slot_or_create(record.id());
            let mut guard = slot.try_write().expect("replay: uncontended write");
            apply_record(&mut guard, record);
        }
        tracing::info!(
            path = %wal_path.display(),
            records = records.len(),
            documents = engine.docs.len(),
            "store replayed"
        );

        Ok(engine)
    }

    /// Open with a private notify hub.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        Self::new(wal_path.to_path_buf(), Arc::new(NotifyHub::new()))
    }

    pub(super) fn slot(&self, id: &EventId) -> Option<DocumentSlot> {
        self.docs.get(id).map(|e| e.value().clone())
    }

    pub(super) fn slot_or_create(&self, id: &EventId) -> DocumentSlot {
        self.docs
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone()
    }

    /// Send one record to the group-commit writer and wait for its fsync.
    async fn wal_append(&self, record: &Record) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// WAL-append, apply, then notify subscribers with the new snapshot.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut Option<Document>,
        record: &Record,
    ) -> Result<(), StoreError> {
        self.wal_append(record).await?;
        apply_record(slot, record);
        if let Some(doc) = slot.as_ref() {
            self.notify.send(record.id(), Arc::new(doc.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for Engine {
    async fn get(&self, id: &EventId) -> Result<Option<Document>, StoreError> {
        Ok(self.get_document(id).await)
    }

    async fn set(&self, id: &EventId, doc: Document, options: SetOptions) -> Result<(), StoreError> {
        self.set_document(id, doc, options.merge).await
    }

    async fn update(&self, id: &EventId, patches: Vec<Patch>) -> Result<(), StoreError> {
        self.update_document(id, patches).await
    }

    async fn subscribe(&self, id: &EventId) -> Result<Subscription, StoreError> {
        self.subscribe_document(id).await
    }
}
