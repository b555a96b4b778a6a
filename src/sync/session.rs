use crate::model::{EventId, ParticipantKey};
use crate::store::DocumentStore;

use super::view::{DragPaint, LocalView, SnapshotDiff, toggle_target};
use super::{EventStream, SyncClient, SyncError};

/// One viewer of one event: a live subscription, the local mirror it feeds,
/// and the viewer's own participant identity.
///
/// Driven by a single task. Remote changes are merged only when the caller
/// awaits [`Session::next_state`]; local writes echo into the mirror once
/// the store accepts them. Two sessions writing as the same participant race
/// and the later write wins.
pub struct Session<S: DocumentStore + ?Sized> {
    client: SyncClient<S>,
    event_id: EventId,
    identity: Option<ParticipantKey>,
    stream: Option<EventStream>,
    view: Option<LocalView>,
    drag: Option<DragPaint>,
}

impl<S: DocumentStore + ?Sized> Session<S> {
    pub fn new(client: SyncClient<S>, event_id: EventId) -> Self {
        Self {
            client,
            event_id,
            identity: None,
            stream: None,
            view: None,
            drag: None,
        }
    }

    /// Resume as a participant who joined earlier.
    pub fn with_identity(mut self, key: ParticipantKey) -> Self {
        self.identity = Some(key);
        self
    }

    /// Subscribe and load the current state. A no-op when already live.
    pub async fn start(&mut self) -> Result<&LocalView, SyncError> {
        if self.stream.is_none() {
            let mut stream = self.client.subscribe(&self.event_id).await?;
            let state = stream.next_snapshot().await.ok_or(SyncError::Closed)??;
            self.view = Some(LocalView::from_state(state));
            self.stream = Some(stream);
            tracing::debug!(event_id = %self.event_id, "session started");
        }
        self.view.as_ref().ok_or(SyncError::NotStarted)
    }

    /// Drop the subscription. Safe to call at any time, any number of times.
    /// The last view stays readable.
    pub fn stop(&mut self) {
        self.drag = None;
        if let Some(stream) = self.stream.take() {
            stream.unsubscribe();
            tracing::debug!(event_id = %self.event_id, "session stopped");
        }
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    /// Wait for the next remote snapshot and merge it into the view.
    pub async fn next_state(&mut self) -> Result<SnapshotDiff, SyncError> {
        let stream = self.stream.as_mut().ok_or(SyncError::NotStarted)?;
        let Some(state) = stream.next_state().await else {
            self.stream = None;
            return Err(SyncError::Closed);
        };
        let view = self.view.as_mut().ok_or(SyncError::NotStarted)?;
        Ok(view.apply_snapshot(state))
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn view(&self) -> Option<&LocalView> {
        self.view.as_ref()
    }

    pub fn identity(&self) -> Option<&ParticipantKey> {
        self.identity.as_ref()
    }

    pub async fn join(&mut self, name: &str) -> Result<ParticipantKey, SyncError> {
        let key = self.client.join(&self.event_id, name).await?;
        if let Some(view) = self.view.as_mut() {
            view.apply_join(&key);
        }
        self.identity = Some(key.clone());
        Ok(key)
    }

    /// Flip one of our cells. Returns the value written.
    pub async fn toggle(&mut self, row: usize, col: usize) -> Result<bool, SyncError> {
        let (view, key) = self.writable(row, col)?;
        let value = toggle_target(view, key, row, col);
        self.set_cell(row, col, value).await?;
        Ok(value)
    }

    pub async fn set_cell(&mut self, row: usize, col: usize, value: bool) -> Result<(), SyncError> {
        let key = self.writable(row, col)?.1.clone();
        self.client
            .set_cell(&self.event_id, &key, row, col, value)
            .await?;
        if let Some(view) = self.view.as_mut() {
            view.apply_local(&key, row, col, value);
        }
        Ok(())
    }

    /// Paint many of our cells with one value in a single write.
    pub async fn paint(&mut self, cells: &[(usize, usize)], value: bool) -> Result<(), SyncError> {
        let key = match cells.first() {
            Some(&(row, col)) => self.writable(row, col)?.1.clone(),
            None => return Ok(()),
        };
        for &(row, col) in cells {
            self.writable(row, col)?;
        }
        self.client.paint(&self.event_id, &key, cells, value).await?;
        if let Some(view) = self.view.as_mut() {
            for &(row, col) in cells {
                view.apply_local(&key, row, col, value);
            }
        }
        Ok(())
    }

    /// Press on a cell: fix the drag value from it and write it. The drag
    /// starts only once that write lands.
    pub async fn begin_drag(&mut self, row: usize, col: usize) -> Result<bool, SyncError> {
        self.drag = None;
        let (view, key) = self.writable(row, col)?;
        let drag = DragPaint::begin(view, key, row, col);
        let value = drag.value();
        self.set_cell(row, col, value).await?;
        self.drag = Some(drag);
        Ok(value)
    }

    /// Drag across a cell. Each cell is written once per drag; a failed write
    /// leaves the cell open for another pass. Cells outside the grid and
    /// moves with no drag in progress are ignored.
    pub async fn drag_over(&mut self, row: usize, col: usize) -> Result<(), SyncError> {
        let in_grid = self.view.as_ref().is_some_and(|v| v.shape().contains(row, col));
        let Some(drag) = self.drag.as_ref().filter(|_| in_grid) else {
            return Ok(());
        };
        if drag.is_touched(row, col) {
            return Ok(());
        }
        let value = drag.value();
        self.set_cell(row, col, value).await?;
        if let Some(drag) = self.drag.as_mut() {
            drag.touch(row, col);
        }
        Ok(())
    }

    /// Release the press. Returns the cells the drag touched.
    pub fn end_drag(&mut self) -> Vec<(usize, usize)> {
        self.drag
            .take()
            .map(|d| d.cells().to_vec())
            .unwrap_or_default()
    }

    /// Delete a participant's record. Confirmation is the caller's job.
    /// Removing ourselves forgets our identity.
    pub async fn remove_participant(&mut self, key: &ParticipantKey) -> Result<(), SyncError> {
        self.client.remove_participant(&self.event_id, key).await?;
        if let Some(view) = self.view.as_mut() {
            view.remove_local(key);
        }
        if self.identity.as_ref() == Some(key) {
            self.identity = None;
            self.drag = None;
            tracing::info!(event_id = %self.event_id, participant = %key, "removed own identity");
        }
        Ok(())
    }

    fn writable(&self, row: usize, col: usize) -> Result<(&LocalView, &ParticipantKey), SyncError> {
        let view = self.view.as_ref().ok_or(SyncError::NotStarted)?;
        let key = self.identity.as_ref().ok_or(SyncError::NotJoined)?;
        if !view.shape().contains(row, col) {
            return Err(SyncError::CellOutOfRange { row, col });
        }
        Ok((view, key))
    }
}

impl<S: DocumentStore + ?Sized> Drop for Session<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
