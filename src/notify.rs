use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::model::EventId;
use crate::store::Snapshot;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: one channel per event, carrying full snapshots.
pub struct NotifyHub {
    channels: DashMap<EventId, broadcast::Sender<Snapshot>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to snapshots of an event. Creates the channel if needed.
    pub fn subscribe(self: &Arc<Self>, id: &EventId) -> Listener {
        let rx = self
            .channels
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        metrics::gauge!(crate::observability::SUBSCRIPTIONS_ACTIVE).increment(1.0);
        Listener {
            id: id.clone(),
            rx: Some(rx),
            hub: Arc::clone(self),
        }
    }

    /// Send a snapshot. No-op if nobody is listening.
    pub fn send(&self, id: &EventId, snapshot: Snapshot) {
        if let Some(sender) = self.channels.get(id) {
            let _ = sender.send(snapshot);
        }
    }

    /// Number of events with at least one live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn listener_count(&self, id: &EventId) -> usize {
        self.channels
            .get(id)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drop the channel once its last listener is gone.
    fn release(&self, id: &EventId) {
        self.channels
            .remove_if(id, |_, sender| sender.receiver_count() == 0);
    }
}

/// Receiving half of a hub subscription.
pub struct Listener {
    id: EventId,
    rx: Option<broadcast::Receiver<Snapshot>>,
    hub: Arc<NotifyHub>,
}

impl Listener {
    /// Next snapshot. A lagging listener skips ahead: only the newest
    /// snapshot matters. `None` once the hub side is gone.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(event_id = %self.id, skipped, "listener lagged, skipping ahead");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // receiver must be gone before the count check
        drop(self.rx.take());
        self.hub.release(&self.id);
        metrics::gauge!(crate::observability::SUBSCRIPTIONS_ACTIVE).decrement(1.0);
    }
}
