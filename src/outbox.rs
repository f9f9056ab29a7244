//! Transactional outbox and the relay that publishes committed events.
//!
//! Events are enqueued here in the same commit step that appends them to
//! the event store. The [`OutboxRelay`] then reads unpublished entries and
//! delivers them through the [`EventBus`], so subscribers only ever see
//! events whose originating commit succeeded. Delivery is at-least-once:
//! an entry is removed only after the bus call returns, so the outbox
//! holds nothing but the current backlog. The event store remains the
//! durable record of everything published.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::bus::EventBus;
use crate::event::StoredEvent;

/// One outbox record: a committed event awaiting publication.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// Outbox-assigned insertion id, strictly increasing for the lifetime
    /// of the outbox. Ids are never reused, even after entries are removed.
    pub id: u64,
    /// The committed event to publish.
    pub event: StoredEvent,
}

#[derive(Debug, Default)]
struct OutboxState {
    /// Next id to assign; survives entry removal so ids stay monotonic.
    next_id: u64,
    entries: Vec<OutboxEntry>,
}

/// In-process unpublished-record table.
///
/// Insertion order is publication order. Entries exist only between commit
/// and publication: [`mark_published`](Outbox::mark_published) removes the
/// record, so the table size is the current backlog, not the event history.
/// In a durable deployment this is a table written in the same storage
/// transaction as the state change; the in-process form keeps the identical
/// contract behind one write lock.
#[derive(Debug, Default)]
pub struct Outbox {
    state: RwLock<OutboxState>,
}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue committed events for publication, preserving their order.
    pub async fn enqueue(&self, events: &[StoredEvent]) {
        if events.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for event in events {
            state.next_id += 1;
            let id = state.next_id;
            state.entries.push(OutboxEntry {
                id,
                event: event.clone(),
            });
        }
    }

    /// Snapshot of all entries not yet published, in insertion order.
    pub async fn unpublished(&self) -> Vec<OutboxEntry> {
        self.state.read().await.entries.clone()
    }

    /// Remove one entry after successful publication.
    pub async fn mark_published(&self, id: u64) {
        let mut state = self.state.write().await;
        state.entries.retain(|e| e.id != id);
    }

    /// Number of entries awaiting publication.
    pub async fn backlog(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

/// Publishes unpublished outbox entries through the event bus.
///
/// The relay is the only component that calls
/// [`EventBus::publish`](crate::bus::EventBus::publish) for dispatched
/// events, which is what makes publication commit-gated: nothing enters the
/// outbox until its commit succeeded, and nothing leaves it except through
/// [`drain`](OutboxRelay::drain).
pub struct OutboxRelay {
    outbox: Arc<Outbox>,
    bus: Arc<EventBus>,
}

impl OutboxRelay {
    /// Create a relay over the given outbox and bus.
    pub fn new(outbox: Arc<Outbox>, bus: Arc<EventBus>) -> Self {
        Self { outbox, bus }
    }

    /// Publish every unpublished entry, in insertion order.
    ///
    /// Each entry is removed only after the bus call returns, so a
    /// crash mid-drain re-delivers the remainder on the next drain
    /// (at-least-once). Handler failures inside the bus are isolated and do
    /// not stop the drain.
    ///
    /// Returns the number of entries published.
    pub async fn drain(&self) -> usize {
        let pending = self.outbox.unpublished().await;
        if pending.is_empty() {
            return 0;
        }
        tracing::debug!(backlog = pending.len(), "draining outbox");
        let mut delivered = 0;
        for entry in pending {
            self.bus.publish(&entry.event).await;
            self.outbox.mark_published(entry.id).await;
            delivered += 1;
        }
        delivered
    }

    /// Start a background polling loop that drains the outbox on an interval.
    ///
    /// Returns a [`RelayHandle`] for shutting the loop down. The final drain
    /// before shutdown flushes any remaining backlog.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration) -> RelayHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let relay = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let n = relay.drain().await;
                        if n > 0 {
                            tracing::debug!(published = n, "outbox relay drained");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            relay.drain().await;
                            tracing::debug!("outbox relay shutting down");
                            break;
                        }
                    }
                }
            }
        });
        RelayHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

/// Handle for stopping a spawned [`OutboxRelay`] loop.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal shutdown and wait for the loop's final drain to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
