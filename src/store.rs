//! Append-only event store: the durable log of everything that happened.
//!
//! The [`EventStore`] trait is the seam to the host service's storage
//! adapter. [`InMemoryEventStore`] is the reference implementation used in
//! tests and single-process deployments; durable adapters live outside
//! this crate.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::event::{PendingEvent, StoredEvent};

/// Retrieval order for an aggregate's event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first: `occurred_on` ascending, ties by insertion sequence.
    /// This is replay order.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Durable, append-only log of domain events keyed by aggregate id.
///
/// # Contract
///
/// - `append` is atomic: either every event in the batch is recorded or
///   none is. It runs in the store's own transactional scope, independent
///   of whatever business transaction produced the events.
/// - Recorded events are never updated and never deleted.
/// - Replay order is `occurred_on` ascending with ties broken by the
///   store-assigned insertion sequence.
/// - Writers to *different* aggregate ids never conflict; serializing
///   concurrent writers to the *same* aggregate id is the caller's
///   responsibility. The store performs no optimistic-concurrency check.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically append a batch of events, assigning insertion sequences.
    ///
    /// Returns the recorded envelopes in the order they were appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch could not be recorded; in that
    /// case none of the events were recorded.
    async fn append(&self, events: Vec<PendingEvent>) -> Result<Vec<StoredEvent>, StoreError>;

    /// All events for one aggregate, in the requested order.
    async fn events_for_aggregate(
        &self,
        aggregate_id: &str,
        order: SortOrder,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// All events with the given type tag, in replay order.
    async fn events_of_type(&self, event_type: &str) -> Result<Vec<StoredEvent>, StoreError>;
}

/// In-memory reference implementation of [`EventStore`].
///
/// Backed by a `tokio::sync::RwLock<Vec<StoredEvent>>`; the single write
/// lock in [`append`](EventStore::append) is the atomic scope. Sequence
/// numbers start at 1 and increase by one per event.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded events, across all aggregates.
    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    /// Whether the store holds no events.
    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }
}

/// Sort a slice of events into replay order.
fn sort_for_replay(events: &mut [StoredEvent]) {
    events.sort_by(|a, b| {
        a.occurred_on
            .cmp(&b.occurred_on)
            .then(a.sequence.cmp(&b.sequence))
    });
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<PendingEvent>) -> Result<Vec<StoredEvent>, StoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let mut log = self.log.write().await;
        let mut next = log.len() as u64 + 1;
        let mut recorded = Vec::with_capacity(events.len());
        for pending in events {
            let stored = StoredEvent {
                sequence: next,
                event_id: pending.event_id,
                aggregate_id: pending.aggregate_id,
                event_type: pending.event_type,
                occurred_on: pending.occurred_on,
                payload: pending.payload,
                event_version: pending.event_version,
                metadata: pending.metadata,
            };
            log.push(stored.clone());
            recorded.push(stored);
            next += 1;
        }
        tracing::debug!(count = recorded.len(), "events appended");
        Ok(recorded)
    }

    async fn events_for_aggregate(
        &self,
        aggregate_id: &str,
        order: SortOrder,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.log.read().await;
        let mut events: Vec<StoredEvent> = log
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        sort_for_replay(&mut events);
        if order == SortOrder::Descending {
            events.reverse();
        }
        Ok(events)
    }

    async fn events_of_type(&self, event_type: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let log = self.log.read().await;
        let mut events: Vec<StoredEvent> = log
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        sort_for_replay(&mut events);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandContext;
    use chrono::{Duration, Utc};

    fn pending(aggregate_id: &str, event_type: &str, offset_secs: i64) -> PendingEvent {
        let mut p = PendingEvent::new(
            "checklist",
            aggregate_id,
            event_type,
            serde_json::Value::Null,
            &CommandContext::default(),
        );
        p.occurred_on = Utc::now() + Duration::seconds(offset_secs);
        p
    }

    #[tokio::test]
    async fn append_assigns_increasing_sequences() {
        let store = InMemoryEventStore::new();
        let recorded = store
            .append(vec![pending("a", "One", 0), pending("a", "Two", 1)])
            .await
            .expect("append ok");
        assert_eq!(recorded[0].sequence, 1);
        assert_eq!(recorded[1].sequence, 2);

        let more = store
            .append(vec![pending("b", "Three", 2)])
            .await
            .expect("append ok");
        assert_eq!(more[0].sequence, 3);
    }

    #[tokio::test]
    async fn empty_append_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let recorded = store.append(vec![]).await.expect("append ok");
        assert!(recorded.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn retrieval_orders_by_occurred_on_ascending() {
        let store = InMemoryEventStore::new();
        // Insert out of chronological order with distinct timestamps.
        store
            .append(vec![
                pending("ms-1", "Third", 30),
                pending("ms-1", "First", 10),
                pending("ms-1", "Second", 20),
            ])
            .await
            .expect("append ok");

        let events = store
            .events_for_aggregate("ms-1", SortOrder::Ascending)
            .await
            .expect("read ok");
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["First", "Second", "Third"]);
    }

    #[tokio::test]
    async fn equal_timestamps_break_ties_by_insertion_order() {
        let store = InMemoryEventStore::new();
        let at = Utc::now();
        let mut a = pending("ms-1", "A", 0);
        let mut b = pending("ms-1", "B", 0);
        a.occurred_on = at;
        b.occurred_on = at;
        store.append(vec![a, b]).await.expect("append ok");

        let events = store
            .events_for_aggregate("ms-1", SortOrder::Ascending)
            .await
            .expect("read ok");
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["A", "B"], "ties must preserve insertion order");
    }

    #[tokio::test]
    async fn descending_order_reverses_replay_order() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![pending("ms-1", "First", 10), pending("ms-1", "Second", 20)])
            .await
            .expect("append ok");

        let events = store
            .events_for_aggregate("ms-1", SortOrder::Descending)
            .await
            .expect("read ok");
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["Second", "First"]);
    }

    #[tokio::test]
    async fn retrieval_is_partitioned_by_aggregate_id() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![pending("a", "ForA", 0), pending("b", "ForB", 1)])
            .await
            .expect("append ok");

        let events = store
            .events_for_aggregate("a", SortOrder::Ascending)
            .await
            .expect("read ok");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ForA");
    }

    #[tokio::test]
    async fn events_of_type_filters_across_aggregates() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![
                pending("a", "Completed", 0),
                pending("b", "Completed", 1),
                pending("a", "Created", 2),
            ])
            .await
            .expect("append ok");

        let events = store.events_of_type("Completed").await.expect("read ok");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == "Completed"));
    }

    #[tokio::test]
    async fn unknown_aggregate_returns_empty_history() {
        let store = InMemoryEventStore::new();
        let events = store
            .events_for_aggregate("missing", SortOrder::Ascending)
            .await
            .expect("read ok");
        assert!(events.is_empty());
    }
}
