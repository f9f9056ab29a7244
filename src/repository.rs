//! Aggregate reconstruction from stored history.
//!
//! Aggregates are always rebuilt from scratch by folding their full ordered
//! event history -- never from a snapshot. Replay is all-or-nothing: any
//! event the current aggregate version cannot decode aborts the load.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::error::ReplayError;
use crate::event::decode_domain_event;
use crate::store::{EventStore, SortOrder};

/// Loads event-sourced aggregates from an [`EventStore`].
///
/// `Clone` is cheap; the store is `Arc`-wrapped.
pub struct EventSourcedRepository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> Clone for EventSourcedRepository<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> std::fmt::Debug for EventSourcedRepository<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcedRepository")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .finish()
    }
}

impl<A: Aggregate> EventSourcedRepository<A> {
    /// Create a repository over the given store.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            _aggregate: PhantomData,
        }
    }

    /// Rebuild the aggregate with the given id from its full event history.
    ///
    /// Events are replayed oldest-first (`occurred_on` ascending, insertion
    /// order on ties). Each historical event is decoded and folded through
    /// [`Aggregate::apply`]; no event is ever re-recorded or re-published
    /// by replay.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::AggregateNotFound`] if the history is empty.
    /// - [`ReplayError::EventDecode`] naming the failing event type if any
    ///   historical event cannot be decoded; the partially rebuilt state is
    ///   discarded.
    /// - [`ReplayError::Store`] if reading the history fails.
    pub async fn load(&self, aggregate_id: &str) -> Result<A, ReplayError> {
        let history = self
            .store
            .events_for_aggregate(aggregate_id, SortOrder::Ascending)
            .await?;

        if history.is_empty() {
            return Err(ReplayError::AggregateNotFound {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id: aggregate_id.to_string(),
            });
        }

        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %aggregate_id,
            events = history.len(),
            "replaying aggregate history"
        );

        let mut state = A::default();
        for stored in &history {
            let event = decode_domain_event::<A>(stored).map_err(|source| {
                ReplayError::EventDecode {
                    event_type: stored.event_type.clone(),
                    aggregate_id: aggregate_id.to_string(),
                    source,
                }
            })?;
            state = state.apply(&event);
        }
        Ok(state)
    }

    /// Whether any events are recorded for the given aggregate id.
    pub async fn exists(&self, aggregate_id: &str) -> Result<bool, ReplayError> {
        let history = self
            .store
            .events_for_aggregate(aggregate_id, SortOrder::Ascending)
            .await?;
        Ok(!history.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Checklist, ChecklistEvent};
    use crate::command::CommandContext;
    use crate::event::{PendingEvent, encode_domain_event};
    use crate::store::InMemoryEventStore;

    async fn seed(store: &InMemoryEventStore, aggregate_id: &str, events: &[ChecklistEvent]) {
        let ctx = CommandContext::default();
        let pending: Vec<_> = events
            .iter()
            .map(|e| encode_domain_event::<Checklist>(e, &ctx, aggregate_id).expect("encode ok"))
            .collect();
        store.append(pending).await.expect("append ok");
    }

    #[tokio::test]
    async fn load_rebuilds_state_from_history() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(
            &store,
            "cl-1",
            &[
                ChecklistEvent::Created { title: "Sprint 4".into() },
                ChecklistEvent::ItemAdded { label: "a".into() },
                ChecklistEvent::ItemAdded { label: "b".into() },
                ChecklistEvent::ItemTicked { index: 0 },
            ],
        )
        .await;

        let repo = EventSourcedRepository::<Checklist>::new(store);
        let checklist = repo.load("cl-1").await.expect("load ok");
        assert!(checklist.created);
        assert_eq!(checklist.title, "Sprint 4");
        assert_eq!(checklist.items.len(), 2);
        assert!(checklist.items[0].done);
        assert!(!checklist.items[1].done);
    }

    #[tokio::test]
    async fn empty_history_fails_with_not_found() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = EventSourcedRepository::<Checklist>::new(store);
        let err = repo.load("missing").await.unwrap_err();
        assert!(matches!(
            err,
            ReplayError::AggregateNotFound { aggregate_type: "checklist", .. }
        ));
    }

    #[tokio::test]
    async fn undecodable_event_aborts_replay_and_names_the_type() {
        let store = Arc::new(InMemoryEventStore::new());
        seed(
            &store,
            "cl-1",
            &[ChecklistEvent::Created { title: "t".into() }],
        )
        .await;
        // Append an event this aggregate version does not know.
        store
            .append(vec![PendingEvent::new(
                "checklist",
                "cl-1",
                "RenamedInFutureVersion",
                serde_json::json!({"title": "new"}),
                &CommandContext::default(),
            )])
            .await
            .expect("append ok");

        let repo = EventSourcedRepository::<Checklist>::new(store);
        let err = repo.load("cl-1").await.unwrap_err();
        match err {
            ReplayError::EventDecode { event_type, .. } => {
                assert_eq!(event_type, "RenamedInFutureVersion");
            }
            other => panic!("expected EventDecode, got: {other}"),
        }
    }

    #[tokio::test]
    async fn exists_reflects_recorded_history() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = EventSourcedRepository::<Checklist>::new(store.clone());
        assert!(!repo.exists("cl-1").await.expect("exists ok"));

        seed(
            &store,
            "cl-1",
            &[ChecklistEvent::Created { title: "t".into() }],
        )
        .await;
        assert!(repo.exists("cl-1").await.expect("exists ok"));
    }
}
