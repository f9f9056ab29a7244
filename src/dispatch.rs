//! Event dispatch pipeline: stage, commit, publish-after-commit.
//!
//! A [`UnitOfWork`] accumulates the events produced by one business
//! operation. [`EventDispatcher::commit`] appends them to the event store
//! and enqueues them into the outbox in one step; the
//! [`OutboxRelay`](crate::outbox::OutboxRelay) publishes them afterwards.
//! Dropping a unit of work without committing discards everything, which is
//! the rollback path: no store append, no outbox entry, no handler ever
//! invoked.

use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::command::CommandContext;
use crate::error::StoreError;
use crate::event::{PendingEvent, StoredEvent, encode_domain_event};
use crate::outbox::Outbox;
use crate::store::EventStore;

/// Accumulates the pending events of one business operation.
///
/// Created via [`EventDispatcher::begin`]. Staging only encodes; nothing is
/// persisted or published until the unit is committed.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    staged: Vec<PendingEvent>,
}

impl UnitOfWork {
    /// Encode and stage the events an aggregate's `handle` produced.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if an event cannot be serialized; in
    /// that case nothing from this call is staged.
    pub fn stage<A: Aggregate>(
        &mut self,
        aggregate_id: &str,
        events: &[A::DomainEvent],
        ctx: &CommandContext,
    ) -> serde_json::Result<()> {
        let mut encoded = Vec::with_capacity(events.len());
        for event in events {
            encoded.push(encode_domain_event::<A>(event, ctx, aggregate_id)?);
        }
        self.staged.extend(encoded);
        Ok(())
    }

    /// Stage a pre-built envelope (e.g. a workflow transition event).
    pub fn stage_event(&mut self, event: PendingEvent) {
        self.staged.push(event);
    }

    /// Discard everything staged. Equivalent to dropping the unit.
    pub fn rollback(self) {
        tracing::debug!(discarded = self.staged.len(), "unit of work rolled back");
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Number of staged events.
    pub fn len(&self) -> usize {
        self.staged.len()
    }
}

/// Commits units of work: store append plus outbox enqueue.
///
/// `Clone` is cheap; both collaborators are `Arc`-wrapped.
#[derive(Clone)]
pub struct EventDispatcher {
    store: Arc<dyn EventStore>,
    outbox: Arc<Outbox>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create a dispatcher over the given store and outbox.
    pub fn new(store: Arc<dyn EventStore>, outbox: Arc<Outbox>) -> Self {
        Self { store, outbox }
    }

    /// Start an empty unit of work.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::default()
    }

    /// Commit a unit of work: append every staged event to the store, then
    /// enqueue the recorded envelopes into the outbox.
    ///
    /// An empty unit returns immediately without touching the store. A store
    /// failure aborts the whole commit: nothing is recorded, nothing is
    /// enqueued, and no handler will ever observe the staged events.
    ///
    /// Returns the recorded envelopes in commit order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the append fails.
    pub async fn commit(&self, uow: UnitOfWork) -> Result<Vec<StoredEvent>, StoreError> {
        if uow.staged.is_empty() {
            return Ok(vec![]);
        }
        let recorded = self.store.append(uow.staged).await?;
        self.outbox.enqueue(&recorded).await;
        tracing::debug!(count = recorded.len(), "unit of work committed");
        Ok(recorded)
    }
}
