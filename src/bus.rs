//! In-process publish/subscribe router from event type to handlers.
//!
//! The bus delivers stored events to every handler subscribed to their
//! exact type tag. Delivery is at-most-once per `publish` call; retry, if
//! any, belongs to the outbox relay or a decorator around a specific
//! handler, never to the bus itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxedError;
use crate::event::StoredEvent;

/// A subscriber interested in specific event types.
///
/// Handlers run sequentially, in registration order, within one `publish`
/// call. A handler failure is logged and isolated: it never reaches the
/// publisher and never affects sibling handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// The exact event type tags this handler subscribes to.
    fn event_types(&self) -> &'static [&'static str];

    /// React to one event.
    ///
    /// # Errors
    ///
    /// Errors are logged by the bus and do not propagate.
    async fn handle(&self, event: &StoredEvent) -> Result<(), BoxedError>;
}

/// Builds an [`EventBus`] at composition time.
///
/// Subscription order is delivery order per event type. After
/// [`build`](EventBusBuilder::build) the routing table is immutable.
#[derive(Default)]
pub struct EventBusBuilder {
    routes: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl EventBusBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to every event type it declares.
    pub fn subscribe(mut self, handler: Arc<dyn EventHandler>) -> Self {
        for event_type in handler.event_types() {
            self.routes
                .entry((*event_type).to_string())
                .or_default()
                .push(Arc::clone(&handler));
        }
        self
    }

    /// Finalize the routing table.
    pub fn build(self) -> EventBus {
        EventBus { routes: self.routes }
    }
}

/// Immutable event-type -> handler-list router.
///
/// Built once via [`EventBusBuilder`]; the routing map is read-only
/// thereafter, so no synchronization is needed on lookup.
pub struct EventBus {
    routes: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<(&str, usize)> = self
            .routes
            .iter()
            .map(|(t, hs)| (t.as_str(), hs.len()))
            .collect();
        routes.sort();
        f.debug_struct("EventBus").field("routes", &routes).finish()
    }
}

impl EventBus {
    /// Start building a bus.
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Deliver one event to every handler subscribed to its exact type.
    ///
    /// No registered handler is a silent no-op. Each handler invocation is
    /// isolated: a failure is logged with the handler's name and delivery
    /// continues with the next handler.
    pub async fn publish(&self, event: &StoredEvent) {
        let Some(handlers) = self.routes.get(&event.event_type) else {
            return;
        };
        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!(
                    handler = handler.name(),
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    event_id = %event.event_id,
                    error = %e,
                    "event handler failed; continuing with remaining handlers"
                );
            }
        }
    }

    /// Deliver a batch of events, in order.
    pub async fn publish_all(&self, events: &[StoredEvent]) {
        for event in events {
            self.publish(event).await;
        }
    }

    /// Number of handlers subscribed to the given event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.routes.get(event_type).map_or(0, Vec::len)
    }
}
