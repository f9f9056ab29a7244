//! Query bus: typed, 1:1 routing for read-side requests.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxedError;

/// A typed request expressing an intent to read state.
///
/// Each query type is routed to exactly one registered [`QueryHandler`].
pub trait Query: Send + 'static {
    /// Human-readable query name for diagnostics (e.g. "milestones-by-project").
    const NAME: &'static str;

    /// The result produced by the query's handler.
    type Output: Send + 'static;
}

/// Handles exactly one query type.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    /// Execute the query, returning its output or a failure.
    async fn handle(&self, query: Q) -> Result<Q::Output, BoxedError>;
}

/// Errors surfaced by [`QueryBus`] registration and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum QueryBusError {
    /// No handler is registered for the dispatched query type.
    #[error("no handler registered for query '{query}'")]
    NoHandler {
        /// The query's `NAME`.
        query: &'static str,
    },

    /// A handler is already registered for this query type.
    #[error("a handler is already registered for query '{query}'")]
    DuplicateHandler {
        /// The query's `NAME`.
        query: &'static str,
    },

    /// The handler ran and failed; the original cause is attached.
    #[error("query '{query}' failed: {source}")]
    Execution {
        /// The query's `NAME`.
        query: &'static str,
        /// The handler's error.
        source: BoxedError,
    },
}

/// Routes each query type to its single registered handler.
///
/// Built once at composition time; read-only at dispatch time, exactly like
/// [`CommandBus`](crate::command::CommandBus).
#[derive(Default)]
pub struct QueryBus {
    handlers: HashMap<TypeId, Entry>,
}

struct Entry {
    name: &'static str,
    handler: Box<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for QueryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.values().map(|e| e.name).collect();
        f.debug_struct("QueryBus").field("queries", &names).finish()
    }
}

impl QueryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for query type `Q`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryBusError::DuplicateHandler`] if a handler for `Q` is
    /// already registered.
    pub fn register<Q: Query>(
        &mut self,
        handler: impl QueryHandler<Q>,
    ) -> Result<(), QueryBusError> {
        use std::collections::hash_map::Entry as MapEntry;
        match self.handlers.entry(TypeId::of::<Q>()) {
            MapEntry::Occupied(_) => Err(QueryBusError::DuplicateHandler { query: Q::NAME }),
            MapEntry::Vacant(slot) => {
                let erased: Arc<dyn QueryHandler<Q>> = Arc::new(handler);
                slot.insert(Entry {
                    name: Q::NAME,
                    handler: Box::new(erased),
                });
                Ok(())
            }
        }
    }

    /// Dispatch a query to its registered handler.
    ///
    /// # Errors
    ///
    /// - [`QueryBusError::NoHandler`] if no handler is registered for `Q`.
    /// - [`QueryBusError::Execution`] wrapping the handler's error.
    pub async fn dispatch<Q: Query>(&self, query: Q) -> Result<Q::Output, QueryBusError> {
        let entry = self
            .handlers
            .get(&TypeId::of::<Q>())
            .ok_or(QueryBusError::NoHandler { query: Q::NAME })?;

        let handler = entry
            .handler
            .downcast_ref::<Arc<dyn QueryHandler<Q>>>()
            .ok_or(QueryBusError::NoHandler { query: Q::NAME })?
            .clone();

        tracing::debug!(query = Q::NAME, "dispatching query");
        handler
            .handle(query)
            .await
            .map_err(|source| QueryBusError::Execution {
                query: Q::NAME,
                source,
            })
    }

    /// Number of registered query types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MilestonesByProject {
        project_id: String,
    }
    impl Query for MilestonesByProject {
        const NAME: &'static str = "milestones-by-project";
        type Output = Vec<String>;
    }

    struct UnroutedQuery;
    impl Query for UnroutedQuery {
        const NAME: &'static str = "unrouted-query";
        type Output = ();
    }

    struct FixedResultHandler;

    #[async_trait]
    impl QueryHandler<MilestonesByProject> for FixedResultHandler {
        async fn handle(&self, query: MilestonesByProject) -> Result<Vec<String>, BoxedError> {
            Ok(vec![format!("{}-ms-1", query.project_id)])
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl QueryHandler<MilestonesByProject> for FailingHandler {
        async fn handle(&self, _query: MilestonesByProject) -> Result<Vec<String>, BoxedError> {
            Err("read model unavailable".into())
        }
    }

    #[tokio::test]
    async fn query_routes_to_registered_handler() {
        let mut bus = QueryBus::new();
        bus.register::<MilestonesByProject>(FixedResultHandler)
            .expect("register");

        let out = bus
            .dispatch(MilestonesByProject { project_id: "p-1".into() })
            .await
            .expect("dispatch should succeed");
        assert_eq!(out, vec!["p-1-ms-1".to_string()]);
    }

    #[tokio::test]
    async fn unregistered_query_fails_with_not_found() {
        let bus = QueryBus::new();
        let err = bus.dispatch(UnroutedQuery).await.unwrap_err();
        assert!(matches!(err, QueryBusError::NoHandler { query: "unrouted-query" }));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let mut bus = QueryBus::new();
        bus.register::<MilestonesByProject>(FixedResultHandler)
            .expect("first register ok");
        let err = bus
            .register::<MilestonesByProject>(FailingHandler)
            .unwrap_err();
        assert!(matches!(err, QueryBusError::DuplicateHandler { .. }));
    }

    #[tokio::test]
    async fn handler_error_is_wrapped_with_query_name() {
        let mut bus = QueryBus::new();
        bus.register::<MilestonesByProject>(FailingHandler)
            .expect("register");
        let err = bus
            .dispatch(MilestonesByProject { project_id: "p-1".into() })
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("milestones-by-project"), "should name the query: {msg}");
        assert!(msg.contains("read model unavailable"), "should carry the cause: {msg}");
    }
}
