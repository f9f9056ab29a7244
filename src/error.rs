//! Crate-level error types for event persistence and aggregate replay.

/// Type-erased error used at handler and action seams.
///
/// Command handlers, query handlers, event handlers, and workflow actions
/// all run behind trait objects, so their failures cross the seam as a
/// boxed error. The bus and engine wrap it with context before re-raising.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned when appending to or reading from an event store fails.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Disk or storage-adapter I/O failure.
    ///
    /// An underlying filesystem or storage-layer I/O error occurred
    /// while appending or reading events.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event payload could not be serialized for persistence.
    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Storage-adapter failure that is not an I/O error.
    ///
    /// Durable adapters (out of scope for this crate) surface backend
    /// errors through this variant.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Error returned when rebuilding an aggregate from its event history fails.
///
/// Reconstruction is all-or-nothing: any failure aborts the load and no
/// partially rebuilt aggregate is ever returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The aggregate has no recorded events.
    #[error("aggregate '{aggregate_type}/{aggregate_id}' not found: no recorded events")]
    AggregateNotFound {
        /// The aggregate type name (e.g. "milestone").
        aggregate_type: &'static str,
        /// The aggregate instance identifier.
        aggregate_id: String,
    },

    /// A historical event could not be decoded into the aggregate's
    /// domain event type.
    #[error(
        "replay failed for aggregate '{aggregate_id}': event '{event_type}' could not be decoded: {source}"
    )]
    EventDecode {
        /// The stored event type tag that failed to decode.
        event_type: String,
        /// The aggregate instance identifier being rebuilt.
        aggregate_id: String,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// Reading the event history from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
