//! Command context and the command bus: typed, 1:1 request routing.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BoxedError;

/// Cross-cutting metadata passed alongside a command.
///
/// Carries audit trail and correlation information without polluting the
/// `Command` or `DomainEvent` types. Fields are stamped onto
/// [`EventMetadata`](crate::event::EventMetadata) when events are encoded.
///
/// # Examples
///
/// ```
/// use cohort_es::CommandContext;
/// use serde_json::json;
///
/// let ctx = CommandContext::default()
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123")
///     .with_metadata(json!({"source": "api"}));
///
/// assert_eq!(ctx.actor.as_deref(), Some("user-42"));
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// assert!(ctx.metadata.is_some());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandContext {
    /// Identity of the actor issuing the command (e.g. a user ID).
    pub actor: Option<String>,
    /// Correlation ID for tracing a request across aggregates.
    pub correlation_id: Option<String>,
    /// Arbitrary metadata forwarded onto stored event metadata.
    pub metadata: Option<Value>,
}

impl CommandContext {
    /// Set the actor identity.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set arbitrary metadata.
    pub fn with_metadata(mut self, meta: Value) -> Self {
        self.metadata = Some(meta);
        self
    }
}

/// A typed request expressing an intent to change state.
///
/// Each command type is routed to exactly one registered
/// [`CommandHandler`]. `NAME` is used in error messages and logs.
pub trait Command: Send + 'static {
    /// Human-readable command name for diagnostics (e.g. "complete-milestone").
    const NAME: &'static str;

    /// The result produced by the command's handler.
    type Output: Send + 'static;
}

/// Handles exactly one command type.
///
/// Handlers are registered on a [`CommandBus`] at composition time and may
/// perform I/O (load aggregates, commit events).
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Execute the command, returning its output or a domain failure.
    async fn handle(&self, command: C) -> Result<C::Output, BoxedError>;
}

/// Errors surfaced by [`CommandBus`] registration and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum CommandBusError {
    /// No handler is registered for the dispatched command type.
    #[error("no handler registered for command '{command}'")]
    NoHandler {
        /// The command's `NAME`.
        command: &'static str,
    },

    /// A handler is already registered for this command type.
    ///
    /// Duplicate registration is a composition-time configuration fault and
    /// fails fast rather than silently letting the last registration win.
    #[error("a handler is already registered for command '{command}'")]
    DuplicateHandler {
        /// The command's `NAME`.
        command: &'static str,
    },

    /// The handler ran and failed; the original cause is attached.
    #[error("command '{command}' failed: {source}")]
    Execution {
        /// The command's `NAME`.
        command: &'static str,
        /// The handler's error.
        source: BoxedError,
    },
}

/// Routes each command type to its single registered handler.
///
/// The routing table is keyed by `TypeId` and populated once at composition
/// time via [`register`](CommandBus::register); lookups at dispatch time are
/// read-only, so the bus is freely shareable across tasks.
#[derive(Default)]
pub struct CommandBus {
    handlers: HashMap<TypeId, Entry>,
}

/// Type-erased handler table entry.
///
/// `Box<dyn Any + Send + Sync>` holds an `Arc<dyn CommandHandler<C>>` for
/// some concrete `C`; dispatch downcasts it back to the typed handler.
struct Entry {
    name: &'static str,
    handler: Box<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.values().map(|e| e.name).collect();
        f.debug_struct("CommandBus").field("commands", &names).finish()
    }
}

impl CommandBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for command type `C`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandBusError::DuplicateHandler`] if a handler for `C` is
    /// already registered. Registration ambiguity is a startup fault.
    pub fn register<C: Command>(
        &mut self,
        handler: impl CommandHandler<C>,
    ) -> Result<(), CommandBusError> {
        use std::collections::hash_map::Entry as MapEntry;
        match self.handlers.entry(TypeId::of::<C>()) {
            MapEntry::Occupied(_) => Err(CommandBusError::DuplicateHandler { command: C::NAME }),
            MapEntry::Vacant(slot) => {
                let erased: Arc<dyn CommandHandler<C>> = Arc::new(handler);
                slot.insert(Entry {
                    name: C::NAME,
                    handler: Box::new(erased),
                });
                Ok(())
            }
        }
    }

    /// Dispatch a command to its registered handler.
    ///
    /// # Errors
    ///
    /// - [`CommandBusError::NoHandler`] if no handler is registered for `C`.
    /// - [`CommandBusError::Execution`] wrapping the handler's error if the
    ///   handler fails; the cause is never swallowed.
    pub async fn dispatch<C: Command>(&self, command: C) -> Result<C::Output, CommandBusError> {
        let entry = self
            .handlers
            .get(&TypeId::of::<C>())
            .ok_or(CommandBusError::NoHandler { command: C::NAME })?;

        let handler = entry
            .handler
            .downcast_ref::<Arc<dyn CommandHandler<C>>>()
            .ok_or(CommandBusError::NoHandler { command: C::NAME })?
            .clone();

        tracing::debug!(command = C::NAME, "dispatching command");
        handler
            .handle(command)
            .await
            .map_err(|source| CommandBusError::Execution {
                command: C::NAME,
                source,
            })
    }

    /// Number of registered command types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
