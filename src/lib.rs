//! Event-sourcing and workflow core: aggregates fold append-only event
//! histories, commits flow through a transactional outbox to subscribed
//! handlers, and a data-driven workflow engine guards state transitions.

mod aggregate;
pub use aggregate::Aggregate;
mod bus;
pub use bus::{EventBus, EventBusBuilder, EventHandler};
mod command;
pub use command::{Command, CommandBus, CommandBusError, CommandContext, CommandHandler};
mod dispatch;
pub use dispatch::{EventDispatcher, UnitOfWork};
pub mod domain;
mod error;
pub use error::{BoxedError, ReplayError, StoreError};
mod event;
pub use event::{
    EVENT_SCHEMA_VERSION, EventMetadata, PendingEvent, StoredEvent, decode_domain_event,
    encode_domain_event,
};
mod outbox;
pub use outbox::{Outbox, OutboxEntry, OutboxRelay, RelayHandle};
mod query;
pub use query::{Query, QueryBus, QueryBusError, QueryHandler};
mod repository;
pub use repository::EventSourcedRepository;
mod store;
pub use store::{EventStore, InMemoryEventStore, SortOrder};
pub mod workflow;
