//! Domain aggregates built on the event-sourcing core.

pub mod milestone;
