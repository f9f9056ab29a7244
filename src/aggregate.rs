//! Aggregate trait: the event-sourced consistency boundary contract.

use serde::{Serialize, de::DeserializeOwned};

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state.
/// State is built by folding domain events through the
/// [`apply`](Aggregate::apply) method.
///
/// # Associated Types
///
/// - `Command`: the set of commands this aggregate can handle.
/// - `DomainEvent`: the set of events this aggregate can produce and apply.
/// - `Error`: command rejection / validation error.
///
/// # Contract
///
/// - [`handle`](Aggregate::handle) must be a pure decision function: no I/O,
///   no side effects, no clock reads. It validates a command against the
///   current state and returns zero or more events. The returned events are
///   the *only* channel through which state changes leave the aggregate --
///   there is no hidden pending-event list.
/// - [`apply`](Aggregate::apply) must be a pure, total function. It takes
///   ownership of the current state and a reference to a domain event,
///   returning the next state. Replaying the same ordered history always
///   produces the same state.
/// - `DomainEvent` must be an adjacently tagged serde enum
///   (`#[serde(tag = "type", content = "data")]`). The `"type"` tag is the
///   event's stable discriminator: it must never change once events of that
///   kind have been recorded, and must be unique across all event kinds.
pub trait Aggregate: Default + Clone + Send + Sync + 'static {
    /// Identifies this aggregate type (e.g. "milestone"). Stamped onto
    /// event metadata so every stored event is self-describing.
    const AGGREGATE_TYPE: &'static str;

    /// The set of commands this aggregate can handle.
    type Command: Send + 'static;

    /// The set of events this aggregate can produce and apply.
    type DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static;

    /// Command rejection / validation error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate a command against the current state and produce events.
    ///
    /// Returns `Ok(vec![])` if the command is a no-op.
    /// Returns `Err` to reject the command; rejection produces no events
    /// and therefore no state change.
    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error>;

    /// Apply a single event to produce the next state.
    fn apply(self, event: &Self::DomainEvent) -> Self;
}


#[cfg(test)]
mod tests {
    use super::Aggregate;
    use super::test_fixtures::{Checklist, ChecklistCommand, ChecklistError, ChecklistEvent};

    fn created_checklist() -> Checklist {
        let events = Checklist::default()
            .handle(ChecklistCommand::Create {
                title: "Sprint 4".into(),
            })
            .expect("create should succeed");
        events
            .into_iter()
            .fold(Checklist::default(), |s, e| s.apply(&e))
    }

    #[test]
    fn handle_create() {
        let c = created_checklist();
        assert!(c.created);
        assert_eq!(c.title, "Sprint 4");
    }

    #[test]
    fn reject_double_create() {
        let c = created_checklist();
        let err = c
            .handle(ChecklistCommand::Create { title: "again".into() })
            .unwrap_err();
        assert!(matches!(err, ChecklistError::AlreadyExists));
    }

    #[test]
    fn reject_add_before_create() {
        let err = Checklist::default()
            .handle(ChecklistCommand::AddItem { label: "x".into() })
            .unwrap_err();
        assert!(matches!(err, ChecklistError::NotCreated));
    }

    #[test]
    fn add_and_tick_item() {
        let mut c = created_checklist();
        let events = c
            .handle(ChecklistCommand::AddItem {
                label: "write report".into(),
            })
            .expect("add ok");
        c = events.into_iter().fold(c, |s, e| s.apply(&e));

        let events = c
            .handle(ChecklistCommand::TickItem { index: 0 })
            .expect("tick ok");
        c = events.into_iter().fold(c, |s, e| s.apply(&e));

        assert!(c.items[0].done);
    }

    #[test]
    fn reject_tick_out_of_range() {
        let c = created_checklist();
        let err = c
            .handle(ChecklistCommand::TickItem { index: 3 })
            .unwrap_err();
        assert!(matches!(err, ChecklistError::NoSuchItem(3)));
    }

    #[test]
    fn handle_then_apply_roundtrip() {
        let c = created_checklist();
        let events = c
            .handle(ChecklistCommand::AddItem { label: "a".into() })
            .expect("add ok");
        // Fold all produced events through `apply` to derive the final state.
        let final_state = events.into_iter().fold(c, |state, event| state.apply(&event));
        assert_eq!(final_state.items.len(), 1);
    }

    #[test]
    fn no_op_events_leave_rejected_state_untouched() {
        // A rejected command returns Err and therefore no events; folding
        // nothing leaves the state exactly as it was.
        let c = created_checklist();
        let before = c.clone();
        let result = c.handle(ChecklistCommand::TickItem { index: 9 });
        assert!(result.is_err());
        assert_eq!(before, created_checklist());
    }

    #[test]
    fn event_serde_uses_adjacent_tagging() {
        let json = serde_json::to_value(ChecklistEvent::ItemAdded { label: "a".into() })
            .expect("serialize should succeed");
        assert_eq!(json["type"], "ItemAdded");
        assert_eq!(json["data"]["label"], "a");
    }
}
