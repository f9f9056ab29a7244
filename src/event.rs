//! Event envelopes and the codecs between domain events and stored form.
//!
//! This module provides the foundational data types and pure functions that
//! the store, bus, dispatch, and repository modules all depend on. No I/O
//! occurs here.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::command::CommandContext;

/// Schema version stamped on every event written by this crate.
///
/// Bump only when the envelope layout itself changes; domain payload
/// evolution is handled per event type by its owning aggregate.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Infrastructure metadata stamped on every recorded event.
///
/// The `aggregate_type` field makes each event self-describing, so
/// subscribers can recover the aggregate identity without an external
/// registry. Optional fields come from the [`CommandContext`] and are
/// omitted from the serialized form when absent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventMetadata {
    /// Aggregate type name (e.g. "milestone").
    pub aggregate_type: String,
    /// Actor identity from the command context, if provided.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor: Option<String>,
    /// Correlation ID from the command context, if provided.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
}

/// An immutable domain-event envelope awaiting persistence.
///
/// Produced by [`encode_domain_event`] (or built directly for
/// infrastructure events such as workflow transitions) and consumed by
/// [`EventStore::append`](crate::store::EventStore::append). Once built it
/// is never mutated; persistence turns it into a [`StoredEvent`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PendingEvent {
    /// Freshly generated UUID v4, unique per event.
    pub event_id: Uuid,
    /// The aggregate instance this event belongs to.
    pub aggregate_id: String,
    /// Stable event type tag extracted from the adjacently-tagged domain event.
    pub event_type: String,
    /// When the event occurred (business time).
    pub occurred_on: DateTime<Utc>,
    /// JSON payload (the `"data"` portion of the adjacently-tagged enum).
    pub payload: Value,
    /// Envelope schema version; see [`EVENT_SCHEMA_VERSION`].
    pub event_version: u32,
    /// Infrastructure metadata stamped on the event.
    pub metadata: EventMetadata,
}

impl PendingEvent {
    /// Build an envelope for an infrastructure-level event with an explicit
    /// type tag and payload, stamping a fresh event ID and the current time.
    ///
    /// Domain events should go through [`encode_domain_event`] instead so the
    /// type tag always comes from the serde discriminator.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        ctx: &CommandContext,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            occurred_on: Utc::now(),
            payload,
            event_version: EVENT_SCHEMA_VERSION,
            metadata: EventMetadata {
                aggregate_type: aggregate_type.into(),
                actor: ctx.actor.clone(),
                correlation_id: ctx.correlation_id.clone(),
            },
        }
    }
}

/// An event as recorded in the append-only store and delivered to handlers.
///
/// Identical to [`PendingEvent`] plus the store-assigned `sequence`, which
/// fixes insertion order and breaks `occurred_on` ties during replay.
/// Stored events are never updated and never deleted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredEvent {
    /// Store-assigned insertion sequence number, strictly increasing.
    pub sequence: u64,
    /// Client-assigned event ID.
    pub event_id: Uuid,
    /// The aggregate instance this event belongs to.
    pub aggregate_id: String,
    /// Stable event type tag (e.g. "Completed").
    pub event_type: String,
    /// When the event occurred (business time).
    pub occurred_on: DateTime<Utc>,
    /// JSON payload (the domain event data).
    pub payload: Value,
    /// Envelope schema version at write time.
    pub event_version: u32,
    /// Infrastructure metadata (aggregate type, actor, correlation id).
    pub metadata: EventMetadata,
}

/// Encode a domain event into a [`PendingEvent`] ready for persistence.
///
/// Serializes the adjacently-tagged domain event
/// (`#[serde(tag = "type", content = "data")]`), extracts the `"type"` and
/// `"data"` fields, builds [`EventMetadata`] from the command context and
/// aggregate identity, and generates a fresh UUID v4 event ID and an
/// `occurred_on` timestamp.
///
/// # Errors
///
/// Returns `serde_json::Error` if the domain event cannot be serialized to
/// JSON or does not serialize as a tagged object.
pub fn encode_domain_event<A: Aggregate>(
    event: &A::DomainEvent,
    ctx: &CommandContext,
    aggregate_id: &str,
) -> serde_json::Result<PendingEvent> {
    // Serialize the adjacently-tagged domain event. This produces JSON like:
    //   {"type": "Started"}                  (unit variant)
    //   {"type": "TaskAdded", "data": {...}} (variant with fields)
    let value = serde_json::to_value(event)?;
    let obj = value.as_object().ok_or_else(|| {
        serde::ser::Error::custom("domain event must serialize to a tagged JSON object")
    })?;

    let event_type = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| serde::ser::Error::custom("domain event is missing its 'type' tag"))?
        .to_string();

    // The "data" field is absent for unit variants.
    let payload = obj.get("data").cloned().unwrap_or(Value::Null);

    Ok(PendingEvent {
        event_id: Uuid::new_v4(),
        aggregate_id: aggregate_id.to_string(),
        event_type,
        occurred_on: Utc::now(),
        payload,
        event_version: EVENT_SCHEMA_VERSION,
        metadata: EventMetadata {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            actor: ctx.actor.clone(),
            correlation_id: ctx.correlation_id.clone(),
        },
    })
}

/// Decode a [`StoredEvent`] back into the aggregate's domain event type.
///
/// Reconstructs the adjacently-tagged JSON object from the envelope's
/// `event_type` tag and payload, then deserializes it. Used during replay;
/// a failure here means the history contains an event this aggregate
/// version cannot interpret, which aborts reconstruction.
///
/// # Errors
///
/// Returns `serde_json::Error` if the tagged value does not deserialize
/// into `A::DomainEvent`.
pub fn decode_domain_event<A: Aggregate>(
    stored: &StoredEvent,
) -> serde_json::Result<A::DomainEvent> {
    let tagged = if stored.payload.is_null() {
        serde_json::json!({ "type": stored.event_type })
    } else {
        serde_json::json!({
            "type": stored.event_type,
            "data": stored.payload,
        })
    };
    serde_json::from_value(tagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Checklist, ChecklistEvent};

    fn ctx() -> CommandContext {
        CommandContext::default()
    }

    #[test]
    fn encode_extracts_type_tag_and_payload() {
        let pending = encode_domain_event::<Checklist>(
            &ChecklistEvent::Created { title: "t".into() },
            &ctx(),
            "cl-1",
        )
        .expect("encode should succeed");
        assert_eq!(pending.event_type, "Created");
        assert_eq!(pending.payload["title"], "t");
        assert_eq!(pending.event_version, EVENT_SCHEMA_VERSION);
        assert_eq!(pending.metadata.aggregate_type, "checklist");
        assert_eq!(pending.aggregate_id, "cl-1");
    }

    #[test]
    fn encode_stamps_v4_event_id() {
        let pending = encode_domain_event::<Checklist>(
            &ChecklistEvent::ItemAdded { label: "x".into() },
            &ctx(),
            "cl-1",
        )
        .expect("encode should succeed");
        assert_eq!(
            pending.event_id.get_version(),
            Some(uuid::Version::Random),
            "event_id should be UUID v4"
        );
    }

    #[test]
    fn encode_propagates_context_fields() {
        let ctx = CommandContext::default()
            .with_actor("u1")
            .with_correlation_id("c1");
        let pending = encode_domain_event::<Checklist>(
            &ChecklistEvent::ItemAdded { label: "x".into() },
            &ctx,
            "cl-1",
        )
        .expect("encode should succeed");
        assert_eq!(pending.metadata.actor.as_deref(), Some("u1"));
        assert_eq!(pending.metadata.correlation_id.as_deref(), Some("c1"));
    }

    #[test]
    fn metadata_skips_none_fields_in_serialization() {
        let meta = EventMetadata {
            aggregate_type: "checklist".into(),
            actor: None,
            correlation_id: None,
        };
        let json = serde_json::to_string(&meta).expect("serialize should succeed");
        assert!(!json.contains("actor"), "actor should be omitted when None");
        assert!(
            !json.contains("correlation_id"),
            "correlation_id should be omitted when None"
        );
        assert!(json.contains("aggregate_type"));
    }

    fn stored(event_type: &str, payload: Value) -> StoredEvent {
        StoredEvent {
            sequence: 1,
            event_id: Uuid::new_v4(),
            aggregate_id: "cl-1".into(),
            event_type: event_type.into(),
            occurred_on: Utc::now(),
            payload,
            event_version: EVENT_SCHEMA_VERSION,
            metadata: EventMetadata {
                aggregate_type: "checklist".into(),
                actor: None,
                correlation_id: None,
            },
        }
    }

    #[test]
    fn decode_roundtrips_encoded_event() {
        let original = ChecklistEvent::ItemAdded { label: "write docs".into() };
        let pending =
            encode_domain_event::<Checklist>(&original, &ctx(), "cl-1").expect("encode ok");
        let recovered = decode_domain_event::<Checklist>(&stored(
            &pending.event_type,
            pending.payload.clone(),
        ))
        .expect("decode should succeed");
        assert_eq!(recovered, original);
    }

    #[test]
    fn decode_unknown_event_type_fails() {
        let result = decode_domain_event::<Checklist>(&stored("Vanished", Value::Null));
        assert!(result.is_err(), "unknown type tag must not decode");
    }

    #[test]
    fn decode_malformed_payload_fails() {
        // ItemAdded requires a string `label`; hand it a number.
        let result = decode_domain_event::<Checklist>(&stored(
            "ItemAdded",
            serde_json::json!({"label": 42}),
        ));
        assert!(result.is_err(), "malformed payload must not decode");
    }

    #[test]
    fn pending_event_new_stamps_identity_and_version() {
        let pending = PendingEvent::new(
            "workflow",
            "wf-1",
            "workflow.transitioned",
            serde_json::json!({"from": "a", "to": "b"}),
            &CommandContext::default().with_actor("engine"),
        );
        assert_eq!(pending.event_type, "workflow.transitioned");
        assert_eq!(pending.aggregate_id, "wf-1");
        assert_eq!(pending.metadata.aggregate_type, "workflow");
        assert_eq!(pending.metadata.actor.as_deref(), Some("engine"));
        assert_eq!(pending.event_version, EVENT_SCHEMA_VERSION);
    }
}
