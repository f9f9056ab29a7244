//! Generic, data-driven workflow engine.
//!
//! A [`WorkflowDefinition`] declares states and directed transitions; the
//! [`WorkflowEngine`] validates and executes one transition attempt at a
//! time. Transitions carry ordered validators (gates) and ordered actions
//! (side effects); a successful transition is recorded as a
//! `workflow.transitioned` event through the dispatch pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::command::CommandContext;
use crate::dispatch::EventDispatcher;
use crate::error::{BoxedError, StoreError};
use crate::event::{PendingEvent, StoredEvent};

/// Event type tag recorded for every successful workflow transition.
pub const WORKFLOW_TRANSITIONED: &str = "workflow.transitioned";

/// Coarse classification of a workflow state.
///
/// Category is descriptive metadata for consumers (boards, reports); the
/// engine itself never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StateCategory {
    Initial,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

/// A named state within a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowState {
    /// Unique state name within the definition (e.g. "in-review").
    pub name: String,
    /// Descriptive category.
    pub category: StateCategory,
}

/// Everything describing one transition attempt.
///
/// Created fresh for every attempt and never persisted directly; only the
/// resulting `workflow.transitioned` event is recorded.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    /// The entity being transitioned.
    pub entity_id: String,
    /// The entity's type (must match the transition's `entity_type`).
    pub entity_type: String,
    /// State the entity is currently in.
    pub from_state: String,
    /// State the attempt targets.
    pub to_state: String,
    /// Who initiated the attempt, if known.
    pub initiated_by: Option<String>,
    /// When the attempt was made.
    pub timestamp: DateTime<Utc>,
    /// Optional free-form note attached to the attempt.
    pub comment: Option<String>,
}

impl WorkflowContext {
    /// Build a context for one transition attempt, stamped with the
    /// current time.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            from_state: from_state.into(),
            to_state: to_state.into(),
            initiated_by: None,
            timestamp: Utc::now(),
            comment: None,
        }
    }

    /// Set the initiating user.
    pub fn with_initiated_by(mut self, user: impl Into<String>) -> Self {
        self.initiated_by = Some(user.into());
        self
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A predicate gating whether a transition may proceed.
///
/// Validators run in declared order; the first one returning `false`
/// rejects the whole attempt before any action runs.
#[async_trait]
pub trait TransitionValidator: Send + Sync {
    /// Validator name, used in rejection errors and logs.
    fn name(&self) -> &'static str;

    /// Whether the transition may proceed.
    async fn is_valid(&self, ctx: &WorkflowContext) -> bool;
}

/// A side-effecting step executed after a transition is fully validated.
///
/// Actions run in declared order and may mutate and persist the underlying
/// entity. The engine provides no rollback for actions that already ran;
/// the caller's surrounding transaction is the rollback boundary.
#[async_trait]
pub trait TransitionAction: Send + Sync {
    /// Action name, used in failure errors and logs.
    fn name(&self) -> &'static str;

    /// Execute the action.
    async fn execute(&self, ctx: &WorkflowContext) -> Result<(), BoxedError>;
}

/// A directed edge in the workflow graph.
///
/// Uniquely identified by `(entity_type, from_state, to_state)` within a
/// definition; the builder rejects duplicates.
pub struct WorkflowTransition {
    /// Transition name (e.g. "submit-for-review").
    pub name: String,
    /// Entity type this transition applies to.
    pub entity_type: String,
    /// Source state name.
    pub from_state: String,
    /// Target state name.
    pub to_state: String,
    validators: Vec<Arc<dyn TransitionValidator>>,
    actions: Vec<Arc<dyn TransitionAction>>,
}

impl std::fmt::Debug for WorkflowTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowTransition")
            .field("name", &self.name)
            .field("entity_type", &self.entity_type)
            .field("from_state", &self.from_state)
            .field("to_state", &self.to_state)
            .field("validators", &self.validators.iter().map(|v| v.name()).collect::<Vec<_>>())
            .field("actions", &self.actions.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl WorkflowTransition {
    /// Create a transition with no validators or actions.
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            from_state: from_state.into(),
            to_state: to_state.into(),
            validators: vec![],
            actions: vec![],
        }
    }

    /// Append a validator. Declaration order is execution order.
    pub fn validator(mut self, validator: Arc<dyn TransitionValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Append an action. Declaration order is execution order.
    pub fn action(mut self, action: Arc<dyn TransitionAction>) -> Self {
        self.actions.push(action);
        self
    }
}

/// Structural faults detected when building a [`WorkflowDefinition`].
#[derive(Debug, thiserror::Error)]
pub enum WorkflowDefinitionError {
    /// The definition declares no states.
    #[error("workflow '{workflow}' declares no states")]
    NoStates {
        /// Workflow name.
        workflow: String,
    },

    /// The initial state is not in the declared state set.
    #[error("workflow '{workflow}': initial state '{state}' is not declared")]
    UnknownInitialState {
        /// Workflow name.
        workflow: String,
        /// The undeclared state.
        state: String,
    },

    /// A transition references a state outside the declared state set.
    #[error(
        "workflow '{workflow}': transition '{from}' -> '{to}' references undeclared state '{state}'"
    )]
    UnknownTransitionState {
        /// Workflow name.
        workflow: String,
        /// Source state.
        from: String,
        /// Target state.
        to: String,
        /// The undeclared state.
        state: String,
    },

    /// Two transitions share the same `(entity_type, from, to)` key,
    /// which would make transition lookup ambiguous.
    #[error(
        "workflow '{workflow}': duplicate transition '{from}' -> '{to}' for entity type '{entity_type}'"
    )]
    DuplicateTransition {
        /// Workflow name.
        workflow: String,
        /// Entity type.
        entity_type: String,
        /// Source state.
        from: String,
        /// Target state.
        to: String,
    },
}

/// A named finite-state machine: states, directed transitions, and an
/// initial state.
///
/// Only obtainable through [`WorkflowDefinition::builder`], which enforces
/// the structural invariants, so every live definition is well-formed:
/// the allowed-transition check and the transition lookup are the same
/// single operation and can never disagree.
#[derive(Debug)]
pub struct WorkflowDefinition {
    /// Definition identifier.
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    states: Vec<WorkflowState>,
    transitions: Vec<WorkflowTransition>,
    /// Name of the state new entities start in.
    pub initial_state: String,
}

impl WorkflowDefinition {
    /// Start building a definition.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            id: id.into(),
            name: name.into(),
            states: vec![],
            transitions: vec![],
            initial_state: None,
        }
    }

    /// The declared states.
    pub fn states(&self) -> &[WorkflowState] {
        &self.states
    }

    /// Whether a state with the given name is declared.
    pub fn has_state(&self, name: &str) -> bool {
        self.states.iter().any(|s| s.name == name)
    }

    /// Look up the unique transition for `(entity_type, from, to)`.
    ///
    /// This is the single source of truth for both "is the transition
    /// allowed" and "which transition executes".
    pub fn find_transition(
        &self,
        entity_type: &str,
        from: &str,
        to: &str,
    ) -> Option<&WorkflowTransition> {
        self.transitions.iter().find(|t| {
            t.entity_type == entity_type && t.from_state == from && t.to_state == to
        })
    }

    /// Whether the exact directed transition `(from, to)` exists for the
    /// entity type. Delegates to [`find_transition`](Self::find_transition);
    /// reachability through intermediate states does not count.
    pub fn is_transition_allowed(&self, entity_type: &str, from: &str, to: &str) -> bool {
        self.find_transition(entity_type, from, to).is_some()
    }
}

/// Accumulates states and transitions, then validates them as a whole.
pub struct WorkflowDefinitionBuilder {
    id: String,
    name: String,
    states: Vec<WorkflowState>,
    transitions: Vec<WorkflowTransition>,
    initial_state: Option<String>,
}

impl WorkflowDefinitionBuilder {
    /// Declare a state.
    pub fn state(mut self, name: impl Into<String>, category: StateCategory) -> Self {
        self.states.push(WorkflowState {
            name: name.into(),
            category,
        });
        self
    }

    /// Declare a transition.
    pub fn transition(mut self, transition: WorkflowTransition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Set the initial state. Defaults to the first declared state.
    pub fn initial_state(mut self, name: impl Into<String>) -> Self {
        self.initial_state = Some(name.into());
        self
    }

    /// Validate and finalize the definition.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowDefinitionError`] if the definition has no states,
    /// its initial state is undeclared, a transition endpoint is
    /// undeclared, or two transitions share an `(entity_type, from, to)`
    /// key.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowDefinitionError> {
        let Some(first_state) = self.states.first() else {
            return Err(WorkflowDefinitionError::NoStates { workflow: self.name });
        };
        let initial_state = self
            .initial_state
            .unwrap_or_else(|| first_state.name.clone());

        let declared = |name: &str| self.states.iter().any(|s| s.name == name);

        if !declared(&initial_state) {
            return Err(WorkflowDefinitionError::UnknownInitialState {
                workflow: self.name,
                state: initial_state,
            });
        }

        for t in &self.transitions {
            for endpoint in [&t.from_state, &t.to_state] {
                if !declared(endpoint) {
                    return Err(WorkflowDefinitionError::UnknownTransitionState {
                        workflow: self.name,
                        from: t.from_state.clone(),
                        to: t.to_state.clone(),
                        state: endpoint.clone(),
                    });
                }
            }
        }

        for (i, t) in self.transitions.iter().enumerate() {
            let duplicate = self.transitions[..i].iter().any(|other| {
                other.entity_type == t.entity_type
                    && other.from_state == t.from_state
                    && other.to_state == t.to_state
            });
            if duplicate {
                return Err(WorkflowDefinitionError::DuplicateTransition {
                    workflow: self.name,
                    entity_type: t.entity_type.clone(),
                    from: t.from_state.clone(),
                    to: t.to_state.clone(),
                });
            }
        }

        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name,
            states: self.states,
            transitions: self.transitions,
            initial_state,
        })
    }
}

/// Failures surfaced by [`WorkflowEngine::transition`].
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The directed transition is not declared for this entity type.
    #[error("transition '{from}' -> '{to}' is not allowed for entity type '{entity_type}'")]
    TransitionNotAllowed {
        /// Entity type from the context.
        entity_type: String,
        /// Source state.
        from: String,
        /// Target state.
        to: String,
    },

    /// A validator rejected the attempt; no action ran, no event was
    /// recorded.
    #[error("validator '{validator}' rejected transition '{from}' -> '{to}'")]
    ValidationFailed {
        /// The rejecting validator's name.
        validator: &'static str,
        /// Source state.
        from: String,
        /// Target state.
        to: String,
    },

    /// An action failed mid-transition. Earlier actions have already run;
    /// the caller's surrounding transaction is the rollback boundary.
    #[error("action '{action}' failed during transition '{from}' -> '{to}': {source}")]
    ActionFailed {
        /// The failing action's name.
        action: &'static str,
        /// Source state.
        from: String,
        /// Target state.
        to: String,
        /// The action's error.
        source: BoxedError,
    },

    /// Recording the transition event failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Executes transition attempts against workflow definitions.
#[derive(Clone)]
pub struct WorkflowEngine {
    dispatcher: Arc<EventDispatcher>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine").finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Create an engine that records transition events through the given
    /// dispatcher.
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Validate and execute one transition attempt.
    ///
    /// Steps, in order:
    ///
    /// 1. Look up the unique transition for
    ///    `(ctx.entity_type, ctx.from_state, ctx.to_state)` -- one lookup
    ///    serves as both the allowed-check and the execution target.
    /// 2. Run every validator in declared order; the first `false` rejects
    ///    the attempt with no actions run and no event recorded.
    /// 3. Run every action in declared order, each receiving the same
    ///    context.
    /// 4. Record a [`WORKFLOW_TRANSITIONED`] event through the dispatch
    ///    pipeline and return its stored envelope.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::TransitionNotAllowed`] if the edge is undeclared.
    /// - [`WorkflowError::ValidationFailed`] naming the rejecting validator.
    /// - [`WorkflowError::ActionFailed`] naming the failing action; actions
    ///   that already ran are not rolled back here.
    /// - [`WorkflowError::Store`] if recording the event fails.
    pub async fn transition(
        &self,
        workflow: &WorkflowDefinition,
        ctx: &WorkflowContext,
    ) -> Result<StoredEvent, WorkflowError> {
        let transition = workflow
            .find_transition(&ctx.entity_type, &ctx.from_state, &ctx.to_state)
            .ok_or_else(|| WorkflowError::TransitionNotAllowed {
                entity_type: ctx.entity_type.clone(),
                from: ctx.from_state.clone(),
                to: ctx.to_state.clone(),
            })?;

        for validator in &transition.validators {
            if !validator.is_valid(ctx).await {
                tracing::debug!(
                    workflow = %workflow.name,
                    transition = %transition.name,
                    validator = validator.name(),
                    "transition rejected by validator"
                );
                return Err(WorkflowError::ValidationFailed {
                    validator: validator.name(),
                    from: ctx.from_state.clone(),
                    to: ctx.to_state.clone(),
                });
            }
        }

        for action in &transition.actions {
            action
                .execute(ctx)
                .await
                .map_err(|source| WorkflowError::ActionFailed {
                    action: action.name(),
                    from: ctx.from_state.clone(),
                    to: ctx.to_state.clone(),
                    source,
                })?;
        }

        let event_ctx = CommandContext {
            actor: ctx.initiated_by.clone(),
            correlation_id: None,
            metadata: None,
        };
        let mut event = PendingEvent::new(
            ctx.entity_type.clone(),
            ctx.entity_id.clone(),
            WORKFLOW_TRANSITIONED,
            serde_json::json!({
                "workflow_id": workflow.id,
                "entity_id": ctx.entity_id,
                "entity_type": ctx.entity_type,
                "from": ctx.from_state,
                "to": ctx.to_state,
                "transition": transition.name,
                "at": ctx.timestamp,
                "comment": ctx.comment,
            }),
            &event_ctx,
        );
        // The recorded business time is when the attempt was made, not when
        // the envelope was built.
        event.occurred_on = ctx.timestamp;
        let mut uow = self.dispatcher.begin();
        uow.stage_event(event);
        let mut recorded = self.dispatcher.commit(uow).await?;
        let stored = recorded.pop().ok_or_else(|| {
            WorkflowError::Store(StoreError::Backend(
                "commit returned no stored event".into(),
            ))
        })?;

        tracing::info!(
            workflow = %workflow.name,
            transition = %transition.name,
            entity_id = %ctx.entity_id,
            from = %ctx.from_state,
            to = %ctx.to_state,
            "workflow transition executed"
        );
        Ok(stored)
    }
}
