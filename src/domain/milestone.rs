//! The milestone aggregate: a project checkpoint with tasks, dependencies,
//! and a guarded status lifecycle.
//!
//! Status transitions follow a fixed table with per-target preconditions on
//! tasks, progress, and dependencies. Dependencies are captured as recursive
//! snapshots so cycle detection is a pure walk over aggregate state, with no
//! repository access inside `handle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

// ---------------------------------------------------------------------------
// Status lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of a milestone.
///
/// `Completed` and `Cancelled` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl MilestoneStatus {
    /// The statuses this status may transition to.
    pub fn allowed_targets(self) -> &'static [MilestoneStatus] {
        use MilestoneStatus::*;
        match self {
            Pending => &[InProgress, Blocked, Cancelled],
            InProgress => &[Completed, Blocked, Cancelled],
            Blocked => &[Pending, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    /// Whether no transition leaves this status.
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    fn can_transition_to(self, target: MilestoneStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MilestoneStatus::Pending => "PENDING",
            MilestoneStatus::InProgress => "IN_PROGRESS",
            MilestoneStatus::Blocked => "BLOCKED",
            MilestoneStatus::Completed => "COMPLETED",
            MilestoneStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Value objects
// ---------------------------------------------------------------------------

/// A unit of work tracked under a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTask {
    /// Task identifier, unique within the milestone.
    pub id: String,
    /// Short task description.
    pub name: String,
    /// Whether the task is done.
    pub completed: bool,
    /// Assigned user, if any.
    pub assignee_id: Option<String>,
}

/// A point-in-time view of another milestone this one depends on.
///
/// Snapshots carry their own dependencies recursively, so reachability
/// questions (cycle detection) can be answered from aggregate state alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    /// The depended-on milestone's id.
    pub id: String,
    /// Its status at snapshot time.
    pub status: MilestoneStatus,
    /// Its due date at snapshot time, if set.
    pub due_date: Option<DateTime<Utc>>,
    /// Its own dependencies, recursively.
    #[serde(default)]
    pub dependencies: Vec<DependencySnapshot>,
}

impl DependencySnapshot {
    /// Whether `target` appears anywhere in this snapshot's tree, the root
    /// included. Tracks visited ids so shared subtrees are walked once.
    fn reaches(&self, target: &str) -> bool {
        fn walk<'a>(
            node: &'a DependencySnapshot,
            target: &str,
            visited: &mut Vec<&'a str>,
        ) -> bool {
            if node.id == target {
                return true;
            }
            if visited.iter().any(|seen| *seen == node.id) {
                return false;
            }
            visited.push(&node.id);
            node.dependencies.iter().any(|dep| walk(dep, target, visited))
        }
        walk(self, target, &mut Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Commands, events, errors
// ---------------------------------------------------------------------------

/// Intents against a milestone. Handled by [`Milestone::handle`].
#[derive(Debug, Clone)]
pub enum MilestoneCommand {
    Create {
        id: String,
        name: String,
        description: Option<String>,
        due_date: Option<DateTime<Utc>>,
        project_id: String,
    },
    /// Request a status transition. `at` is the caller-supplied business
    /// time, recorded as the completion date when the target is `Completed`.
    ChangeStatus {
        to: MilestoneStatus,
        at: DateTime<Utc>,
        comment: Option<String>,
    },
    AddTask {
        task_id: String,
        name: String,
        assignee_id: Option<String>,
    },
    CompleteTask {
        task_id: String,
    },
    AssignTask {
        task_id: String,
        assignee_id: String,
    },
    /// Set overall progress, 0 to 100.
    UpdateProgress {
        progress: u8,
    },
    AddDependency {
        dependency: DependencySnapshot,
    },
    SetDueDate {
        due_date: DateTime<Utc>,
    },
    Assign {
        assignee_id: String,
    },
}

/// Facts recorded about a milestone. Applied by [`Milestone::apply`].
///
/// The serde `type` tag is the stable stored discriminator; renaming a
/// variant breaks replay of existing histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MilestoneEvent {
    Created {
        id: String,
        name: String,
        description: Option<String>,
        due_date: Option<DateTime<Utc>>,
        project_id: String,
    },
    /// Pending -> InProgress.
    Started,
    /// InProgress -> Completed. `at` becomes the completion date.
    Completed {
        at: DateTime<Utc>,
    },
    /// Pending/InProgress -> Blocked, with the qualifying reason.
    Blocked {
        reason: String,
    },
    /// Blocked -> Pending.
    Reopened,
    /// Pending/InProgress -> Cancelled.
    Cancelled {
        comment: Option<String>,
    },
    TaskAdded {
        task: MilestoneTask,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskAssigned {
        task_id: String,
        assignee_id: String,
    },
    ProgressUpdated {
        progress: u8,
    },
    DependencyAdded {
        dependency: DependencySnapshot,
    },
    DueDateSet {
        due_date: DateTime<Utc>,
    },
    Assigned {
        assignee_id: String,
    },
}

/// Rejections produced by [`Milestone::handle`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MilestoneError {
    #[error("milestone already exists")]
    AlreadyCreated,

    #[error("milestone does not exist yet")]
    NotCreated,

    #[error("milestone is {status}; no further changes are allowed")]
    Terminal { status: MilestoneStatus },

    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: MilestoneStatus,
        to: MilestoneStatus,
    },

    #[error("dependency '{dependency_id}' is not completed")]
    DependencyIncomplete { dependency_id: String },

    #[error("{remaining} task(s) are not completed")]
    TasksIncomplete { remaining: usize },

    #[error("progress is {progress}%, completion requires 100%")]
    ProgressIncomplete { progress: u8 },

    #[error("nothing qualifies this milestone as blocked")]
    NoBlockingReason,

    #[error("a milestone cannot depend on itself")]
    SelfDependency,

    #[error("dependency '{dependency_id}' would create a cycle")]
    DependencyCycle { dependency_id: String },

    #[error("dependency '{dependency_id}' is already registered")]
    DuplicateDependency { dependency_id: String },

    #[error("dependency '{dependency_id}' is due after this milestone")]
    DependencyDueTooLate { dependency_id: String },

    #[error("task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    #[error("task '{task_id}' is already completed")]
    TaskAlreadyCompleted { task_id: String },

    #[error("progress must be between 0 and 100, got {progress}")]
    InvalidProgress { progress: u8 },
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Event-sourced milestone state. Rebuilt by folding [`MilestoneEvent`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: MilestoneStatus,
    /// Overall progress, 0 to 100.
    pub progress: u8,
    pub project_id: String,
    pub assignee_id: Option<String>,
    /// Set exactly when the milestone completed, otherwise `None`.
    pub completion_date: Option<DateTime<Utc>>,
    pub tasks: Vec<MilestoneTask>,
    pub dependencies: Vec<DependencySnapshot>,
    created: bool,
}

impl Milestone {
    /// Whether the milestone has been created.
    pub fn exists(&self) -> bool {
        self.created
    }

    fn task(&self, task_id: &str) -> Option<&MilestoneTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// First dependency not yet completed, if any.
    fn incomplete_dependency(&self) -> Option<&DependencySnapshot> {
        self.dependencies
            .iter()
            .find(|d| d.status != MilestoneStatus::Completed)
    }

    /// The reason this milestone qualifies as blocked, if one exists.
    ///
    /// Qualifying reasons, checked in order: a dependency is itself blocked,
    /// a dependency is not completed, a task has no assignee.
    fn blocking_reason(&self) -> Option<String> {
        if let Some(dep) = self
            .dependencies
            .iter()
            .find(|d| d.status == MilestoneStatus::Blocked)
        {
            return Some(format!("dependency '{}' is blocked", dep.id));
        }
        if let Some(dep) = self.incomplete_dependency() {
            return Some(format!("dependency '{}' is not completed", dep.id));
        }
        if let Some(task) = self.tasks.iter().find(|t| t.assignee_id.is_none()) {
            return Some(format!("task '{}' has no assignee", task.id));
        }
        None
    }

    fn require_created(&self) -> Result<(), MilestoneError> {
        if self.created {
            Ok(())
        } else {
            Err(MilestoneError::NotCreated)
        }
    }

    fn require_active(&self) -> Result<(), MilestoneError> {
        self.require_created()?;
        if self.status.is_terminal() {
            return Err(MilestoneError::Terminal { status: self.status });
        }
        Ok(())
    }

    fn check_dependencies_completed(&self) -> Result<(), MilestoneError> {
        if let Some(dep) = self.incomplete_dependency() {
            return Err(MilestoneError::DependencyIncomplete {
                dependency_id: dep.id.clone(),
            });
        }
        Ok(())
    }

    fn handle_status_change(
        &self,
        to: MilestoneStatus,
        at: DateTime<Utc>,
        comment: Option<String>,
    ) -> Result<MilestoneEvent, MilestoneError> {
        self.require_created()?;
        if !self.status.can_transition_to(to) {
            return Err(MilestoneError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        match to {
            MilestoneStatus::InProgress => {
                self.check_dependencies_completed()?;
                Ok(MilestoneEvent::Started)
            }
            MilestoneStatus::Completed => {
                let remaining = self.tasks.iter().filter(|t| !t.completed).count();
                if remaining > 0 {
                    return Err(MilestoneError::TasksIncomplete { remaining });
                }
                if self.progress != 100 {
                    return Err(MilestoneError::ProgressIncomplete {
                        progress: self.progress,
                    });
                }
                self.check_dependencies_completed()?;
                Ok(MilestoneEvent::Completed { at })
            }
            MilestoneStatus::Blocked => {
                let reason = self
                    .blocking_reason()
                    .ok_or(MilestoneError::NoBlockingReason)?;
                Ok(MilestoneEvent::Blocked { reason })
            }
            MilestoneStatus::Pending => {
                // Only reachable from Blocked per the transition table; the
                // obstruction must be resolved before reopening.
                self.check_dependencies_completed()?;
                Ok(MilestoneEvent::Reopened)
            }
            MilestoneStatus::Cancelled => Ok(MilestoneEvent::Cancelled { comment }),
        }
    }

    fn handle_add_dependency(
        &self,
        dependency: DependencySnapshot,
    ) -> Result<MilestoneEvent, MilestoneError> {
        self.require_active()?;
        if dependency.id == self.id {
            return Err(MilestoneError::SelfDependency);
        }
        if self.dependencies.iter().any(|d| d.id == dependency.id) {
            return Err(MilestoneError::DuplicateDependency {
                dependency_id: dependency.id,
            });
        }
        // If this milestone is reachable from the candidate's dependency
        // tree, adding the edge closes a cycle.
        if dependency.reaches(&self.id) {
            return Err(MilestoneError::DependencyCycle {
                dependency_id: dependency.id,
            });
        }
        // A prerequisite due after this milestone could never be satisfied
        // in time.
        if let (Some(dep_due), Some(own_due)) = (dependency.due_date, self.due_date) {
            if dep_due > own_due {
                return Err(MilestoneError::DependencyDueTooLate {
                    dependency_id: dependency.id,
                });
            }
        }
        Ok(MilestoneEvent::DependencyAdded { dependency })
    }
}

impl Aggregate for Milestone {
    const AGGREGATE_TYPE: &'static str = "milestone";
    type Command = MilestoneCommand;
    type DomainEvent = MilestoneEvent;
    type Error = MilestoneError;

    fn handle(&self, command: MilestoneCommand) -> Result<Vec<MilestoneEvent>, MilestoneError> {
        match command {
            MilestoneCommand::Create {
                id,
                name,
                description,
                due_date,
                project_id,
            } => {
                if self.created {
                    return Err(MilestoneError::AlreadyCreated);
                }
                Ok(vec![MilestoneEvent::Created {
                    id,
                    name,
                    description,
                    due_date,
                    project_id,
                }])
            }

            MilestoneCommand::ChangeStatus { to, at, comment } => {
                Ok(vec![self.handle_status_change(to, at, comment)?])
            }

            MilestoneCommand::AddTask {
                task_id,
                name,
                assignee_id,
            } => {
                self.require_active()?;
                Ok(vec![MilestoneEvent::TaskAdded {
                    task: MilestoneTask {
                        id: task_id,
                        name,
                        completed: false,
                        assignee_id,
                    },
                }])
            }

            MilestoneCommand::CompleteTask { task_id } => {
                self.require_active()?;
                let task = self
                    .task(&task_id)
                    .ok_or_else(|| MilestoneError::TaskNotFound {
                        task_id: task_id.clone(),
                    })?;
                if task.completed {
                    return Err(MilestoneError::TaskAlreadyCompleted { task_id });
                }
                Ok(vec![MilestoneEvent::TaskCompleted { task_id }])
            }

            MilestoneCommand::AssignTask {
                task_id,
                assignee_id,
            } => {
                self.require_active()?;
                if self.task(&task_id).is_none() {
                    return Err(MilestoneError::TaskNotFound { task_id });
                }
                Ok(vec![MilestoneEvent::TaskAssigned {
                    task_id,
                    assignee_id,
                }])
            }

            MilestoneCommand::UpdateProgress { progress } => {
                self.require_active()?;
                if progress > 100 {
                    return Err(MilestoneError::InvalidProgress { progress });
                }
                Ok(vec![MilestoneEvent::ProgressUpdated { progress }])
            }

            MilestoneCommand::AddDependency { dependency } => {
                Ok(vec![self.handle_add_dependency(dependency)?])
            }

            MilestoneCommand::SetDueDate { due_date } => {
                self.require_active()?;
                // The new due date must still leave room for every
                // registered prerequisite.
                if let Some(dep) = self
                    .dependencies
                    .iter()
                    .find(|d| d.due_date.is_some_and(|dep_due| dep_due > due_date))
                {
                    return Err(MilestoneError::DependencyDueTooLate {
                        dependency_id: dep.id.clone(),
                    });
                }
                Ok(vec![MilestoneEvent::DueDateSet { due_date }])
            }

            MilestoneCommand::Assign { assignee_id } => {
                self.require_active()?;
                Ok(vec![MilestoneEvent::Assigned { assignee_id }])
            }
        }
    }

    fn apply(mut self, event: &MilestoneEvent) -> Self {
        match event {
            MilestoneEvent::Created {
                id,
                name,
                description,
                due_date,
                project_id,
            } => {
                self.id = id.clone();
                self.name = name.clone();
                self.description = description.clone();
                self.due_date = *due_date;
                self.project_id = project_id.clone();
                self.status = MilestoneStatus::Pending;
                self.created = true;
            }
            MilestoneEvent::Started => {
                self.status = MilestoneStatus::InProgress;
            }
            MilestoneEvent::Completed { at } => {
                self.status = MilestoneStatus::Completed;
                self.completion_date = Some(*at);
                self.progress = 100;
            }
            MilestoneEvent::Blocked { .. } => {
                self.status = MilestoneStatus::Blocked;
            }
            MilestoneEvent::Reopened => {
                self.status = MilestoneStatus::Pending;
            }
            MilestoneEvent::Cancelled { .. } => {
                self.status = MilestoneStatus::Cancelled;
            }
            MilestoneEvent::TaskAdded { task } => {
                self.tasks.push(task.clone());
            }
            MilestoneEvent::TaskCompleted { task_id } => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.id == *task_id) {
                    task.completed = true;
                }
            }
            MilestoneEvent::TaskAssigned {
                task_id,
                assignee_id,
            } => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.id == *task_id) {
                    task.assignee_id = Some(assignee_id.clone());
                }
            }
            MilestoneEvent::ProgressUpdated { progress } => {
                self.progress = *progress;
            }
            MilestoneEvent::DependencyAdded { dependency } => {
                self.dependencies.push(dependency.clone());
            }
            MilestoneEvent::DueDateSet { due_date } => {
                self.due_date = Some(*due_date);
            }
            MilestoneEvent::Assigned { assignee_id } => {
                self.assignee_id = Some(assignee_id.clone());
            }
        }
        self
    }
}
