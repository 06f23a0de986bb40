//! Task outcome and status snapshot types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exception::ExceptionEnvelope;

/// Which way a task finished, if it has.
///
/// # State Machine
///
/// ```text
/// Unset -> Success | Failure
/// Success -> (terminal)
/// Failure -> (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The task has not completed.
    Unset,
    /// The target function returned a value.
    Success,
    /// The target function failed; an exception envelope is stored.
    Failure,
}

impl OutcomeKind {
    /// Returns `true` for `Success` and `Failure`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// The published outcome of a task. Exactly one variant, written once.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Success {
        result_text: String,
        completed_at: DateTime<Utc>,
    },
    Failure {
        envelope: ExceptionEnvelope,
        completed_at: DateTime<Utc>,
    },
}

impl Outcome {
    pub(crate) fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success { .. } => OutcomeKind::Success,
            Self::Failure { .. } => OutcomeKind::Failure,
        }
    }

    pub(crate) fn completed_at(&self) -> DateTime<Utc> {
        match self {
            Self::Success { completed_at, .. } | Self::Failure { completed_at, .. } => {
                *completed_at
            },
        }
    }
}

/// Serializable point-in-time view of a task, for logs and diagnostics.
///
/// # Examples
///
/// ```
/// use bound_task::{BoundTask, CallArgs, OutcomeKind, Target};
/// use serde_json::json;
///
/// let task = BoundTask::on_current_thread(
///     Target::new(|_| Ok(json!(1))),
///     CallArgs::new(),
/// )
/// .unwrap();
///
/// let json = serde_json::to_value(task.info()).unwrap();
/// assert_eq!(json["status"], "unset");
/// assert!(json.get("completedAt").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Unique identifier of the task.
    pub task_id: String,

    /// Debug rendering of the owner thread's id.
    pub owner_thread: String,

    /// Current outcome kind.
    pub status: OutcomeKind,

    /// When the task was constructed.
    pub created_at: DateTime<Utc>,

    /// When the outcome was published. Omitted until then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
