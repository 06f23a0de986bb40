//! Error types for bound task operations.
//!
//! [`TaskError`] covers misuse of a task (wrong thread, double run, early
//! query) and failures to encode or decode a task's payloads. Errors raised
//! by the *target function* are never reported here: they are captured as
//! data into the task's exception envelope and surfaced through
//! [`BoundTask::get_exception`](crate::task::BoundTask::get_exception).

use std::thread::ThreadId;

use thiserror::Error;

/// Errors that can occur while running or querying a bound task.
///
/// # Examples
///
/// ```
/// use bound_task::TaskError;
///
/// let err = TaskError::NotCompleted {
///     task_id: "t-1".to_string(),
/// };
/// assert!(err.is_usage_error());
/// assert!(err.to_string().contains("t-1"));
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// `run()` was called from a thread other than the owner.
    #[error("task {task_id} is bound to thread {owner:?}, cannot run on {caller:?}")]
    WrongThread {
        /// The task that was run.
        task_id: String,
        /// The thread the task is bound to.
        owner: ThreadId,
        /// The thread that attempted the run.
        caller: ThreadId,
    },

    /// `run()` was called on a task that has already been run.
    #[error("task {task_id} has already been run")]
    AlreadyRun {
        /// The task that was run twice.
        task_id: String,
    },

    /// An outcome accessor was called before the task completed.
    #[error("task {task_id} has not completed")]
    NotCompleted {
        /// The task that was queried.
        task_id: String,
    },

    /// A plain-data value could not be encoded to text.
    #[error("failed to encode payload: {0}")]
    Encoding(String),

    /// The text payload could not be decoded or does not match the static payload.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// An exception envelope could not be captured or opened.
    #[error("invalid exception envelope: {0}")]
    Envelope(String),
}

impl TaskError {
    /// Returns `true` for programmer errors that are fixed by correcting
    /// call order rather than retrying.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::WrongThread { .. } | Self::AlreadyRun { .. } | Self::NotCompleted { .. }
        )
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}
