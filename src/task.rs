//! The bound task: a single-use unit of work tied to one owner thread.
//!
//! A [`BoundTask`] is constructed on any thread, delivered to its owner
//! thread by some external mechanism (a channel, a work queue), and run
//! there exactly once. Any number of other threads holding an `Arc` to the
//! task can wait for completion and read the outcome.
//!
//! # Design
//!
//! The outcome is written once into a [`CompletionSignal`]; publishing it
//! is the single point at which the task becomes complete. Every field a
//! reader can observe is written before that publish, so a reader that
//! sees the task as complete sees the whole outcome. No other locking is
//! involved.
//!
//! Failures inside the target function never escape [`run`](BoundTask::run):
//! they are captured into an [`ExceptionEnvelope`] and surfaced through
//! [`get_exception`](BoundTask::get_exception). A panic with
//! [`CaptureConfig::catch_panics`] disabled is the one exception: it is
//! recorded the same way and then resumed.
//!
//! # Examples
//!
//! ```
//! use std::sync::{mpsc, Arc};
//! use std::thread;
//! use bound_task::{BoundTask, CallArgs, Target};
//! use serde_json::json;
//!
//! let (tx, rx) = mpsc::channel::<Arc<BoundTask>>();
//! let executor = thread::spawn(move || {
//!     for task in rx {
//!         task.run().unwrap();
//!     }
//! });
//!
//! let target = Target::new(|args| {
//!     let x: i64 = args.typed(0)?;
//!     Ok(json!(x + 1))
//! });
//! let task = Arc::new(
//!     BoundTask::from_call(executor.thread().id(), target, CallArgs::new().arg(json!(41)))
//!         .unwrap(),
//! );
//! tx.send(Arc::clone(&task)).unwrap();
//!
//! task.wait();
//! assert!(task.is_successful().unwrap());
//! assert_eq!(task.get_result().unwrap(), Some(json!(42)));
//!
//! drop(tx);
//! executor.join().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::constants::{ARGUMENT_ERROR_TYPE_NAME, ENCODING_ERROR_TYPE_NAME};
use crate::error::TaskError;
use crate::exception::{catch_panic, CaughtPanic, ExceptionEnvelope, TaskException};
use crate::outcome::{Outcome, OutcomeKind, TaskInfo};
use crate::partition::{partition, reconstruct, CallArgs, StaticPayload, Target};
use crate::signal::CompletionSignal;

/// A single-use task bound to execute on exactly one thread.
///
/// `BoundTask` is `Send + Sync`; share it between the submitter, the owner
/// thread and any readers with an `Arc`.
#[derive(Debug)]
pub struct BoundTask {
    id: String,
    owner: ThreadId,
    payload_static: StaticPayload,
    payload_text: String,
    config: CaptureConfig,
    created_at: DateTime<Utc>,
    claimed: AtomicBool,
    completion: CompletionSignal<Outcome>,
}

impl BoundTask {
    /// Creates a task from already-partitioned payloads.
    ///
    /// `owner` must be the thread that will later call [`run`](Self::run).
    pub fn new(owner: ThreadId, payload_static: StaticPayload, payload_text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            payload_static,
            payload_text,
            config: CaptureConfig::default(),
            created_at: Utc::now(),
            claimed: AtomicBool::new(false),
            completion: CompletionSignal::new(),
        }
    }

    /// Partitions `call` and creates a task that runs `target` on `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Encoding`] if the plain-data arguments cannot be
    /// encoded as text.
    pub fn from_call(owner: ThreadId, target: Target, call: CallArgs) -> Result<Self, TaskError> {
        let (payload_static, payload_text) = partition(target, call)?;
        Ok(Self::new(owner, payload_static, payload_text))
    }

    /// Creates a task owned by the calling thread.
    pub fn on_current_thread(target: Target, call: CallArgs) -> Result<Self, TaskError> {
        Self::from_call(thread::current().id(), target, call)
    }

    /// Replaces the exception capture configuration.
    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Unique identifier of this task.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The thread this task is bound to.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// The encoded plain-data partition.
    pub fn payload_text(&self) -> &str {
        &self.payload_text
    }

    /// Runs the target function. Must be called on the owner thread, once.
    ///
    /// On return the task is complete: either a result or an exception
    /// envelope has been published. Errors and panics raised by the target
    /// are recorded in the envelope rather than returned here. A payload
    /// that cannot be rebuilt into arguments is recorded as an
    /// `ArgumentError` failure.
    ///
    /// With [`CaptureConfig::catch_panics`] disabled, a panicking target is
    /// still recorded as a `panic` failure, and the panic then resumes
    /// unwinding through this call once readers have been released.
    ///
    /// # Errors
    ///
    /// - [`TaskError::AlreadyRun`] if the task has already been run, from
    ///   any thread, including a re-entrant call from inside the target.
    /// - [`TaskError::WrongThread`] if a task that has not run is called
    ///   from any thread but the owner.
    ///
    /// In both cases the task's state is unchanged.
    pub fn run(&self) -> Result<(), TaskError> {
        if self.claimed.load(Ordering::Acquire) {
            tracing::warn!(task_id = %self.id, "run attempted twice");
            return Err(self.already_run());
        }
        let caller = thread::current().id();
        if caller != self.owner {
            tracing::warn!(
                task_id = %self.id,
                owner = ?self.owner,
                caller = ?caller,
                "run attempted on wrong thread"
            );
            return Err(TaskError::WrongThread {
                task_id: self.id.clone(),
                owner: self.owner,
                caller,
            });
        }
        if self.claimed.swap(true, Ordering::AcqRel) {
            tracing::warn!(task_id = %self.id, "run attempted twice");
            return Err(self.already_run());
        }

        tracing::debug!(task_id = %self.id, "running bound task");
        let (outcome, escaped) = self.execute();
        let kind = outcome.kind();
        if self.completion.publish(outcome).is_err() {
            return Err(self.already_run());
        }
        tracing::debug!(task_id = %self.id, outcome = %kind, "bound task completed");
        if let Some(panic) = escaped {
            tracing::debug!(task_id = %self.id, "resuming panic from target function");
            panic.resume();
        }
        Ok(())
    }

    /// Returns `true` once the outcome has been published.
    pub fn is_complete(&self) -> bool {
        self.completion.is_set()
    }

    /// Blocks until the task completes.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Blocks until the task completes or `timeout` elapses.
    ///
    /// Returns `false` on timeout. Timing out does not affect the task: it
    /// still completes when its owner runs it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout).is_some()
    }

    /// Current outcome kind; never fails.
    pub fn outcome_kind(&self) -> OutcomeKind {
        self.completion
            .get()
            .map_or(OutcomeKind::Unset, Outcome::kind)
    }

    /// Whether the target function returned normally.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotCompleted`] if the task has not completed.
    pub fn is_successful(&self) -> Result<bool, TaskError> {
        Ok(self.outcome()?.kind() == OutcomeKind::Success)
    }

    /// The decoded return value, or `None` if the task failed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotCompleted`] if the task has not completed.
    pub fn get_result(&self) -> Result<Option<Value>, TaskError> {
        match self.result_text()? {
            Some(text) => Ok(Some(serde_json::from_str(text)?)),
            None => Ok(None),
        }
    }

    /// The return value deserialized into `T`, or `None` if the task failed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotCompleted`] if the task has not completed, or
    /// [`TaskError::Payload`] if the value does not deserialize into `T`.
    pub fn get_result_as<T: DeserializeOwned>(&self) -> Result<Option<T>, TaskError> {
        match self.result_text()? {
            Some(text) => Ok(Some(serde_json::from_str(text)?)),
            None => Ok(None),
        }
    }

    /// The encoded return value, or `None` if the task failed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotCompleted`] if the task has not completed.
    pub fn result_text(&self) -> Result<Option<&str>, TaskError> {
        match self.outcome()? {
            Outcome::Success { result_text, .. } => Ok(Some(result_text)),
            Outcome::Failure { .. } => Ok(None),
        }
    }

    /// The reconstructed exception, or `None` if the task succeeded.
    ///
    /// The exception carries the original type name, message and the trace
    /// captured where the failure happened.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotCompleted`] if the task has not completed, or
    /// [`TaskError::Envelope`] if the stored envelope cannot be opened.
    pub fn get_exception(&self) -> Result<Option<TaskException>, TaskError> {
        match self.exception_envelope()? {
            Some(envelope) => Ok(Some(envelope.open()?)),
            None => Ok(None),
        }
    }

    /// The raw exception envelope, or `None` if the task succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotCompleted`] if the task has not completed.
    pub fn exception_envelope(&self) -> Result<Option<&ExceptionEnvelope>, TaskError> {
        match self.outcome()? {
            Outcome::Success { .. } => Ok(None),
            Outcome::Failure { envelope, .. } => Ok(Some(envelope)),
        }
    }

    /// A serializable snapshot of the task's identity and status.
    pub fn info(&self) -> TaskInfo {
        let outcome = self.completion.get();
        TaskInfo {
            task_id: self.id.clone(),
            owner_thread: format!("{:?}", self.owner),
            status: outcome.map_or(OutcomeKind::Unset, Outcome::kind),
            created_at: self.created_at,
            completed_at: outcome.map(Outcome::completed_at),
        }
    }

    fn outcome(&self) -> Result<&Outcome, TaskError> {
        self.completion.get().ok_or_else(|| TaskError::NotCompleted {
            task_id: self.id.clone(),
        })
    }

    fn already_run(&self) -> TaskError {
        TaskError::AlreadyRun {
            task_id: self.id.clone(),
        }
    }

    /// Produces the outcome, plus the panic to resume when panics are not
    /// being caught.
    fn execute(&self) -> (Outcome, Option<CaughtPanic>) {
        let (returned, escaped) = match reconstruct(&self.payload_static, &self.payload_text) {
            Ok(args) => self.invoke(args),
            Err(err) => (
                Err(TaskException::new(ARGUMENT_ERROR_TYPE_NAME, err.to_string())),
                None,
            ),
        };
        let encoded = returned.and_then(|value| {
            serde_json::to_string(&value)
                .map_err(|e| TaskException::new(ENCODING_ERROR_TYPE_NAME, e.to_string()))
        });

        let completed_at = Utc::now();
        let outcome = match encoded {
            Ok(result_text) => Outcome::Success {
                result_text,
                completed_at,
            },
            Err(exc) => {
                tracing::debug!(task_id = %self.id, exception = %exc, "target function failed");
                Outcome::Failure {
                    envelope: ExceptionEnvelope::capture(&exc, &self.config),
                    completed_at,
                }
            },
        };
        (outcome, escaped)
    }

    fn invoke(&self, args: CallArgs) -> (Result<Value, TaskException>, Option<CaughtPanic>) {
        let target = self.payload_static.target();
        let catching = self.config.catch_panics;
        match catch_panic(|| target.invoke(args), !catching) {
            Ok(returned) => (returned, None),
            Err(panic) => {
                let exc = panic.exception();
                (Err(exc), (!catching).then_some(panic))
            },
        }
    }
}
