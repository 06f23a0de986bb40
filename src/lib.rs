//! Single-use, thread-bound tasks.
//!
//! A [`BoundTask`] is a unit of work created on one thread, bound to run on
//! exactly one designated owner thread, whose result or exception can later
//! be read from any thread that waits on it.
//!
//! # Overview
//!
//! - The submitter builds a task from a [`Target`] and its [`CallArgs`].
//!   Arguments are an explicit mix of plain data ([`Arg::Data`]) and
//!   callables ([`Arg::Callback`]); the [`partition`] module splits them so
//!   the plain-data part is kept as JSON text while callables stay in
//!   memory.
//! - The task is delivered to the owner thread by any external mechanism
//!   and run there exactly once with [`BoundTask::run`].
//! - Readers block on [`BoundTask::wait`] (or
//!   [`wait_timeout`](BoundTask::wait_timeout)) and then query
//!   [`is_successful`](BoundTask::is_successful),
//!   [`get_result`](BoundTask::get_result) and
//!   [`get_exception`](BoundTask::get_exception).
//!
//! Failures inside the target are data: they are captured with their type
//! name, message and stack trace into an [`ExceptionEnvelope`] and, unless
//! panic catching is turned off, never propagate out of `run()`.
//!
//! # Module Organization
//!
//! - [`task`] - The bound task itself
//! - [`partition`] - Argument partitioning and reconstruction
//! - [`exception`] - Exception capture and envelope transport
//! - [`signal`] - Set-once, multi-waiter completion signal
//! - [`outcome`] - Outcome kind and status snapshot
//! - [`config`] - Capture configuration (TOML and environment)
//! - [`error`] - Usage and payload errors

pub mod config;
pub mod constants;
pub mod error;
pub mod exception;
pub mod outcome;
pub mod partition;
pub mod signal;
pub mod task;

/// Logging setup helpers.
#[cfg(feature = "logging")]
pub mod logging;

// Re-exports for ergonomic access
pub use config::CaptureConfig;
pub use error::TaskError;
pub use exception::{ExceptionEnvelope, TaskException};
pub use outcome::{OutcomeKind, TaskInfo};
pub use partition::{Arg, CallArgs, Callback, Target};
pub use task::BoundTask;
