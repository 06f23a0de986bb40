//! Logging setup.
//!
//! The crate emits `tracing` events under the `bound_task` target: `debug`
//! for task lifecycle and captured failures, `warn` for misuse such as a
//! run on the wrong thread. Applications normally install their own
//! subscriber; [`init_logging`] is a convenience for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` when the variable is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
///
/// # Examples
///
/// ```
/// bound_task::logging::init_logging("bound_task=debug");
/// ```
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
