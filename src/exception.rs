//! Exception capture and transport.
//!
//! A failure inside a task's target function is data, not control flow.
//! [`TaskException`] is the reconstructable form of such a failure: the
//! original type name, message, cause chain and the stack trace rendered
//! at the point of failure. [`ExceptionEnvelope`] is its opaque binary
//! capture, which can cross thread boundaries (and, via
//! [`to_base64`](ExceptionEnvelope::to_base64), process boundaries) and be
//! reopened by any reader.
//!
//! Live stack frames cannot be moved between threads, so the trace travels
//! as pre-rendered text. Reopening an envelope never captures a new trace,
//! which keeps the trace rooted at the failure site rather than at the
//! reader.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::panic::{AssertUnwindSafe, PanicHookInfo};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CaptureConfig;
use crate::constants::{ENVELOPE_VERSION, PANIC_TYPE_NAME, TRUNCATED_TRACE_MARKER};
use crate::error::TaskError;

/// A failure raised by a task's target function.
///
/// Construct one with [`new`](Self::new) for a named failure kind, or
/// [`from_error`](Self::from_error) to wrap any `std::error::Error`. Both
/// capture a backtrace at the call site, which is the trace later readers
/// see.
///
/// # Examples
///
/// ```
/// use bound_task::TaskException;
///
/// let exc = TaskException::new("ValueError", "bad input");
/// assert_eq!(exc.type_name(), "ValueError");
/// assert_eq!(exc.message(), "bad input");
/// assert_eq!(exc.to_string(), "ValueError: bad input");
/// assert!(!exc.trace().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{type_name}: {message}")]
pub struct TaskException {
    type_name: String,
    message: String,
    causes: Vec<String>,
    trace: String,
    thread: Option<String>,
}

impl TaskException {
    /// Creates an exception of the given type with a trace captured here.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            causes: Vec::new(),
            trace: Backtrace::force_capture().to_string(),
            thread: None,
        }
    }

    /// Wraps an error, recording its Rust type name and `source()` chain.
    ///
    /// # Examples
    ///
    /// ```
    /// use bound_task::TaskException;
    ///
    /// let err = "abc".parse::<i32>().unwrap_err();
    /// let exc = TaskException::from_error(&err);
    /// assert_eq!(exc.type_name(), "ParseIntError");
    /// ```
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + ?Sized + 'static,
    {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            type_name: short_type_name(std::any::type_name::<E>()),
            message: err.to_string(),
            causes,
            trace: Backtrace::force_capture().to_string(),
            thread: None,
        }
    }

    /// Adds a cause message to the chain.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// The original exception type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The original message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Messages of the underlying causes, outermost first.
    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    /// The stack trace rendered where the failure happened.
    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// Name of the thread the failure was captured on, if it had one.
    pub fn thread(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    /// Returns `true` if this exception has the given type name.
    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send), trace: Option<String>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Self {
            type_name: PANIC_TYPE_NAME.to_string(),
            message,
            causes: Vec::new(),
            trace: trace.unwrap_or_else(|| Backtrace::force_capture().to_string()),
            thread: None,
        }
    }
}

/// Versioned on-the-wire snapshot stored inside an envelope.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeSnapshot {
    version: u32,
    type_name: String,
    message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
    trace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thread: Option<String>,
}

/// Opaque binary capture of a [`TaskException`].
///
/// # Examples
///
/// ```
/// use bound_task::config::CaptureConfig;
/// use bound_task::exception::{ExceptionEnvelope, TaskException};
///
/// let exc = TaskException::new("IoError", "disk full");
/// let envelope = ExceptionEnvelope::capture(&exc, &CaptureConfig::default());
///
/// let wire = envelope.to_base64();
/// let restored = ExceptionEnvelope::from_base64(&wire).unwrap().open().unwrap();
/// assert_eq!(restored.type_name(), "IoError");
/// assert_eq!(restored.message(), "disk full");
/// assert_eq!(restored.trace(), exc.trace());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEnvelope {
    bytes: Vec<u8>,
}

impl ExceptionEnvelope {
    /// Captures an exception according to `config`.
    ///
    /// The capturing thread's name is recorded when the exception does not
    /// already carry one.
    pub fn capture(exc: &TaskException, config: &CaptureConfig) -> Self {
        let trace = if config.capture_backtrace {
            truncate_trace(&exc.trace, config.max_trace_bytes)
        } else {
            String::new()
        };
        let thread = exc
            .thread
            .clone()
            .or_else(|| std::thread::current().name().map(str::to_string));

        let snapshot = EnvelopeSnapshot {
            version: ENVELOPE_VERSION,
            type_name: exc.type_name.clone(),
            message: exc.message.clone(),
            causes: exc.causes.clone(),
            trace,
            thread,
        };
        // The snapshot is plain strings; an encoding failure leaves an empty
        // envelope that `open` reports as invalid.
        let bytes = serde_json::to_vec(&snapshot).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode exception envelope");
            Vec::new()
        });
        Self { bytes }
    }

    /// Reconstructs the captured exception.
    pub fn open(&self) -> Result<TaskException, TaskError> {
        let snapshot: EnvelopeSnapshot =
            serde_json::from_slice(&self.bytes).map_err(|e| TaskError::Envelope(e.to_string()))?;
        if snapshot.version != ENVELOPE_VERSION {
            return Err(TaskError::Envelope(format!(
                "unsupported envelope version {} (expected {ENVELOPE_VERSION})",
                snapshot.version
            )));
        }

        Ok(TaskException {
            type_name: snapshot.type_name,
            message: snapshot.message,
            causes: snapshot.causes,
            trace: snapshot.trace,
            thread: snapshot.thread,
        })
    }

    /// Wraps raw envelope bytes, e.g. received from another process.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw envelope bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encodes the envelope as base64 text.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Decodes an envelope from base64 text.
    pub fn from_base64(text: &str) -> Result<Self, TaskError> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| TaskError::Envelope(e.to_string()))?;
        Ok(Self { bytes })
    }
}

type PanicHook = dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static;

#[derive(Clone, Copy, PartialEq, Eq)]
enum HookMode {
    /// Panics on this thread go straight to the outer hook.
    Off,
    /// Record the panic-site trace and keep the panic quiet.
    Record,
    /// Record the panic-site trace and still report to the outer hook.
    RecordAndForward,
}

thread_local! {
    static HOOK_MODE: Cell<HookMode> = const { Cell::new(HookMode::Off) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Capture scopes currently open across all threads, and the hook that was
/// installed before the first of them opened.
struct HookScopes {
    open: usize,
    outer: Option<Arc<PanicHook>>,
}

static HOOK_SCOPES: Mutex<HookScopes> = Mutex::new(HookScopes {
    open: 0,
    outer: None,
});

/// Installs the recording hook on top of whatever hook is current.
///
/// The hook is taken fresh when the first scope opens, so a hook set by the
/// application between captures is chained rather than lost. A hook set
/// while a capture is in progress is replaced when the last scope closes.
fn open_hook_scope() {
    let mut scopes = HOOK_SCOPES.lock();
    if scopes.open == 0 {
        let outer: Arc<PanicHook> = Arc::from(std::panic::take_hook());
        let chained = Arc::clone(&outer);
        std::panic::set_hook(Box::new(move |info| {
            let mode = HOOK_MODE.with(Cell::get);
            if mode != HookMode::Off {
                let trace = Backtrace::force_capture().to_string();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            if mode != HookMode::Record {
                chained(info);
            }
        }));
        scopes.outer = Some(outer);
    }
    scopes.open += 1;
}

/// Restores the outer hook once the last scope closes.
fn close_hook_scope() {
    let mut scopes = HOOK_SCOPES.lock();
    scopes.open = scopes.open.saturating_sub(1);
    if scopes.open == 0 {
        if let Some(outer) = scopes.outer.take() {
            drop(std::panic::take_hook());
            std::panic::set_hook(Box::new(move |info| outer(info)));
        }
    }
}

/// A panic caught by [`catch_panic`], with the trace recorded where it was
/// raised.
pub(crate) struct CaughtPanic {
    payload: Box<dyn Any + Send>,
    trace: Option<String>,
}

impl CaughtPanic {
    pub(crate) fn exception(&self) -> TaskException {
        TaskException::from_panic(self.payload.as_ref(), self.trace.clone())
    }

    /// Continues unwinding with the original payload.
    pub(crate) fn resume(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

/// Runs `f`, catching a panic and recording the backtrace at the panic site.
///
/// With `forward` set the panic is also reported to the application's hook,
/// for callers that go on to resume it. Panics on other threads are never
/// affected.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R, forward: bool) -> Result<R, CaughtPanic> {
    // The hook cannot be swapped from a thread that is already unwinding;
    // such callers fall back to a trace taken at the catch site.
    let scoped = !std::thread::panicking();
    if scoped {
        open_hook_scope();
    }
    let mode = if forward {
        HookMode::RecordAndForward
    } else {
        HookMode::Record
    };
    let previous = HOOK_MODE.with(|m| m.replace(mode));
    let result = std::panic::catch_unwind(AssertUnwindSafe(f));
    HOOK_MODE.with(|m| m.set(previous));
    if scoped {
        close_hook_scope();
    }

    result.map_err(|payload| CaughtPanic {
        payload,
        trace: PANIC_TRACE.with(|slot| slot.borrow_mut().take()),
    })
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn truncate_trace(trace: &str, max_bytes: usize) -> String {
    if trace.len() <= max_bytes {
        return trace.to_string();
    }
    let mut end = max_bytes;
    while !trace.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATED_TRACE_MARKER}", &trace[..end])
}
