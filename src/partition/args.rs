//! Call-site argument types.
//!
//! Callers build an explicit tagged list of arguments: [`Arg::Data`] for
//! JSON-safe plain values and [`Arg::Callback`] for callables. The same
//! [`CallArgs`] type is handed back to the target function once the
//! arguments have been rebuilt from the task's payloads.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::TaskError;
use crate::exception::TaskException;

type CallbackFn = dyn Fn(Vec<Value>) -> Result<Value, TaskException> + Send + Sync;
type TargetBody = dyn Fn(CallArgs) -> Result<Value, TaskException> + Send + Sync;

/// A callable passed as an argument to a task's target function.
///
/// Cloning a `Callback` shares the same underlying closure, so identity is
/// preserved across partitioning: use [`ptr_eq`](Self::ptr_eq) to check it.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<CallbackFn>,
}

impl Callback {
    /// Wraps a closure as a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, TaskException> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Invokes the callback.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, TaskException> {
        (self.inner)(args)
    }

    /// Returns `true` if both handles refer to the same closure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("ptr", &Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

/// The function a task runs. Always carried in the static partition.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetBody>,
}

impl Target {
    /// Wraps a closure as a task target.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value, TaskException> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub(crate) fn invoke(&self, args: CallArgs) -> Result<Value, TaskException> {
        (self.inner)(args)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("ptr", &Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

/// A single argument: plain data or a callable.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A JSON-safe plain value; travels in the text partition.
    Data(Value),
    /// A callable; travels in the static partition.
    Callback(Callback),
}

impl Arg {
    /// Serializes any value into a plain-data argument.
    ///
    /// # Examples
    ///
    /// ```
    /// use bound_task::Arg;
    ///
    /// let arg = Arg::data(&vec![1, 2, 3]).unwrap();
    /// assert_eq!(arg.as_data(), Some(&serde_json::json!([1, 2, 3])));
    /// ```
    pub fn data<T: Serialize + ?Sized>(value: &T) -> Result<Self, TaskError> {
        serde_json::to_value(value)
            .map(Self::Data)
            .map_err(|e| TaskError::Encoding(e.to_string()))
    }

    /// Wraps a closure as a callback argument.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, TaskException> + Send + Sync + 'static,
    {
        Self::Callback(Callback::new(f))
    }

    /// Returns the plain value, if this is a data argument.
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Callback(_) => None,
        }
    }

    /// Returns the callback, if this is a callable argument.
    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Self::Data(_) => None,
            Self::Callback(cb) => Some(cb),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Data(value)
    }
}

impl From<Callback> for Arg {
    fn from(cb: Callback) -> Self {
        Self::Callback(cb)
    }
}

/// Positional and keyword arguments of a call.
///
/// # Examples
///
/// ```
/// use bound_task::{Arg, CallArgs};
/// use serde_json::json;
///
/// let args = CallArgs::new()
///     .arg(json!(7))
///     .arg(Arg::callback(|_| Ok(json!(null))))
///     .kwarg("mode", json!("fast"));
///
/// assert_eq!(args.len(), 2);
/// assert_eq!(args.data(0), Some(&json!(7)));
/// assert!(args.callback(1).is_some());
/// assert_eq!(args.kwarg_data("mode"), Some(&json!("fast")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    /// Positional arguments, in call order.
    pub positional: Vec<Arg>,
    /// Keyword arguments, in insertion order.
    pub keyword: IndexMap<String, Arg>,
}

impl CallArgs {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.positional.push(arg.into());
        self
    }

    /// Sets a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.keyword.insert(name.into(), arg.into());
        self
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Returns `true` if there are no positional or keyword arguments.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// The plain value at `index`, if present and plain.
    pub fn data(&self, index: usize) -> Option<&Value> {
        self.positional.get(index).and_then(Arg::as_data)
    }

    /// The callback at `index`, if present and callable.
    pub fn callback(&self, index: usize) -> Option<&Callback> {
        self.positional.get(index).and_then(Arg::as_callback)
    }

    /// The plain keyword value `name`, if present and plain.
    pub fn kwarg_data(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name).and_then(Arg::as_data)
    }

    /// The keyword callback `name`, if present and callable.
    pub fn kwarg_callback(&self, name: &str) -> Option<&Callback> {
        self.keyword.get(name).and_then(Arg::as_callback)
    }

    /// Deserializes the plain value at `index` into `T`.
    ///
    /// Missing, callable or mistyped arguments are reported as a
    /// `TypeError` exception so a target can propagate them with `?`.
    pub fn typed<T: DeserializeOwned>(&self, index: usize) -> Result<T, TaskException> {
        let value = self.data(index).ok_or_else(|| {
            TaskException::new(
                "TypeError",
                format!("missing plain argument at position {index}"),
            )
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            TaskException::new("TypeError", format!("argument {index}: {e}"))
        })
    }
}
