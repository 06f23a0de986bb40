//! Argument partitioning for bound tasks.
//!
//! A call is split into two structures of identical shape:
//!
//! - the **static** partition ([`StaticPayload`]) holds the target and, per
//!   argument slot, `Some(callback)` or `None`;
//! - the **text** partition is a JSON document holding, per slot, either
//!   the plain value or an explicit placeholder ([`TextSlot::Static`]).
//!
//! Placeholders are a distinct tagged variant rather than a sentinel value,
//! so no plain argument (`null` included) can be mistaken for one.
//!
//! # Text format
//!
//! ```json
//! {
//!   "args": [{"kind": "static"}, {"kind": "data", "value": 7}],
//!   "kwargs": {"label": {"kind": "data", "value": "x"}}
//! }
//! ```

pub mod args;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use args::{Arg, CallArgs, Callback, Target};

use crate::error::TaskError;

/// One slot of the text partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TextSlot {
    /// A plain value.
    Data(Value),
    /// Placeholder: the value lives in the static partition.
    Static,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TextPayload {
    #[serde(default)]
    args: Vec<TextSlot>,
    #[serde(default)]
    kwargs: IndexMap<String, TextSlot>,
}

/// The non-serializable partition of a task's input.
///
/// Valid only inside the process that created it; it never crosses a
/// serialization boundary.
#[derive(Debug, Clone)]
pub struct StaticPayload {
    target: Target,
    positional: Vec<Option<Callback>>,
    keyword: IndexMap<String, Option<Callback>>,
}

impl StaticPayload {
    /// The target function.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Number of callable arguments carried.
    pub fn callback_count(&self) -> usize {
        self.positional.iter().flatten().count() + self.keyword.values().flatten().count()
    }
}

/// Splits a call into its static and text partitions.
///
/// # Examples
///
/// ```
/// use bound_task::partition::{partition, reconstruct};
/// use bound_task::{Arg, CallArgs, Callback, Target};
/// use serde_json::json;
///
/// let callback = Callback::new(|_| Ok(json!("called")));
/// let target = Target::new(|args| Ok(args.data(1).cloned().unwrap_or_default()));
/// let call = CallArgs::new().arg(callback.clone()).arg(json!(7));
///
/// let (payload_static, payload_text) = partition(target, call).unwrap();
/// assert!(!payload_text.contains("called"));
///
/// let rebuilt = reconstruct(&payload_static, &payload_text).unwrap();
/// assert!(rebuilt.callback(0).unwrap().ptr_eq(&callback));
/// assert_eq!(rebuilt.data(1), Some(&json!(7)));
/// ```
pub fn partition(target: Target, call: CallArgs) -> Result<(StaticPayload, String), TaskError> {
    let (positional, text_args): (Vec<_>, Vec<_>) =
        call.positional.into_iter().map(split_arg).unzip();

    let mut keyword = IndexMap::with_capacity(call.keyword.len());
    let mut text_kwargs = IndexMap::with_capacity(call.keyword.len());
    for (name, arg) in call.keyword {
        let (cb, slot) = split_arg(arg);
        keyword.insert(name.clone(), cb);
        text_kwargs.insert(name, slot);
    }

    let text = TextPayload {
        args: text_args,
        kwargs: text_kwargs,
    };
    let payload_text =
        serde_json::to_string(&text).map_err(|e| TaskError::Encoding(e.to_string()))?;

    let payload_static = StaticPayload {
        target,
        positional,
        keyword,
    };
    tracing::trace!(
        callbacks = payload_static.callback_count(),
        text_len = payload_text.len(),
        "partitioned call"
    );
    Ok((payload_static, payload_text))
}

/// Rebuilds the full argument list by overlaying the static partition on
/// the decoded text partition.
///
/// Wherever the static partition holds a callback it is used; otherwise the
/// text value is used. Shape mismatches, a slot filled in both partitions,
/// and a placeholder with no callback behind it are all reported as
/// [`TaskError::Payload`].
pub fn reconstruct(
    payload_static: &StaticPayload,
    payload_text: &str,
) -> Result<CallArgs, TaskError> {
    let text: TextPayload = serde_json::from_str(payload_text)?;

    if text.args.len() != payload_static.positional.len() {
        return Err(TaskError::Payload(format!(
            "text partition has {} positional slots, static partition has {}",
            text.args.len(),
            payload_static.positional.len()
        )));
    }
    if text.kwargs.len() != payload_static.keyword.len() {
        return Err(TaskError::Payload(format!(
            "text partition has {} keyword slots, static partition has {}",
            text.kwargs.len(),
            payload_static.keyword.len()
        )));
    }

    let positional = text
        .args
        .into_iter()
        .zip(&payload_static.positional)
        .enumerate()
        .map(|(index, (slot, cb))| overlay(slot, cb.as_ref(), &format!("position {index}")))
        .collect::<Result<Vec<_>, _>>()?;

    let mut keyword = IndexMap::with_capacity(text.kwargs.len());
    for (name, slot) in text.kwargs {
        let cb = payload_static.keyword.get(&name).ok_or_else(|| {
            TaskError::Payload(format!("keyword '{name}' missing from static partition"))
        })?;
        let arg = overlay(slot, cb.as_ref(), &format!("keyword '{name}'"))?;
        keyword.insert(name, arg);
    }

    Ok(CallArgs {
        positional,
        keyword,
    })
}

fn split_arg(arg: Arg) -> (Option<Callback>, TextSlot) {
    match arg {
        Arg::Data(value) => (None, TextSlot::Data(value)),
        Arg::Callback(cb) => (Some(cb), TextSlot::Static),
    }
}

fn overlay(slot: TextSlot, cb: Option<&Callback>, at: &str) -> Result<Arg, TaskError> {
    match (cb, slot) {
        (Some(cb), TextSlot::Static) => Ok(Arg::Callback(cb.clone())),
        (None, TextSlot::Data(value)) => Ok(Arg::Data(value)),
        (Some(_), TextSlot::Data(_)) => Err(TaskError::Payload(format!(
            "{at} is filled in both partitions"
        ))),
        (None, TextSlot::Static) => Err(TaskError::Payload(format!(
            "{at} is a placeholder with no static value"
        ))),
    }
}
