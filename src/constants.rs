//! Constants shared by the exception envelope and the task runner.

/// Format version written into every exception envelope.
///
/// Envelopes with a different version are rejected by
/// [`ExceptionEnvelope::open`](crate::exception::ExceptionEnvelope::open).
pub const ENVELOPE_VERSION: u32 = 1;

/// Exception type name recorded when the target function panics.
pub const PANIC_TYPE_NAME: &str = "panic";

/// Exception type name recorded when a task's arguments cannot be rebuilt
/// from its payloads.
pub const ARGUMENT_ERROR_TYPE_NAME: &str = "ArgumentError";

/// Exception type name recorded when a returned value cannot be encoded.
pub const ENCODING_ERROR_TYPE_NAME: &str = "EncodingError";

/// Marker appended to a trace cut at the configured size limit.
pub const TRUNCATED_TRACE_MARKER: &str = "\n... trace truncated";
