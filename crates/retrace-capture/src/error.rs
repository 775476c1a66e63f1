//! Capture error types.

use retrace_core::CallId;
use retrace_format::FormatError;

use crate::config::ConfigError;

/// Errors reported by a capture session or call encoder.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The configuration failed validation.
    #[error("invalid capture configuration: {0}")]
    Config(#[from] ConfigError),
    /// Writing the trace failed.
    #[error("trace write failed: {0}")]
    Format(#[from] FormatError),
    /// Opening the output file failed.
    #[error("cannot open trace output: {0}")]
    Io(#[from] std::io::Error),
    /// The session has already been finalized.
    #[error("capture session is finalized")]
    Finalized,
    /// A creation or destruction was encoded outside a lifetime encoder.
    #[error("call {call_id} encodes object lifetimes but was not begun with begin_lifetime")]
    NotLifetimeEncoder {
        /// The offending call.
        call_id: CallId,
    },
    /// Another thread panicked while holding a session lock.
    #[error("capture session lock poisoned")]
    Poisoned,
}
