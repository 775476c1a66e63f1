//! Data types for the trace file: header and call records.

use bitflags::bitflags;
use retrace_core::{CallId, CaptureId, SequenceNumber, ThreadId};

use crate::codec::decode_payload;
use crate::error::FormatError;
use crate::value::Value;

bitflags! {
    /// Features the capturing side used, stored in the trace header.
    ///
    /// A reader rejects bits it does not know: replaying a trace whose
    /// features are not understood cannot be faithful.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u32 {
        /// Capture identities are surrogate counters, not native handle values.
        const HANDLE_IDS_ARE_SURROGATE = 1 << 0;
        /// Payloads carry GPU virtual addresses that need range translation.
        const GPU_ADDRESSES = 1 << 1;
        /// Structures carry extension chains.
        const EXTENSION_CHAINS = 1 << 2;
        /// Records were captured from more than one application thread.
        const MULTITHREADED = 1 << 3;
    }
}

/// Descriptive metadata stored in the trace header.
///
/// # Examples
///
/// ```
/// use retrace_format::TraceMetadata;
///
/// let meta = TraceMetadata {
///     application: "triangle".into(),
///     api: "vulkan".into(),
///     tool_version: "0.1.0".into(),
/// };
/// assert_eq!(meta.api, "vulkan");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceMetadata {
    /// Name of the captured application.
    pub application: String,
    /// Graphics API the trace was captured from (e.g. `"vulkan"`, `"d3d12"`).
    pub api: String,
    /// Version of the capture layer that wrote the trace.
    pub tool_version: String,
}

/// The trace file header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceHeader {
    /// Format version the stream was written with.
    pub version: u8,
    /// Capture features in use.
    pub capabilities: CapabilityFlags,
    /// Descriptive metadata.
    pub metadata: TraceMetadata,
}

impl TraceHeader {
    /// A header for the current format version.
    pub fn new(capabilities: CapabilityFlags, metadata: TraceMetadata) -> Self {
        Self {
            version: crate::FORMAT_VERSION,
            capabilities,
            metadata,
        }
    }
}

/// One serialized API call.
///
/// Immutable once written. The payload is the encoded argument list (and
/// trailing result code, when the call returns one); decode it with
/// [`CallRecord::decode_values`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    /// The entry point that was called.
    pub call_id: CallId,
    /// Application thread that made the call.
    pub thread_id: ThreadId,
    /// Position in the trace; strictly increasing.
    pub sequence: SequenceNumber,
    /// Encoded payload bytes.
    pub payload: Vec<u8>,
}

impl CallRecord {
    /// Decode the payload into its value list.
    pub fn decode_values(&self) -> Result<Vec<Value<CaptureId>>, FormatError> {
        decode_payload(&self.payload)
    }
}
