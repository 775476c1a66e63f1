//! Retrace: the capture and replay core of a graphics API tracer.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! retrace sub-crates. An interception layer records every call into a
//! [`capture::CaptureSession`]; a replayer feeds the resulting trace through a
//! [`replay::Dispatcher`], which remaps capture-time handles and GPU virtual
//! addresses onto the objects a live driver hands back.
//!
//! # Quick start
//!
//! ```rust
//! use retrace::prelude::*;
//!
//! // A live backend that hands out sequential handles.
//! struct Driver(u64);
//! impl LiveApi for Driver {
//!     fn invoke(&mut self, _: &LiveCall<'_>) -> ResultCode {
//!         ResultCode::SUCCESS
//!     }
//!     fn create(&mut self, _: &LiveCall<'_>, _: HandleCategory, count: usize) -> Created {
//!         let handles = (0..count)
//!             .map(|_| {
//!                 self.0 += 1;
//!                 LiveHandle(self.0)
//!             })
//!             .collect();
//!         Created { result: ResultCode::SUCCESS, handles }
//!     }
//!     fn destroy(&mut self, _: &LiveCall<'_>, _: HandleCategory, _: LiveHandle) -> ResultCode {
//!         ResultCode::SUCCESS
//!     }
//!     fn query_address(&mut self, _: &LiveCall<'_>, _: LiveHandle) -> QueriedAddress {
//!         QueriedAddress { result: ResultCode::SUCCESS, address: 0 }
//!     }
//! }
//!
//! const CREATE_BUFFER: CallId = CallId(1);
//!
//! // Capture one call into memory.
//! let session = CaptureSession::from_writer(Vec::new(), CaptureConfig::default())?;
//! let mut call = session.begin_lifetime(CREATE_BUFFER).expect("session is capturing");
//! call.encode_u64(256);
//! call.encode_new_handle(HandleCategory::Buffer, 0xBEEF)?;
//! call.encode_result(ResultCode::SUCCESS);
//! call.end()?;
//! let (trace, _) = session.finish()?;
//!
//! // Replay it.
//! let schemas = SchemaRegistry::new().with(
//!     CREATE_BUFFER,
//!     CallSchema::create("CreateBuffer", HandleCategory::Buffer, 1).returns_code(),
//! );
//! let mut dispatcher = Dispatcher::new(schemas, Driver(0), ReplayConfig::default())?;
//! let summary = dispatcher.run(TraceReader::open(trace.as_slice())?)?;
//! assert!(summary.is_clean());
//! assert_eq!(
//!     dispatcher.objects().lookup(HandleCategory::Buffer, CaptureId(0xBEEF))?,
//!     LiveHandle(1)
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `retrace-core` | Identifiers, handle categories, result codes |
//! | [`format`] | `retrace-format` | Trace file framing and the value codec |
//! | [`mapping`] | `retrace-mapping` | Object table and GPU virtual address map |
//! | [`capture`] | `retrace-capture` | Capture sessions and call encoders |
//! | [`replay`] | `retrace-replay` | Call schemas, the live API seam, the dispatcher |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers, handle categories, and result codes (`retrace-core`).
pub use retrace_core as types;

/// Trace file framing and the self-describing value codec (`retrace-format`).
///
/// Write traces with [`format::TraceWriter`], read them with
/// [`format::TraceReader`].
pub use retrace_format as format;

/// Replay-side identity and address mapping (`retrace-mapping`).
///
/// [`mapping::ObjectTable`] maps capture ids to live handles;
/// [`mapping::GpuVaMap`] translates capture-time device addresses.
pub use retrace_mapping as mapping;

/// Capture sessions and per-call encoders (`retrace-capture`).
pub use retrace_capture as capture;

/// Call schemas, the [`replay::LiveApi`] seam, and the sequential
/// [`replay::Dispatcher`] (`retrace-replay`).
pub use retrace_replay as replay;

/// Common imports for typical retrace usage.
///
/// ```rust
/// use retrace::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use retrace_core::{
        CallId, CaptureId, HandleCategory, LiveHandle, ResultCode, SequenceNumber, ThreadId,
    };

    // Trace format
    pub use retrace_format::{
        CallRecord, CapabilityFlags, StructValue, TraceHeader, TraceMetadata, TraceReader,
        TraceWriter, Value,
    };

    // Mapping
    pub use retrace_mapping::{GpuVaMap, ObjectTable};

    // Capture
    pub use retrace_capture::{CallEncoder, CaptureConfig, CaptureIdPolicy, CaptureSession};

    // Replay
    pub use retrace_replay::{
        CallKind, CallSchema, Created, Dispatcher, FailurePolicy, LiveApi, LiveCall,
        QueriedAddress, ReplayConfig, ReplaySummary, SchemaRegistry,
    };

    // Errors
    pub use retrace_capture::CaptureError;
    pub use retrace_format::FormatError;
    pub use retrace_mapping::MappingError;
    pub use retrace_replay::ReplayError;
}
