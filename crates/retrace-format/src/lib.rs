//! Binary envelope codec and trace file format for retrace.
//!
//! Encodes one API call's arguments into a self-describing byte payload and
//! frames payloads into a sequential trace file.
//!
//! # Architecture
//!
//! - [`Value`] is the argument tree, generic over the handle representation
//! - [`ValueEncoder`] and [`decode_value`] convert between values and bytes
//! - [`TraceWriter`] appends [`CallRecord`]s to any `Write` sink
//! - [`TraceReader`] plays records back from any `Read` source
//!
//! # Format
//!
//! ```text
//! [MAGIC "RTRC"] [VERSION u8] [CAPABILITIES u32] [TraceMetadata]
//! [Record 1] [Record 2] ... [Record N]
//! ```
//!
//! Each record holds the call id, the capturing thread, a global sequence
//! number and the encoded payload.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod reader;
pub mod types;
pub mod value;
pub mod writer;

pub use codec::{decode_payload, decode_value, encode_payload, encode_value, ByteCursor, ValueEncoder};
pub use error::FormatError;
pub use reader::{RecordIter, TraceReader};
pub use types::{CallRecord, CapabilityFlags, TraceHeader, TraceMetadata};
pub use value::{ChainLink, ExtensionChain, StructValue, Value};
pub use writer::TraceWriter;

/// Magic bytes at the start of every trace file.
pub const MAGIC: [u8; 4] = *b"RTRC";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;

/// Largest record payload accepted by the reader and writer (256 MiB).
pub const MAX_PAYLOAD_LEN: u64 = 256 * 1024 * 1024;

/// Deepest pointer/array/struct nesting the decoder follows.
pub const MAX_NESTING: usize = 64;
